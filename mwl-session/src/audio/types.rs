//! Audio buffer and source types

use super::gain::SharedGain;
use std::sync::Arc;

/// Decoded guidance track, interleaved stereo f32
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl TrackBuffer {
    /// Build from interleaved samples with `channels` channels
    ///
    /// Mono is duplicated to both sides; anything wider keeps the first two
    /// channels.
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        let samples = match channels {
            0 => Vec::new(),
            1 => samples.iter().flat_map(|&s| [s, s]).collect(),
            2 => samples,
            n => samples
                .chunks_exact(n)
                .flat_map(|frame| [frame[0], frame[1]])
                .collect(),
        };
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Stereo frame at `position` seconds, linearly interpolated
    ///
    /// `None` past the end of the track.
    pub fn frame_at(&self, position: f64) -> Option<(f32, f32)> {
        if position < 0.0 {
            return Some((0.0, 0.0));
        }
        let exact = position * self.sample_rate as f64;
        let index = exact.floor() as usize;
        if index >= self.frames() {
            return None;
        }
        let frac = (exact - index as f64) as f32;
        let (l0, r0) = (self.samples[index * 2], self.samples[index * 2 + 1]);
        let (l1, r1) = if index + 1 < self.frames() {
            (self.samples[index * 2 + 2], self.samples[index * 2 + 3])
        } else {
            (l0, r0)
        };
        Some((l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac))
    }
}

/// Identifier of a source started on an output
pub type SourceId = u64;

/// What a source plays
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Guidance track starting `offset` seconds into the buffer
    Track {
        buffer: Arc<TrackBuffer>,
        offset: f64,
    },
    /// Sine oscillator
    Sine { frequency: f32 },
}

/// Source to start on an output
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub gain: SharedGain,
    /// Output time the source becomes audible
    pub start_at: f64,
    /// Output time the source halts and is released
    pub stop_at: Option<f64>,
}
