//! Audio outputs and the source mixer
//!
//! The engine never touches samples. It starts sources on an `AudioOutput`,
//! each bound to a gain timeline, and the output's mixer renders them
//! against its own sample clock. Sources leave the mixer on their own once
//! their stop time passes or a track runs out.

use super::types::{SourceId, SourceKind, SourceSpec};
use mwl_common::{Error, Result};
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Sound output capability
pub trait AudioOutput: Send + Sync {
    /// False when the host cannot play audio at all
    fn is_supported(&self) -> bool;

    /// Output clock in seconds
    fn current_time(&self) -> f64;

    fn start_source(&self, spec: SourceSpec) -> Result<SourceId>;

    /// Schedule a source to halt at output time `at`
    fn stop_source_at(&self, id: SourceId, at: f64);

    fn is_active(&self, id: SourceId) -> bool;

    fn active_sources(&self) -> usize;

    /// Drop every source immediately
    fn release(&self);
}

struct MixSource {
    id: SourceId,
    spec: SourceSpec,
}

impl MixSource {
    /// Sample contribution at output time `t`, `None` once exhausted
    fn sample_at(&self, t: f64) -> Option<(f32, f32)> {
        let local = t - self.spec.start_at;
        match &self.spec.kind {
            SourceKind::Track { buffer, offset } => buffer.frame_at(offset + local),
            SourceKind::Sine { frequency } => {
                let s = (TAU * *frequency as f64 * local).sin() as f32;
                Some((s, s))
            }
        }
    }

    fn finished_by(&self, t: f64) -> bool {
        if self.spec.stop_at.is_some_and(|stop| stop <= t) {
            return true;
        }
        match &self.spec.kind {
            SourceKind::Track { buffer, offset } => {
                offset + (t - self.spec.start_at) >= buffer.duration_secs()
            }
            SourceKind::Sine { .. } => false,
        }
    }
}

/// Sums live sources into interleaved frames
pub struct Mixer {
    sample_rate: u32,
    frame: u64,
    next_id: SourceId,
    sources: Vec<MixSource>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frame: 0,
            next_id: 1,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn add(&mut self, spec: SourceSpec) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        self.sources.push(MixSource { id, spec });
        id
    }

    pub fn stop_at(&mut self, id: SourceId, at: f64) {
        if let Some(source) = self.sources.iter_mut().find(|s| s.id == id) {
            let stop = source.spec.stop_at.map_or(at, |s| s.min(at));
            source.spec.stop_at = Some(stop);
        }
    }

    pub fn is_active(&self, id: SourceId) -> bool {
        self.sources.iter().any(|s| s.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.sources.len()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Render `out.len() / channels` frames into `out` and advance the clock
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        out.iter_mut().for_each(|s| *s = 0.0);
        let frames = out.len() / channels;
        let base = self.current_time();
        let rate = self.sample_rate as f64;

        for source in &self.sources {
            let gain = source
                .spec
                .gain
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                let t = base + i as f64 / rate;
                if t < source.spec.start_at || source.spec.stop_at.is_some_and(|s| t >= s) {
                    continue;
                }
                let Some((left, right)) = source.sample_at(t) else {
                    break;
                };
                let g = gain.value_at(t);
                frame[0] += left * g;
                if channels > 1 {
                    frame[1] += right * g;
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frame += frames as u64;
        let now = self.current_time();
        let before = self.sources.len();
        self.sources.retain(|s| !s.finished_by(now));
        if self.sources.len() != before {
            debug!("Released {} finished sources", before - self.sources.len());
        }
    }
}

/// Mixer shared between the control side and the render side
#[derive(Clone)]
pub struct SharedMixer(Arc<Mutex<Mixer>>);

impl SharedMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self(Arc::new(Mutex::new(Mixer::new(sample_rate))))
    }

    pub fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Output for hosts without any sound capability
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn is_supported(&self) -> bool {
        false
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn start_source(&self, _spec: SourceSpec) -> Result<SourceId> {
        Err(Error::AudioUnsupported("no audio output".to_string()))
    }

    fn stop_source_at(&self, _id: SourceId, _at: f64) {}

    fn is_active(&self, _id: SourceId) -> bool {
        false
    }

    fn active_sources(&self) -> usize {
        0
    }

    fn release(&self) {}
}

/// Output rendered on demand instead of by a device
///
/// Time only moves when `advance` is called, which makes envelopes and
/// deferred stops observable at exact instants. Also usable headless.
#[derive(Clone)]
pub struct VirtualOutput {
    mixer: SharedMixer,
}

impl VirtualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mixer: SharedMixer::new(sample_rate),
        }
    }

    /// Render `secs` of stereo audio and return it
    pub fn advance(&self, secs: f64) -> Vec<f32> {
        let mut mixer = self.mixer.lock();
        let frames = (secs * mixer.sample_rate() as f64).round() as usize;
        let mut out = vec![0.0; frames * 2];
        mixer.fill(&mut out, 2);
        out
    }
}

impl AudioOutput for VirtualOutput {
    fn is_supported(&self) -> bool {
        true
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn start_source(&self, spec: SourceSpec) -> Result<SourceId> {
        Ok(self.mixer.lock().add(spec))
    }

    fn stop_source_at(&self, id: SourceId, at: f64) {
        self.mixer.lock().stop_at(id, at);
    }

    fn is_active(&self, id: SourceId) -> bool {
        self.mixer.lock().is_active(id)
    }

    fn active_sources(&self) -> usize {
        self.mixer.lock().active_count()
    }

    fn release(&self) {
        self.mixer.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::gain::GainParam;
    use crate::audio::types::TrackBuffer;

    fn constant_track(value: f32, frames: usize, rate: u32) -> Arc<TrackBuffer> {
        Arc::new(TrackBuffer::from_interleaved(vec![value; frames * 2], rate, 2))
    }

    #[test]
    fn test_track_scaled_by_gain() {
        let output = VirtualOutput::new(100);
        output
            .start_source(SourceSpec {
                kind: SourceKind::Track {
                    buffer: constant_track(0.5, 1000, 100),
                    offset: 0.0,
                },
                gain: GainParam::shared(0.5),
                start_at: 0.0,
                stop_at: None,
            })
            .unwrap();

        let rendered = output.advance(1.0);
        assert_eq!(rendered.len(), 200);
        assert!(rendered.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_deferred_stop_releases_source() {
        let output = VirtualOutput::new(100);
        let id = output
            .start_source(SourceSpec {
                kind: SourceKind::Sine { frequency: 440.0 },
                gain: GainParam::shared(1.0),
                start_at: 0.0,
                stop_at: None,
            })
            .unwrap();
        output.stop_source_at(id, 1.0);

        output.advance(0.5);
        assert!(output.is_active(id));
        output.advance(0.5);
        assert!(!output.is_active(id));
        assert_eq!(output.active_sources(), 0);
    }

    #[test]
    fn test_track_released_when_exhausted() {
        let output = VirtualOutput::new(100);
        let id = output
            .start_source(SourceSpec {
                kind: SourceKind::Track {
                    buffer: constant_track(0.1, 50, 100),
                    offset: 0.0,
                },
                gain: GainParam::shared(1.0),
                start_at: 0.0,
                stop_at: None,
            })
            .unwrap();

        let rendered = output.advance(1.0);
        assert!(!output.is_active(id));
        assert!((rendered[98] - 0.1).abs() < 1e-6);
        assert_eq!(rendered[100], 0.0);
    }

    #[test]
    fn test_future_start_is_silent_until_due() {
        let output = VirtualOutput::new(10);
        output
            .start_source(SourceSpec {
                kind: SourceKind::Track {
                    buffer: constant_track(0.2, 100, 10),
                    offset: 0.0,
                },
                gain: GainParam::shared(1.0),
                start_at: 0.5,
                stop_at: None,
            })
            .unwrap();
        let rendered = output.advance(1.0);
        assert_eq!(rendered[0], 0.0);
        assert!((rendered[10] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_release_drops_everything() {
        let output = VirtualOutput::new(100);
        for f in [220.0, 330.0] {
            output
                .start_source(SourceSpec {
                    kind: SourceKind::Sine { frequency: f },
                    gain: GainParam::shared(1.0),
                    start_at: 0.0,
                    stop_at: None,
                })
                .unwrap();
        }
        assert_eq!(output.active_sources(), 2);
        output.release();
        assert_eq!(output.active_sources(), 0);
    }

    #[test]
    fn test_null_output_is_unsupported() {
        let output = NullOutput;
        assert!(!output.is_supported());
        let result = output.start_source(SourceSpec {
            kind: SourceKind::Sine { frequency: 440.0 },
            gain: GainParam::shared(1.0),
            start_at: 0.0,
            stop_at: None,
        });
        assert!(matches!(result, Err(Error::AudioUnsupported(_))));
    }
}
