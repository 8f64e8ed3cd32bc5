//! Completion chime
//!
//! A C major arpeggio (C5, E5, G5) synthesized from sine sources, so the end
//! of a session always has audio feedback without any network asset. Notes
//! are staggered so they overlap; each has its own envelope and a stop time
//! at the end of its decay, after which the output drops it.

use super::gain::GainParam;
use super::output::AudioOutput;
use super::types::{SourceId, SourceKind, SourceSpec};
use mwl_common::fade_curves::EXPONENTIAL_FLOOR;
use mwl_common::Result;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// C5, E5, G5
pub const CHIME_NOTES_HZ: [f32; 3] = [523.25, 659.25, 783.99];

#[derive(Debug, Clone, PartialEq)]
pub struct ChimeSettings {
    /// Delay between note onsets (seconds)
    pub stagger: f64,
    pub attack: f64,
    /// Decay length after the attack peak (seconds)
    pub decay: f64,
    pub peak: f32,
}

impl Default for ChimeSettings {
    fn default() -> Self {
        Self {
            stagger: 0.3,
            attack: 0.02,
            decay: 1.5,
            peak: 0.3,
        }
    }
}

impl ChimeSettings {
    /// Output time after `start` by which every note has stopped
    pub fn ends_at(&self, start: f64) -> f64 {
        start + self.stagger * (CHIME_NOTES_HZ.len() - 1) as f64 + self.attack + self.decay
    }
}

/// Schedule the arpeggio on `output`, starting now
///
/// Returns the ids of the started note sources.
pub fn play_chime(output: &dyn AudioOutput, settings: &ChimeSettings) -> Result<Vec<SourceId>> {
    let now = output.current_time();
    let mut ids = Vec::with_capacity(CHIME_NOTES_HZ.len());

    for (i, frequency) in CHIME_NOTES_HZ.iter().enumerate() {
        let start = now + settings.stagger * i as f64;
        let peak_at = start + settings.attack;
        let stop_at = peak_at + settings.decay;

        let mut gain = GainParam::new(0.0);
        gain.set_value_at(0.0, start);
        gain.linear_ramp_to(settings.peak, start, peak_at);
        gain.exponential_ramp_to(EXPONENTIAL_FLOOR, peak_at, stop_at);

        ids.push(output.start_source(SourceSpec {
            kind: SourceKind::Sine {
                frequency: *frequency,
            },
            gain: Arc::new(Mutex::new(gain)),
            start_at: start,
            stop_at: Some(stop_at),
        })?);
    }

    debug!("Chime scheduled at output time {:.3}", now);
    Ok(ids)
}
