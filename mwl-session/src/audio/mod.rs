//! Guidance audio: gain automation, outputs, track loading and the chime

pub mod chime;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod engine;
pub mod gain;
pub mod loader;
pub mod output;
pub mod types;

pub use chime::{ChimeSettings, CHIME_NOTES_HZ};
#[cfg(feature = "device-audio")]
pub use device::CpalOutput;
pub use engine::AudioEngine;
pub use gain::{GainParam, SharedGain};
pub use loader::{HttpTrackLoader, StaticTrackLoader, TrackLoader};
pub use output::{AudioOutput, Mixer, NullOutput, SharedMixer, VirtualOutput};
pub use types::{SourceId, SourceKind, SourceSpec, TrackBuffer};
