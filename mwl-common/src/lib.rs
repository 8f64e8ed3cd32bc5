//! # Mindwell Common Library
//!
//! Shared code for the Mindwell session engine crates:
//! - Session and script models
//! - Event types (MwlEvent enum) and the EventBus
//! - Error type shared by the history store and the session engine
//! - Configuration loading and root folder resolution
//! - Gain ramp shapes used by audio fades and the completion chime
//! - Time helpers (local calendar days, ISO-8601)

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use fade_curves::RampShape;
pub use models::{CueType, DeviceInfo, Instruction, Script, Session, SessionPatch};
