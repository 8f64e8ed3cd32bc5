//! Domain models shared across Mindwell crates

mod script;
mod session;

pub use script::{CueType, Instruction, Script};
pub use session::{DeviceInfo, Session, SessionPatch};
