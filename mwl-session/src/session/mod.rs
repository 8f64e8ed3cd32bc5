//! Session lifecycle: the state machine and the task that drives it

pub mod machine;
pub mod runner;

pub use machine::{SessionController, SessionSnapshot};
pub use runner::{SessionHandle, SessionRunner};
