//! Cloud history database

pub mod init;

pub use init::*;
