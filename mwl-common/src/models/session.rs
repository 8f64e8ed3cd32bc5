//! Meditation session record
//!
//! A `Session` is minted at `start()`, finalized exactly once when the session
//! is stopped or completes, and afterwards only its rating and notes change.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device that recorded a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub arch: String,
    pub app_version: String,
}

impl DeviceInfo {
    /// Describe the current process
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// A single guided session as persisted in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Client-generated, globally unique
    pub id: Uuid,
    pub script_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
    /// Elapsed active seconds at finalization
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

impl Session {
    /// Mint a fresh, unfinalized session
    pub fn begin(script_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            script_id: script_id.into(),
            start_time,
            end_time: None,
            completed: false,
            duration: 0,
            rating: None,
            notes: None,
            device_info: DeviceInfo::current(),
        }
    }

    /// Whether `finalize` has already run
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Close the session with the measured elapsed time
    ///
    /// `completed` is derived here, never passed in: a session counts as
    /// completed only when elapsed reached the script duration.
    pub fn finalize(
        &mut self,
        end_time: DateTime<Utc>,
        elapsed_secs: u32,
        script_duration: u32,
    ) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::Internal(format!(
                "session {} already finalized",
                self.id
            )));
        }
        self.end_time = Some(end_time);
        self.duration = elapsed_secs;
        self.completed = elapsed_secs >= script_duration;
        Ok(())
    }

    /// Check the record is internally consistent
    ///
    /// Used on import; any failure rejects the whole payload.
    pub fn validate(&self) -> Result<()> {
        if self.script_id.trim().is_empty() {
            return Err(Error::Validation(format!("session {}: empty scriptId", self.id)));
        }
        if let Some(rating) = self.rating {
            validate_rating(rating)
                .map_err(|e| Error::Validation(format!("session {}: {}", self.id, e)))?;
        }
        match self.end_time {
            Some(end) if end < self.start_time => Err(Error::Validation(format!(
                "session {}: endTime precedes startTime",
                self.id
            ))),
            None if self.completed => Err(Error::Validation(format!(
                "session {}: completed without endTime",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

fn validate_rating(rating: u8) -> Result<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(Error::Validation(format!("rating {} outside 1-5", rating)))
    }
}

/// Partial update applied to an existing history record
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<u32>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self == &SessionPatch::default()
    }

    pub fn validate(&self) -> Result<()> {
        match self.rating {
            Some(rating) => validate_rating(rating),
            None => Ok(()),
        }
    }

    /// Apply the set fields onto `session`
    ///
    /// The patched record must still pass `Session::validate`; otherwise
    /// `session` is left untouched.
    pub fn apply(&self, session: &mut Session) -> Result<()> {
        self.validate()?;
        let mut patched = session.clone();
        if let Some(rating) = self.rating {
            patched.rating = Some(rating);
        }
        if let Some(notes) = &self.notes {
            patched.notes = Some(notes.clone());
        }
        if let Some(completed) = self.completed {
            patched.completed = completed;
        }
        if let Some(end_time) = self.end_time {
            patched.end_time = Some(end_time);
        }
        if let Some(duration) = self.duration {
            patched.duration = duration;
        }
        patched.validate()?;
        *session = patched;
        Ok(())
    }
}
