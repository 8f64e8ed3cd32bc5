//! Guided meditation scripts and their timestamped instructions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of prompt shown or narrated during a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueType {
    Guidance,
    Breathing,
    Visualization,
}

impl std::fmt::Display for CueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CueType::Guidance => write!(f, "guidance"),
            CueType::Breathing => write!(f, "breathing"),
            CueType::Visualization => write!(f, "visualization"),
        }
    }
}

/// Timestamped cue within a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Offset from session start in seconds
    pub timestamp: u32,
    pub text: String,
    #[serde(rename = "type", alias = "cueType")]
    pub cue_type: CueType,
}

impl Instruction {
    pub fn new(timestamp: u32, text: impl Into<String>, cue_type: CueType) -> Self {
        Self {
            timestamp,
            text: text.into(),
            cue_type,
        }
    }
}

/// Fixed-duration guided script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Target duration in seconds
    pub duration: u32,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default, alias = "audio_url")]
    pub audio_url: Option<String>,
}

impl Script {
    /// Sort instructions by timestamp and check bounds
    ///
    /// The sort is stable so instructions sharing a timestamp keep file order.
    pub fn normalized(mut self) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("script id must not be empty".to_string()));
        }
        if self.duration == 0 {
            return Err(Error::Validation(format!(
                "script {}: duration must be positive",
                self.id
            )));
        }
        self.instructions.sort_by_key(|i| i.timestamp);
        if let Some(late) = self.instructions.iter().find(|i| i.timestamp > self.duration) {
            return Err(Error::Validation(format!(
                "script {}: instruction at {}s beyond duration {}s",
                self.id, late.timestamp, self.duration
            )));
        }
        Ok(self)
    }

    /// Whether a narrated guidance track accompanies the script
    pub fn has_audio(&self) -> bool {
        self.audio_url
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }
}
