//! Session state machine
//!
//! `SessionController` owns the clock, the audio engine and the instruction
//! scheduler for one guided session at a time:
//!
//! ```text
//! Idle ──start──▶ Active ⇄ Paused
//!                   │        │
//!                   ├──stop──┴──▶ Stopped
//!                   └─elapsed ≥ duration─▶ Completed
//! ```
//!
//! The controller is synchronous and never sleeps. Something else (the
//! runner, or a test) calls `tick()` on an interval and drives track loads.
//! Audio failures never fail a transition; they only show up in the audio
//! status.

use crate::audio::{AudioEngine, TrackBuffer, TrackLoader};
use crate::clock::{SessionClock, TimeSource};
use crate::scheduler::{CueEvent, InstructionScheduler};
use mwl_common::config::EngineSettings;
use mwl_common::events::{AudioStatus, EventBus, MwlEvent, SessionPhase};
use mwl_common::{time, Error, Instruction, Result, Script, Session};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable state for a UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub script_id: Option<String>,
    pub phase: SessionPhase,
    pub elapsed: u32,
    pub duration: u32,
    pub remaining: u32,
    /// Session progress in `[0, 1]`
    pub progress: f64,
    /// Progress through the current cue segment in `[0, 1]`
    pub cue_progress: f64,
    pub current_instruction: Option<Instruction>,
    pub audio: AudioStatus,
    /// Finished sessions whose save failed and awaits a retry
    pub pending_saves: usize,
}

pub struct SessionController {
    settings: EngineSettings,
    clock: SessionClock,
    audio: AudioEngine,
    scheduler: Option<InstructionScheduler>,
    phase: SessionPhase,
    session: Option<Session>,
    script: Option<Script>,
    events: Arc<EventBus>,
    pending_load: Option<String>,
    last_audio: AudioStatus,
}

impl SessionController {
    pub fn new(
        settings: EngineSettings,
        audio: AudioEngine,
        time_source: Arc<dyn TimeSource>,
        events: Arc<EventBus>,
    ) -> Self {
        let last_audio = audio.status();
        Self {
            settings,
            clock: SessionClock::new(time_source),
            audio,
            scheduler: None,
            phase: SessionPhase::Idle,
            session: None,
            script: None,
            events,
            pending_load: None,
            last_audio,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Current or most recently finished session
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn elapsed(&self) -> u32 {
        self.clock.elapsed()
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            action,
            phase: self.phase.to_string(),
        }
    }

    fn session_id(&self) -> Uuid {
        self.session.as_ref().map(|s| s.id).unwrap_or(Uuid::nil())
    }

    fn duration(&self) -> u32 {
        self.script.as_ref().map(|s| s.duration).unwrap_or(0)
    }

    fn audio_wanted(&self) -> bool {
        self.settings.audio_enabled && self.audio.is_supported()
    }

    fn set_phase(&mut self, new_phase: SessionPhase) {
        let old_phase = self.phase;
        self.phase = new_phase;
        info!(
            "Session {} phase: {} -> {}",
            self.session_id(),
            old_phase,
            new_phase
        );
        self.events.emit_lossy(MwlEvent::SessionStateChanged {
            session_id: self.session_id(),
            old_phase,
            new_phase,
            timestamp: time::now(),
        });
    }

    /// Emit an audio status event when anything but the position changed
    fn publish_audio(&mut self) {
        let status = self.audio.status();
        let moved = AudioStatus {
            current_time: self.last_audio.current_time,
            ..status.clone()
        };
        if moved != self.last_audio {
            self.events.emit_lossy(MwlEvent::AudioStatusChanged {
                status: status.clone(),
                timestamp: time::now(),
            });
        }
        self.last_audio = status;
    }

    fn publish_cues(&self, cues: Vec<CueEvent>) {
        let session_id = self.session_id();
        let at = self.clock.elapsed();
        for cue in cues {
            let event = match cue {
                CueEvent::Fired { index, instruction } => MwlEvent::CueFired {
                    session_id,
                    index,
                    at,
                    text: instruction.text,
                    cue_type: instruction.cue_type,
                    timestamp: time::now(),
                },
                CueEvent::Cleared { index } => MwlEvent::CueCleared {
                    session_id,
                    index,
                    timestamp: time::now(),
                },
            };
            self.events.emit_lossy(event);
        }
    }

    /// Begin a new session for `script`
    ///
    /// Accepted from Idle, Stopped and Completed. If the script carries a
    /// guidance track that still has to be fetched, the URL is left for
    /// `take_pending_load`.
    pub fn start(&mut self, script: Script) -> Result<Uuid> {
        if !self.phase.can_start() {
            return Err(self.invalid("start"));
        }
        let script = script.normalized()?;

        self.audio.stop(0.0);
        self.audio.rewind();
        self.pending_load = None;

        let session = Session::begin(script.id.clone(), time::now());
        let session_id = session.id;
        self.clock.arm();
        self.scheduler = Some(
            InstructionScheduler::new(script.instructions.clone(), script.duration)
                .with_display_secs(self.settings.cue_display_secs),
        );
        self.session = Some(session);

        self.events.emit_lossy(MwlEvent::SessionStarted {
            session_id,
            script_id: script.id.clone(),
            duration: script.duration,
            timestamp: time::now(),
        });
        let audio_url = script.audio_url.clone().filter(|_| script.has_audio());
        self.script = Some(script);
        self.set_phase(SessionPhase::Active);

        if let Some(cues) = self.scheduler.as_mut().map(|s| s.start()) {
            self.publish_cues(cues);
        }

        if let Some(url) = audio_url.filter(|_| self.audio_wanted()) {
            if self.audio.begin_load(&url) {
                self.pending_load = Some(url);
            } else {
                self.audio.play(self.settings.fade_in_secs);
            }
        }
        self.publish_audio();

        Ok(session_id)
    }

    /// Track fetch the caller should run for the active session
    pub fn take_pending_load(&mut self) -> Option<(String, Arc<dyn TrackLoader>)> {
        self.pending_load
            .take()
            .map(|url| (url, self.audio.loader()))
    }

    /// Deliver a finished track fetch; starts playback if still Active
    pub fn on_audio_loaded(&mut self, url: &str, result: Result<TrackBuffer>) {
        self.audio.finish_load(url, result);
        if self.phase == SessionPhase::Active && self.audio_wanted() && !self.audio.is_playing() {
            self.audio.play(self.settings.fade_in_secs);
        }
        self.publish_audio();
    }

    /// Load the track in place, then continue as `on_audio_loaded`
    pub async fn load_pending(&mut self) {
        if let Some((url, loader)) = self.take_pending_load() {
            let result = loader.load(&url).await;
            self.on_audio_loaded(&url, result);
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Active {
            return Err(self.invalid("pause"));
        }
        let elapsed = self.clock.pause();
        self.audio.stop(self.settings.fade_out_secs);
        debug!("Paused at {}s", elapsed);
        self.set_phase(SessionPhase::Paused);
        self.publish_audio();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Paused {
            return Err(self.invalid("resume"));
        }
        let elapsed = self.clock.resume();
        if self.audio_wanted() && self.audio.is_ready() {
            self.audio.play(self.settings.fade_in_secs);
        }
        debug!("Resumed at {}s", elapsed);
        self.set_phase(SessionPhase::Active);
        self.publish_audio();
        Ok(())
    }

    /// End the session early
    ///
    /// A session whose elapsed already reached the duration completes
    /// instead, so a late stop never records a finished sit as incomplete.
    pub fn stop(&mut self) -> Result<Session> {
        if !self.phase.is_running() {
            return Err(self.invalid("stop"));
        }
        let elapsed = self.clock.tick();
        if elapsed >= self.duration() {
            return self.complete_session();
        }

        let session = self.finalize(elapsed)?;
        // A stopped session shows no progress; a completed one keeps its
        // final elapsed time.
        self.clock.reset();
        self.audio.stop(self.settings.fade_out_secs);
        self.audio.rewind();
        self.pending_load = None;

        info!(
            "Session {} stopped after {}s of {}s",
            session.id,
            elapsed,
            self.duration()
        );
        self.events.emit_lossy(MwlEvent::SessionStopped {
            session: session.clone(),
            timestamp: time::now(),
        });
        self.set_phase(SessionPhase::Stopped);
        self.publish_audio();
        Ok(session)
    }

    /// Finish a session whose elapsed time reached the duration
    pub fn complete_session(&mut self) -> Result<Session> {
        if !self.phase.is_running() {
            return Err(self.invalid("complete"));
        }
        let elapsed = self.clock.tick();
        if elapsed < self.duration() {
            return Err(self.invalid("complete"));
        }

        let session = self.finalize(elapsed)?;
        self.audio.stop(self.settings.fade_out_secs);
        self.audio.rewind();
        self.pending_load = None;

        if self.settings.chime_enabled && self.audio_wanted() {
            match self.audio.play_chime() {
                Ok(()) => self.events.emit_lossy(MwlEvent::ChimePlayed {
                    session_id: session.id,
                    timestamp: time::now(),
                }),
                Err(e) => warn!("Completion chime failed: {}", e),
            }
        }

        info!("Session {} completed after {}s", session.id, elapsed);
        self.events.emit_lossy(MwlEvent::SessionCompleted {
            session: session.clone(),
            timestamp: time::now(),
        });
        self.set_phase(SessionPhase::Completed);
        self.publish_audio();
        Ok(session)
    }

    fn finalize(&mut self, elapsed: u32) -> Result<Session> {
        let duration = self.duration();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("running phase without a session".to_string()))?;
        session.finalize(time::now(), elapsed, duration)?;
        let session = session.clone();

        self.clock.disarm();
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.reset();
        }
        Ok(session)
    }

    /// Advance one tick
    ///
    /// Returns the finished session when this tick reached the duration.
    pub fn tick(&mut self) -> Result<Option<Session>> {
        if self.phase != SessionPhase::Active {
            return Ok(None);
        }
        let elapsed = self.clock.tick();
        let narrated = self.audio.is_playing();
        if let Some(cues) = self.scheduler.as_mut().map(|s| s.advance(elapsed, narrated)) {
            self.publish_cues(cues);
        }

        let duration = self.duration();
        if elapsed >= duration {
            return self.complete_session().map(Some);
        }

        self.events.emit_lossy(MwlEvent::SessionProgress {
            session_id: self.session_id(),
            elapsed,
            remaining: duration - elapsed,
            progress: elapsed as f64 / duration as f64,
            timestamp: time::now(),
        });
        self.publish_audio();
        Ok(None)
    }

    /// Host visibility change
    ///
    /// Becoming visible re-checks completion at once instead of waiting for
    /// the next tick.
    pub fn on_visibility(&mut self, visible: bool) -> Result<Option<Session>> {
        if !self.phase.is_running() {
            return Ok(None);
        }
        if !visible {
            let elapsed = self.clock.on_hidden();
            debug!("Hidden at {}s", elapsed);
            return Ok(None);
        }
        let elapsed = self.clock.on_visible();
        debug!("Visible at {}s", elapsed);
        self.tick()
    }

    pub fn set_volume(&mut self, volume: f32) -> AudioStatus {
        self.audio.set_volume(volume);
        self.publish_audio();
        self.audio.status()
    }

    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.audio.toggle_mute();
        self.publish_audio();
        muted
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let duration = self.duration();
        let elapsed = self.clock.elapsed();
        let progress = if duration == 0 {
            0.0
        } else {
            (elapsed as f64 / duration as f64).clamp(0.0, 1.0)
        };
        let scheduler = self.scheduler.as_ref().filter(|_| self.phase.is_running());
        SessionSnapshot {
            session_id: self.session.as_ref().map(|s| s.id),
            script_id: self.script.as_ref().map(|s| s.id.clone()),
            phase: self.phase,
            elapsed,
            duration,
            remaining: duration.saturating_sub(elapsed),
            progress,
            cue_progress: scheduler
                .map(|s| s.progress(self.clock.elapsed_precise()))
                .unwrap_or(0.0),
            current_instruction: scheduler.and_then(|s| s.current().cloned()),
            audio: self.audio.status(),
            pending_saves: 0,
        }
    }

    /// Tear down audio and forget the session clock
    pub fn release(&mut self) {
        self.audio.release();
        self.clock.disarm();
        self.pending_load = None;
        debug!("Session controller released");
    }
}
