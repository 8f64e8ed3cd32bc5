//! Session runner
//!
//! One tokio task owns the `SessionController` and serializes everything
//! that touches it: commands from handles, the tick interval, and finished
//! track loads. The interval only exists while a session is Active, so a
//! paused or finished session costs nothing.
//!
//! Finished sessions are handed to the history store in the background. A
//! failed save is logged, announced as `SessionPersistFailed` and kept in
//! the pending list until `retry_pending` succeeds.

use super::machine::{SessionController, SessionSnapshot};
use crate::audio::TrackBuffer;
use crate::catalog::ScriptCatalog;
use mwl_common::events::{AudioStatus, EventBus, MwlEvent, SessionPhase};
use mwl_common::{time, Error, Result, Session};
use mwl_history::HistoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMMAND_QUEUE_DEPTH: usize = 32;

enum SessionCommand {
    Start {
        script_id: String,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Pause {
        reply: oneshot::Sender<Result<()>>,
    },
    Resume {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<Session>>,
    },
    Visibility {
        visible: bool,
        reply: oneshot::Sender<Result<SessionSnapshot>>,
    },
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<AudioStatus>,
    },
    ToggleMute {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    RetryPending {
        reply: oneshot::Sender<Result<usize>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Sessions whose save failed, oldest first
type PendingSessions = Arc<Mutex<Vec<Session>>>;

/// Cloneable front end to a running `SessionRunner`
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    pending: PendingSessions,
}

pub struct SessionRunner {
    controller: SessionController,
    catalog: Arc<dyn ScriptCatalog>,
    history: Option<Arc<HistoryStore>>,
    events: Arc<EventBus>,
    pending: PendingSessions,
    tick_period: Duration,
    commands: mpsc::Receiver<SessionCommand>,
    loads_tx: mpsc::UnboundedSender<(String, Result<TrackBuffer>)>,
    loads_rx: mpsc::UnboundedReceiver<(String, Result<TrackBuffer>)>,
    saves: Vec<JoinHandle<()>>,
}

impl SessionRunner {
    /// Start the runner task
    ///
    /// Without a history store finished sessions are only announced on the
    /// event bus.
    pub fn spawn(
        controller: SessionController,
        catalog: Arc<dyn ScriptCatalog>,
        history: Option<Arc<HistoryStore>>,
        events: Arc<EventBus>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        let pending: PendingSessions = Arc::new(Mutex::new(Vec::new()));
        let tick_period = Duration::from_millis(controller.settings().tick_interval_ms.max(1));

        let runner = Self {
            controller,
            catalog,
            history,
            events,
            pending: pending.clone(),
            tick_period,
            commands,
            loads_tx,
            loads_rx,
            saves: Vec::new(),
        };
        let task = tokio::spawn(runner.run());
        (SessionHandle { tx, pending }, task)
    }

    async fn run(mut self) {
        info!("Session runner started");
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown { reply }) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return;
                        }
                        Some(command) => self.handle(command).await,
                        None => {
                            debug!("All session handles dropped");
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                Some((url, result)) = self.loads_rx.recv() => {
                    self.controller.on_audio_loaded(&url, result);
                }
                _ = next_tick(&mut ticker) => {
                    let finished = self.controller.tick();
                    self.finish(finished);
                }
            }

            self.sync_ticker(&mut ticker);
        }
    }

    /// Keep an interval only while Active
    fn sync_ticker(&self, ticker: &mut Option<Interval>) {
        let active = self.controller.phase() == SessionPhase::Active;
        match (active, ticker.is_some()) {
            (true, false) => {
                let mut interval = interval_at(Instant::now() + self.tick_period, self.tick_period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                *ticker = Some(interval);
                debug!("Tick interval armed");
            }
            (false, true) => {
                *ticker = None;
                debug!("Tick interval cleared");
            }
            _ => {}
        }
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { script_id, reply } => {
                let result = self.start(&script_id);
                let _ = reply.send(result);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.controller.pause());
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.controller.resume());
            }
            SessionCommand::Stop { reply } => {
                let result = self.controller.stop();
                if let Ok(session) = &result {
                    self.persist(session.clone());
                }
                let _ = reply.send(result);
            }
            SessionCommand::Visibility { visible, reply } => {
                let result = match self.controller.on_visibility(visible) {
                    Ok(finished) => {
                        if let Some(session) = finished {
                            self.persist(session);
                        }
                        Ok(self.snapshot().await)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            SessionCommand::SetVolume { volume, reply } => {
                let _ = reply.send(self.controller.set_volume(volume));
            }
            SessionCommand::ToggleMute { reply } => {
                let _ = reply.send(self.controller.toggle_mute());
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot().await);
            }
            SessionCommand::RetryPending { reply } => {
                let result = self.retry_pending().await;
                let _ = reply.send(result);
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    async fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.controller.snapshot();
        snapshot.pending_saves = self.pending.lock().await.len();
        snapshot
    }

    fn start(&mut self, script_id: &str) -> Result<Uuid> {
        let script = self.catalog.get_script(script_id)?;
        let id = self.controller.start(script)?;

        if let Some((url, loader)) = self.controller.take_pending_load() {
            let tx = self.loads_tx.clone();
            tokio::spawn(async move {
                let result = loader.load(&url).await;
                let _ = tx.send((url, result));
            });
        }
        Ok(id)
    }

    /// Persist a session finished by a tick or visibility change
    fn finish(&mut self, finished: Result<Option<Session>>) {
        match finished {
            Ok(Some(session)) => self.persist(session),
            Ok(None) => {}
            Err(e) => error!("Session tick failed: {}", e),
        }
    }

    fn persist(&mut self, session: Session) {
        self.saves.retain(|h| !h.is_finished());
        let Some(history) = self.history.clone() else {
            debug!("No history store; session {} not persisted", session.id);
            return;
        };
        let events = self.events.clone();
        let pending = self.pending.clone();
        self.saves.push(tokio::spawn(async move {
            if let Err(e) = history.save(&session).await {
                error!("Failed to save session {}: {}", session.id, e);
                let session_id = session.id;
                pending.lock().await.push(session);
                events.emit_lossy(MwlEvent::SessionPersistFailed {
                    session_id,
                    error: e.to_string(),
                    timestamp: time::now(),
                });
            }
        }));
    }

    /// Save every pending session again; failures stay pending
    async fn retry_pending(&mut self) -> Result<usize> {
        let history = self
            .history
            .clone()
            .ok_or_else(|| Error::Config("no history store configured".to_string()))?;

        let sessions: Vec<Session> = std::mem::take(&mut *self.pending.lock().await);
        let mut saved = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for session in sessions {
            match history.save(&session).await {
                Ok(_) => saved += 1,
                Err(e) => {
                    warn!("Retry of session {} failed: {}", session.id, e);
                    last_error = Some(e);
                    failed.push(session);
                }
            }
        }
        if !failed.is_empty() {
            self.pending.lock().await.extend(failed);
        }
        info!("Retried pending sessions: {} saved", saved);
        match last_error {
            Some(e) if saved == 0 => Err(e),
            _ => Ok(saved),
        }
    }

    async fn shutdown(&mut self) {
        self.controller.release();
        for save in self.saves.drain(..) {
            let _ = save.await;
        }
        info!("Session runner stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| Error::Internal("session runner stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("session runner dropped the request".to_string()))
    }

    pub async fn start(&self, script_id: impl Into<String>) -> Result<Uuid> {
        let script_id = script_id.into();
        self.request(|reply| SessionCommand::Start { script_id, reply })
            .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Resume { reply }).await?
    }

    pub async fn stop(&self) -> Result<Session> {
        self.request(|reply| SessionCommand::Stop { reply }).await?
    }

    pub async fn set_visibility(&self, visible: bool) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Visibility { visible, reply })
            .await?
    }

    pub async fn set_volume(&self, volume: f32) -> Result<AudioStatus> {
        self.request(|reply| SessionCommand::SetVolume { volume, reply })
            .await
    }

    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleMute { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Retry sessions whose save failed; returns how many were saved
    pub async fn retry_pending(&self) -> Result<usize> {
        self.request(|reply| SessionCommand::RetryPending { reply })
            .await?
    }

    /// Sessions waiting for a successful save
    pub async fn pending_sessions(&self) -> Vec<Session> {
        self.pending.lock().await.clone()
    }

    /// Stop ticking, release audio and wait for in-flight saves
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }
}
