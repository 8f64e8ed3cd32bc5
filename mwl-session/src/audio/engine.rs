//! Guidance track engine
//!
//! Owns one output and at most one playing track source. Playback starts
//! with an optional linear fade-in toward the target volume and stops with a
//! fade-out whose source is halted only when the ramp has finished, so the
//! fade is always heard in full.
//!
//! No method here returns an audio error to a caller that has to handle it:
//! every failure is recorded in `AudioStatus::error` and playback degrades to
//! silence while the session carries on.

use super::chime::{self, ChimeSettings};
use super::gain::{GainParam, SharedGain};
use super::loader::TrackLoader;
use super::output::AudioOutput;
use super::types::{SourceId, SourceKind, SourceSpec, TrackBuffer};
use mwl_common::events::AudioStatus;
use mwl_common::{Error, Result};
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

struct ActiveSource {
    id: SourceId,
    gain: SharedGain,
    /// Output time the source started
    started_at: f64,
    /// Track position at `started_at`
    offset: f64,
    /// Fade-out scheduled; the output drops it at the stop time
    stopping: bool,
}

pub struct AudioEngine {
    output: Arc<dyn AudioOutput>,
    loader: Arc<dyn TrackLoader>,
    chime: ChimeSettings,
    track: Option<Arc<TrackBuffer>>,
    track_url: Option<String>,
    source: Option<ActiveSource>,
    volume: f32,
    muted: bool,
    loading: bool,
    error: Option<String>,
    /// Track position the next `play` starts from
    resume_position: f64,
}

impl AudioEngine {
    pub fn new(output: Arc<dyn AudioOutput>, loader: Arc<dyn TrackLoader>, volume: f32) -> Self {
        if !output.is_supported() {
            info!("No audio output available; sessions run visual-only");
        }
        Self {
            output,
            loader,
            chime: ChimeSettings::default(),
            track: None,
            track_url: None,
            source: None,
            volume: volume.clamp(0.0, 1.0),
            muted: false,
            loading: false,
            error: None,
            resume_position: 0.0,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.output.is_supported()
    }

    pub fn loader(&self) -> Arc<dyn TrackLoader> {
        self.loader.clone()
    }

    /// A decoded track is ready to play
    pub fn is_ready(&self) -> bool {
        self.track.is_some()
    }

    /// Mark `url` as loading
    ///
    /// Returns false when there is nothing to fetch: audio is unsupported or
    /// the same track is already loaded or loading.
    pub fn begin_load(&mut self, url: &str) -> bool {
        if !self.is_supported() {
            return false;
        }
        if self.track_url.as_deref() == Some(url) && (self.track.is_some() || self.loading) {
            return false;
        }
        self.halt_source();
        self.track = None;
        self.track_url = Some(url.to_string());
        self.loading = true;
        self.error = None;
        self.resume_position = 0.0;
        debug!("Loading guidance track {}", url);
        true
    }

    /// Accept the result of a fetch started with `begin_load`
    ///
    /// Results for any other URL are stale and ignored.
    pub fn finish_load(&mut self, url: &str, result: Result<TrackBuffer>) {
        if self.track_url.as_deref() != Some(url) || !self.loading {
            debug!("Ignoring stale track load for {}", url);
            return;
        }
        self.loading = false;
        match result {
            Ok(buffer) => {
                self.track = Some(Arc::new(buffer));
                self.error = None;
            }
            Err(e) => {
                warn!("Guidance track unavailable, continuing without audio: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    /// Fetch and decode `url` in place
    ///
    /// The outcome is mirrored into the status either way.
    pub async fn load(&mut self, url: &str) -> Result<()> {
        if !self.is_supported() {
            return Err(Error::AudioUnsupported("no audio output".to_string()));
        }
        if !self.begin_load(url) {
            return Ok(());
        }
        let result = self.loader.load(url).await;
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::AudioLoad(e.to_string())),
        };
        self.finish_load(url, result);
        outcome
    }

    fn target_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    /// Halt any source right now, fade or not
    fn halt_source(&mut self) {
        if let Some(source) = self.source.take() {
            self.output
                .stop_source_at(source.id, self.output.current_time());
        }
    }

    fn live_source(&self) -> Option<&ActiveSource> {
        self.source
            .as_ref()
            .filter(|s| !s.stopping && self.output.is_active(s.id))
    }

    /// Start the track from the resume position
    pub fn play(&mut self, fade_in_secs: f64) {
        if !self.is_supported() {
            return;
        }
        let Some(track) = self.track.clone() else {
            return;
        };

        self.halt_source();
        if self.resume_position >= track.duration_secs() {
            self.resume_position = 0.0;
        }

        let now = self.output.current_time();
        let target = self.target_gain();
        let mut gain = GainParam::new(target);
        if fade_in_secs > 0.0 {
            gain.set_value_at(0.0, now);
            gain.linear_ramp_to(target, now, now + fade_in_secs);
        }
        let gain: SharedGain = Arc::new(std::sync::Mutex::new(gain));

        let spec = SourceSpec {
            kind: SourceKind::Track {
                buffer: track,
                offset: self.resume_position,
            },
            gain: gain.clone(),
            start_at: now,
            stop_at: None,
        };
        match self.output.start_source(spec) {
            Ok(id) => {
                debug!(
                    "Playing guidance track from {:.1}s (fade-in {:.1}s)",
                    self.resume_position, fade_in_secs
                );
                self.source = Some(ActiveSource {
                    id,
                    gain,
                    started_at: now,
                    offset: self.resume_position,
                    stopping: false,
                });
            }
            Err(e) => {
                warn!("Failed to start guidance track: {}", e);
                self.error = Some(e.to_string());
            }
        }
    }

    /// Fade out and halt once the fade has finished
    pub fn stop(&mut self, fade_out_secs: f64) {
        let now = self.output.current_time();
        let fade = fade_out_secs.max(0.0);
        let Some(source) = self.source.as_mut().filter(|s| !s.stopping) else {
            return;
        };

        let stop_at = now + fade;
        source
            .gain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .linear_ramp_to(0.0, now, stop_at);
        self.output.stop_source_at(source.id, stop_at);
        source.stopping = true;

        let resume = source.offset + (stop_at - source.started_at);
        let duration = self.track.as_ref().map(|t| t.duration_secs()).unwrap_or(0.0);
        self.resume_position = resume.min(duration);
        debug!("Stopping guidance track at output time {:.2}", stop_at);
    }

    /// Start the next `play` from the top of the track
    pub fn rewind(&mut self) {
        self.resume_position = 0.0;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.apply_gain();
    }

    /// Flip mute; the volume is kept for unmute
    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.apply_gain();
        self.muted
    }

    fn apply_gain(&mut self) {
        let target = self.target_gain();
        if let Some(source) = self.source.as_ref().filter(|s| !s.stopping) {
            let now = self.output.current_time();
            source
                .gain
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_value_at(target, now);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Track source audible and not fading out
    pub fn is_playing(&self) -> bool {
        self.live_source().is_some()
    }

    /// Gain currently applied to the track source
    pub fn current_gain(&self) -> f32 {
        // Read the output clock before taking the gain lock; the render
        // side locks the mixer first and then each source gain.
        let now = self.output.current_time();
        match &self.source {
            Some(source) if self.output.is_active(source.id) => source
                .gain
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .value_at(now),
            _ => 0.0,
        }
    }

    /// Position in the track (seconds)
    pub fn position(&self) -> f64 {
        match (self.live_source(), &self.track) {
            (Some(source), Some(track)) => {
                let elapsed = self.output.current_time() - source.started_at;
                (source.offset + elapsed).min(track.duration_secs())
            }
            _ => self.resume_position,
        }
    }

    /// Play the completion arpeggio
    pub fn play_chime(&mut self) -> Result<()> {
        if !self.is_supported() {
            return Err(Error::AudioUnsupported("no audio output".to_string()));
        }
        chime::play_chime(self.output.as_ref(), &self.chime).map(|_| ())
    }

    pub fn status(&self) -> AudioStatus {
        AudioStatus {
            supported: self.is_supported(),
            loading: self.loading,
            playing: self.is_playing(),
            muted: self.muted,
            error: self.error.clone(),
            current_time: self.position(),
            duration: self.track.as_ref().map(|t| t.duration_secs()).unwrap_or(0.0),
            volume: self.volume,
        }
    }

    /// Tear down every source on the output
    pub fn release(&mut self) {
        self.source = None;
        self.output.release();
        debug!("Audio engine released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::loader::StaticTrackLoader;
    use crate::audio::output::{NullOutput, VirtualOutput};

    const URL: &str = "https://cdn.example.com/guide.mp3";

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    /// 60 s of full-scale DC at 100 Hz, so rendered samples equal the gain
    fn engine() -> (VirtualOutput, AudioEngine) {
        let output = VirtualOutput::new(100);
        let loader = StaticTrackLoader::new()
            .with_track(URL, TrackBuffer::from_interleaved(vec![1.0; 6000], 100, 1));
        let engine = AudioEngine::new(Arc::new(output.clone()), Arc::new(loader), 0.8);
        (output, engine)
    }

    #[tokio::test]
    async fn test_fade_in_then_deferred_stop() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        assert!(engine.is_ready());

        engine.play(1.0);
        assert!(close(engine.current_gain(), 0.0));
        output.advance(0.5);
        assert!(close(engine.current_gain(), 0.4));
        output.advance(0.5);
        assert!(close(engine.current_gain(), 0.8));

        engine.stop(1.0);
        assert!(!engine.is_playing());
        output.advance(0.5);
        assert!(close(engine.current_gain(), 0.4));
        assert_eq!(output.active_sources(), 1, "still fading");

        let tail = output.advance(0.5);
        assert!(tail[2] > 0.0 && tail[2] < 0.4);
        assert_eq!(output.active_sources(), 0, "released after the window");
    }

    #[tokio::test]
    async fn test_at_most_one_source() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        engine.play(0.0);
        engine.play(0.0);
        output.advance(0.01);
        assert_eq!(output.active_sources(), 1);

        // Fading source is cut when playback restarts
        engine.stop(2.0);
        engine.play(0.0);
        output.advance(0.01);
        assert_eq!(output.active_sources(), 1);
    }

    #[tokio::test]
    async fn test_gain_reads_while_rendering() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        engine.play(30.0);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let renderer = {
            let output = output.clone();
            let done_tx = done_tx.clone();
            std::thread::spawn(move || {
                for _ in 0..5_000 {
                    output.advance(0.01);
                }
                let _ = done_tx.send("renderer");
            })
        };
        let reader = std::thread::spawn(move || {
            let last = (0..20_000).map(|_| engine.current_gain()).last();
            let _ = done_tx.send("reader");
            last.unwrap_or(0.0)
        });

        for _ in 0..2 {
            done_rx
                .recv_timeout(std::time::Duration::from_secs(10))
                .expect("render and gain reads must both make progress");
        }
        renderer.join().unwrap();
        let gain = reader.join().unwrap();
        assert!((0.0..=0.8).contains(&gain));
    }

    #[tokio::test]
    async fn test_mute_preserves_volume() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        engine.play(0.0);
        output.advance(0.1);
        assert!(close(engine.current_gain(), 0.8));

        assert!(engine.toggle_mute());
        assert!(close(engine.current_gain(), 0.0));
        engine.set_volume(0.5);
        assert!(close(engine.current_gain(), 0.0), "stays silent while muted");

        assert!(!engine.toggle_mute());
        assert!(close(engine.current_gain(), 0.5));
        assert_eq!(engine.status().volume, 0.5);
    }

    #[tokio::test]
    async fn test_resume_continues_from_stop_position() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        engine.play(0.0);
        output.advance(10.0);
        engine.stop(1.0);
        output.advance(1.0);
        assert!((engine.position() - 11.0).abs() < 0.02);

        engine.play(1.0);
        output.advance(2.0);
        assert!((engine.status().current_time - 13.0).abs() < 0.02);

        engine.stop(0.0);
        engine.rewind();
        engine.play(0.0);
        assert!(engine.position() < 0.02);
    }

    #[tokio::test]
    async fn test_load_failure_is_mirrored() {
        let (_output, mut engine) = engine();
        let result = engine.load("https://cdn.example.com/missing.mp3").await;
        assert!(matches!(result, Err(Error::AudioLoad(_))));

        let status = engine.status();
        assert!(status.error.is_some());
        assert!(!status.loading);
        assert!(!status.playing);

        // Playing without a track is a no-op
        engine.play(1.0);
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn test_stale_load_result_ignored() {
        let (_output, mut engine) = engine();
        assert!(engine.begin_load("a.mp3"));
        assert!(engine.begin_load("b.mp3"));
        engine.finish_load("a.mp3", Ok(TrackBuffer::from_interleaved(vec![0.0; 4], 2, 2)));
        assert!(!engine.is_ready());
        assert!(engine.status().loading);
    }

    #[tokio::test]
    async fn test_unsupported_engine_is_inert() {
        let mut engine = AudioEngine::new(
            Arc::new(NullOutput),
            Arc::new(StaticTrackLoader::new()),
            0.8,
        );
        assert!(matches!(
            engine.load(URL).await,
            Err(Error::AudioUnsupported(_))
        ));
        engine.play(1.0);
        engine.stop(1.0);
        engine.set_volume(0.2);
        engine.toggle_mute();
        assert!(engine.play_chime().is_err());

        let status = engine.status();
        assert!(!status.supported);
        assert!(!status.playing);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_release_drops_sources() {
        let (output, mut engine) = engine();
        engine.load(URL).await.unwrap();
        engine.play(0.0);
        engine.play_chime().unwrap();
        assert_eq!(output.active_sources(), 4);
        engine.release();
        assert_eq!(output.active_sources(), 0);
        assert!(!engine.is_playing());
    }
}
