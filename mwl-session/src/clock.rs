//! Session clock and drift correction
//!
//! Elapsed time is never counted up tick by tick. Every read recomputes
//!
//! ```text
//! elapsed = floor((now - anchor - paused) / 1000)
//! ```
//!
//! from a time source, so a late, skipped or suspended tick corrects itself
//! on the next read instead of compounding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond time source
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// High-resolution monotonic source
#[derive(Debug, Clone)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Wall-clock source for targets without a monotonic clock
#[derive(Debug, Clone, Default)]
pub struct WallTimeSource;

impl TimeSource for WallTimeSource {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually driven source for tests and simulations
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Best source available on this target
pub fn default_time_source() -> Arc<dyn TimeSource> {
    if cfg!(target_family = "wasm") {
        Arc::new(WallTimeSource)
    } else {
        Arc::new(MonotonicTimeSource::new())
    }
}

/// Pause-aware elapsed-time tracker for one session
pub struct SessionClock {
    source: Arc<dyn TimeSource>,
    /// `None` until armed
    anchor_ms: Option<u64>,
    paused_at_ms: Option<u64>,
    accumulated_pause_ms: u64,
    /// Last computed value; reads never go below it
    elapsed: u32,
    hidden_snapshot: Option<u32>,
}

impl SessionClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            anchor_ms: None,
            paused_at_ms: None,
            accumulated_pause_ms: 0,
            elapsed: 0,
            hidden_snapshot: None,
        }
    }

    /// Start counting from zero at the current instant
    pub fn arm(&mut self) {
        self.anchor_ms = Some(self.source.now_ms());
        self.paused_at_ms = None;
        self.accumulated_pause_ms = 0;
        self.elapsed = 0;
        self.hidden_snapshot = None;
    }

    /// Forget the current session
    pub fn disarm(&mut self) {
        self.anchor_ms = None;
        self.paused_at_ms = None;
        self.hidden_snapshot = None;
    }

    /// Disarm and drop the last elapsed value and pause total
    pub fn reset(&mut self) {
        self.disarm();
        self.accumulated_pause_ms = 0;
        self.elapsed = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.anchor_ms.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at_ms.is_some()
    }

    /// Elapsed milliseconds spent running, before flooring
    fn running_ms(&self) -> Option<u64> {
        let anchor = self.anchor_ms?;
        let now = self.paused_at_ms.unwrap_or_else(|| self.source.now_ms());
        Some(
            now.saturating_sub(anchor)
                .saturating_sub(self.accumulated_pause_ms),
        )
    }

    /// Recompute elapsed whole seconds
    pub fn tick(&mut self) -> u32 {
        if let Some(ms) = self.running_ms() {
            let secs = (ms / 1000).min(u32::MAX as u64) as u32;
            self.elapsed = self.elapsed.max(secs);
        }
        self.elapsed
    }

    /// Last computed elapsed seconds, without reading the source
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    /// Fractional elapsed seconds, for smooth progress display
    pub fn elapsed_precise(&self) -> f64 {
        match self.running_ms() {
            Some(ms) => (ms as f64 / 1000.0).max(self.elapsed as f64),
            None => self.elapsed as f64,
        }
    }

    /// Freeze elapsed until `resume`
    pub fn pause(&mut self) -> u32 {
        if self.is_armed() && !self.is_paused() {
            self.tick();
            self.paused_at_ms = Some(self.source.now_ms());
        }
        self.elapsed
    }

    /// Continue from the frozen value
    pub fn resume(&mut self) -> u32 {
        if let Some(paused_at) = self.paused_at_ms.take() {
            let paused_for = self.source.now_ms().saturating_sub(paused_at);
            self.accumulated_pause_ms += paused_for;
        }
        self.tick()
    }

    pub fn accumulated_pause_ms(&self) -> u64 {
        self.accumulated_pause_ms
    }

    /// Snapshot elapsed before the host may suspend timers
    ///
    /// Hidden time still counts as session time.
    pub fn on_hidden(&mut self) -> u32 {
        let elapsed = self.tick();
        self.hidden_snapshot = Some(elapsed);
        elapsed
    }

    /// Recompute elapsed after the host resumes timers
    pub fn on_visible(&mut self) -> u32 {
        self.hidden_snapshot = None;
        self.tick()
    }

    /// Elapsed captured by the last `on_hidden`, while still hidden
    pub fn hidden_snapshot(&self) -> Option<u32> {
        self.hidden_snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> (ManualTimeSource, SessionClock) {
        let time = ManualTimeSource::new(1_000_000);
        let clock = SessionClock::new(Arc::new(time.clone()));
        (time, clock)
    }

    #[test]
    fn test_elapsed_is_recomputed_not_counted() {
        let (time, mut clock) = clock();
        clock.arm();

        // Ticks arrive late and irregularly
        time.advance_ms(1_300);
        assert_eq!(clock.tick(), 1);
        time.advance_ms(3_900);
        assert_eq!(clock.tick(), 5);
        time.advance_ms(999);
        assert_eq!(clock.tick(), 6);
    }

    #[test]
    fn test_pause_excludes_paused_interval() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(10);
        assert_eq!(clock.pause(), 10);

        time.advance_secs(120);
        assert_eq!(clock.tick(), 10, "frozen while paused");

        assert_eq!(clock.resume(), 10);
        time.advance_secs(5);
        assert_eq!(clock.tick(), 15);
        assert_eq!(clock.accumulated_pause_ms(), 120_000);
    }

    #[test]
    fn test_sub_second_remainder_survives_pause() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_ms(1_600);
        clock.pause();
        time.advance_ms(10_000);
        clock.resume();
        time.advance_ms(400);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn test_repeated_pause_and_resume_are_harmless() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(3);
        clock.pause();
        time.advance_secs(2);
        clock.pause();
        time.advance_secs(2);
        clock.resume();
        clock.resume();
        time.advance_secs(1);
        assert_eq!(clock.tick(), 4);
    }

    #[test]
    fn test_never_decreases_when_source_jumps_back() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(30);
        assert_eq!(clock.tick(), 30);
        time.set_ms(1_010_000);
        assert_eq!(clock.tick(), 30);
    }

    #[test]
    fn test_hidden_time_counts() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(55);
        assert_eq!(clock.on_hidden(), 55);
        assert_eq!(clock.hidden_snapshot(), Some(55));

        // No ticks while hidden
        time.advance_secs(10);
        assert_eq!(clock.on_visible(), 65);
        assert_eq!(clock.hidden_snapshot(), None);
    }

    #[test]
    fn test_unarmed_clock_reads_zero() {
        let (time, mut clock) = clock();
        time.advance_secs(5);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.elapsed_precise(), 0.0);
    }

    #[test]
    fn test_rearm_resets() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(40);
        clock.tick();
        clock.arm();
        time.advance_secs(2);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn test_reset_clears_elapsed() {
        let (time, mut clock) = clock();
        clock.arm();
        time.advance_secs(12);
        clock.pause();
        time.advance_secs(3);
        clock.resume();
        assert_eq!(clock.tick(), 12);

        clock.reset();
        assert!(!clock.is_armed());
        assert_eq!(clock.elapsed(), 0);
        assert_eq!(clock.accumulated_pause_ms(), 0);
        time.advance_secs(5);
        assert_eq!(clock.tick(), 0);
    }

    #[test]
    fn test_real_sources_move_forward() {
        let mono = MonotonicTimeSource::new();
        let wall = WallTimeSource;
        let a = (mono.now_ms(), wall.now_ms());
        let b = (mono.now_ms(), wall.now_ms());
        assert!(b.0 >= a.0);
        assert!(wall.now_ms() > 1_600_000_000_000);
        assert!(default_time_source().now_ms() < u64::MAX);
    }
}
