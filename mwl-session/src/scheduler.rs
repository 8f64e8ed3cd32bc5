//! Instruction scheduler
//!
//! Cues are driven entirely by elapsed session time. Every tick re-scans the
//! sorted instruction list against the latest elapsed value, so a jump of
//! any size (a throttled or backgrounded host) fires each crossed cue exactly
//! once and in order. The auto-clear display window is measured the same
//! way instead of with one-shot timers.

use mwl_common::Instruction;
use tracing::debug;

/// Seconds a cue stays on screen without narration
pub const DEFAULT_CUE_DISPLAY_SECS: u32 = 5;

/// Cue transitions produced by one `advance`
#[derive(Debug, Clone, PartialEq)]
pub enum CueEvent {
    Fired { index: usize, instruction: Instruction },
    Cleared { index: usize },
}

#[derive(Debug, Clone)]
pub struct InstructionScheduler {
    instructions: Vec<Instruction>,
    duration: u32,
    display_secs: u32,
    /// Index of the next instruction not yet fired
    next_index: usize,
    /// Last crossed instruction; anchors cue progress
    segment: Option<usize>,
    /// Instruction on display
    current: Option<usize>,
    /// Elapsed second `current` was fired at
    shown_at: u32,
}

impl InstructionScheduler {
    /// `instructions` must already be sorted by timestamp
    pub fn new(instructions: Vec<Instruction>, duration: u32) -> Self {
        Self {
            instructions,
            duration,
            display_secs: DEFAULT_CUE_DISPLAY_SECS,
            next_index: 0,
            segment: None,
            current: None,
            shown_at: 0,
        }
    }

    pub fn with_display_secs(mut self, secs: u32) -> Self {
        self.display_secs = secs;
        self
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Forget fired cues
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.segment = None;
        self.current = None;
        self.shown_at = 0;
    }

    /// Reset and activate any instruction at timestamp 0
    pub fn start(&mut self) -> Vec<CueEvent> {
        self.reset();
        self.advance(0, true)
    }

    /// Fire every instruction crossed by `elapsed` and apply auto-clear
    ///
    /// With `narrated` set the current cue stays until superseded.
    pub fn advance(&mut self, elapsed: u32, narrated: bool) -> Vec<CueEvent> {
        let mut events = Vec::new();

        while let Some(instruction) = self.instructions.get(self.next_index) {
            if instruction.timestamp > elapsed {
                break;
            }
            let index = self.next_index;
            debug!("Cue {} fired at {}s: {}", index, elapsed, instruction.text);
            events.push(CueEvent::Fired {
                index,
                instruction: instruction.clone(),
            });
            self.segment = Some(index);
            self.current = Some(index);
            self.shown_at = elapsed;
            self.next_index += 1;
        }

        if !narrated {
            if let Some(index) = self.current {
                if elapsed > self.shown_at + self.display_secs {
                    debug!("Cue {} cleared at {}s", index, elapsed);
                    self.current = None;
                    events.push(CueEvent::Cleared { index });
                }
            }
        }

        events
    }

    pub fn current(&self) -> Option<&Instruction> {
        self.current.and_then(|i| self.instructions.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Progress through the current cue segment at session time `t`
    ///
    /// Measured toward the next instruction, or the end of the script when
    /// there is none. Always within `[0, 1]`.
    pub fn progress(&self, t: f64) -> f64 {
        let Some(segment) = self.segment.and_then(|i| self.instructions.get(i)) else {
            return 0.0;
        };
        let from = segment.timestamp as f64;
        let to = self
            .instructions
            .get(self.next_index)
            .map(|next| next.timestamp as f64)
            .unwrap_or(self.duration as f64);

        let span = to - from;
        if span <= 0.0 {
            return 1.0;
        }
        ((t - from) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mwl_common::CueType;

    fn scheduler() -> InstructionScheduler {
        InstructionScheduler::new(
            vec![
                Instruction::new(0, "start", CueType::Guidance),
                Instruction::new(30, "breathe", CueType::Breathing),
            ],
            60,
        )
    }

    fn fired(events: &[CueEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                CueEvent::Fired { index, .. } => Some(*index),
                CueEvent::Cleared { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_start_activates_zero_cue() {
        let mut s = scheduler();
        let events = s.start();
        assert_eq!(fired(&events), vec![0]);
        assert_eq!(s.current().unwrap().text, "start");
    }

    #[test]
    fn test_documented_walkthrough() {
        let mut s = scheduler();
        s.start();

        s.advance(5, false);
        assert_eq!(s.current().unwrap().text, "start");

        s.advance(15, false);
        assert!((s.progress(15.0) - 0.5).abs() < 1e-9);

        let events = s.advance(31, false);
        assert_eq!(fired(&events), vec![1]);
        assert_eq!(s.current().unwrap().text, "breathe");
    }

    #[test]
    fn test_auto_clear_after_display_window() {
        let mut s = scheduler();
        s.start();
        assert!(s.advance(5, false).is_empty());
        let events = s.advance(6, false);
        assert_eq!(events, vec![CueEvent::Cleared { index: 0 }]);
        assert!(s.current().is_none());
        // Cleared once only
        assert!(s.advance(7, false).is_empty());
    }

    #[test]
    fn test_narration_keeps_cue() {
        let mut s = scheduler();
        s.start();
        assert!(s.advance(20, true).is_empty());
        assert_eq!(s.current().unwrap().text, "start");
    }

    #[test]
    fn test_jump_fires_each_cue_once_in_order() {
        let mut s = InstructionScheduler::new(
            vec![
                Instruction::new(0, "a", CueType::Guidance),
                Instruction::new(10, "b", CueType::Breathing),
                Instruction::new(20, "c", CueType::Visualization),
                Instruction::new(40, "d", CueType::Guidance),
            ],
            60,
        );
        s.start();
        let events = s.advance(25, false);
        assert_eq!(fired(&events), vec![1, 2]);
        assert_eq!(s.current().unwrap().text, "c");

        assert!(fired(&s.advance(25, false)).is_empty());
        assert_eq!(fired(&s.advance(59, false)), vec![3]);
    }

    #[test]
    fn test_late_cue_clear_counts_from_fire_time() {
        let mut s = scheduler();
        s.start();
        // Jumped past 30; window starts when the cue was actually shown
        s.advance(40, false);
        assert_eq!(s.current().unwrap().text, "breathe");
        assert!(s.advance(45, false).is_empty());
        assert_eq!(s.advance(46, false), vec![CueEvent::Cleared { index: 1 }]);
    }

    #[test]
    fn test_progress_against_remaining_duration() {
        let mut s = scheduler();
        s.start();
        s.advance(30, true);
        assert!((s.progress(45.0) - 0.5).abs() < 1e-9);
        assert_eq!(s.progress(90.0), 1.0);
        assert_eq!(s.progress(10.0), 0.0);
    }

    #[test]
    fn test_progress_without_cues() {
        let mut s = InstructionScheduler::new(Vec::new(), 60);
        assert!(s.start().is_empty());
        assert_eq!(s.progress(30.0), 0.0);
        assert!(s.current().is_none());

        let mut tail = InstructionScheduler::new(
            vec![Instruction::new(60, "end", CueType::Guidance)],
            60,
        );
        tail.start();
        tail.advance(60, false);
        assert_eq!(tail.progress(60.0), 1.0);
    }
}
