//! Gain automation timeline
//!
//! A `GainParam` is a list of segments on the output clock. Each segment
//! holds a start value and an end value over `[start, end]`; a zero-length
//! segment is an instantaneous set. Scheduling a new segment drops every
//! segment starting at or after it, so a fade-out issued mid fade-in takes
//! over from the value the listener currently hears.

use mwl_common::RampShape;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq)]
struct GainSegment {
    start: f64,
    end: f64,
    from: f32,
    to: f32,
    shape: RampShape,
}

/// Scheduled gain over output time (seconds)
#[derive(Debug, Clone, PartialEq)]
pub struct GainParam {
    initial: f32,
    segments: Vec<GainSegment>,
}

/// Gain shared between the engine (writer) and the output mixer (reader)
pub type SharedGain = Arc<Mutex<GainParam>>;

impl GainParam {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            segments: Vec::new(),
        }
    }

    pub fn shared(initial: f32) -> SharedGain {
        Arc::new(Mutex::new(Self::new(initial)))
    }

    /// Gain at output time `t`
    pub fn value_at(&self, t: f64) -> f32 {
        let Some(seg) = self.segments.iter().rev().find(|s| s.start <= t) else {
            return self.initial;
        };
        if t >= seg.end || seg.end <= seg.start {
            return seg.to;
        }
        let position = (t - seg.start) / (seg.end - seg.start);
        seg.shape.interpolate(seg.from, seg.to, position)
    }

    /// Drop segments starting at or after `t`
    pub fn cancel_from(&mut self, t: f64) {
        self.segments.retain(|s| s.start < t);
    }

    /// Jump to `value` at `t`
    pub fn set_value_at(&mut self, value: f32, t: f64) {
        self.cancel_from(t);
        self.segments.push(GainSegment {
            start: t,
            end: t,
            from: value,
            to: value,
            shape: RampShape::Linear,
        });
    }

    /// Ramp from the value heard at `start` to `target` by `end`
    pub fn ramp_to(&mut self, target: f32, start: f64, end: f64, shape: RampShape) {
        let from = self.value_at(start);
        self.cancel_from(start);
        self.segments.push(GainSegment {
            start,
            end: end.max(start),
            from,
            to: target,
            shape,
        });
    }

    pub fn linear_ramp_to(&mut self, target: f32, start: f64, end: f64) {
        self.ramp_to(target, start, end, RampShape::Linear);
    }

    pub fn exponential_ramp_to(&mut self, target: f32, start: f64, end: f64) {
        self.ramp_to(target, start, end, RampShape::Exponential);
    }

    /// Time at which the last scheduled segment settles
    pub fn settles_at(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }
}
