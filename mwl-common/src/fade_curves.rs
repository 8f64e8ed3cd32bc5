//! Gain ramp shapes for audio envelopes
//!
//! Two shapes cover every envelope the engine draws:
//! - Linear: constant rate of change, used for guidance-track fade-in/out
//! - Exponential: constant ratio per unit time, used for chime note decay
//!
//! Both are evaluated from a normalized position through the ramp
//! (0.0 = ramp start, 1.0 = ramp end), so callers only need the start and
//! end values of the segment.

use serde::{Deserialize, Serialize};

/// Smallest gain an exponential ramp may start or end at
///
/// An exponential curve cannot reach zero, so ramps "to silence" target this
/// floor and the caller snaps to 0.0 once the ramp ends.
pub const EXPONENTIAL_FLOOR: f32 = 0.0001;

/// Shape of a gain ramp between two values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampShape {
    /// v(t) = from + (to - from) × t
    Linear,

    /// v(t) = from × (to / from)^t
    ///
    /// Both endpoints are clamped to `EXPONENTIAL_FLOOR` first.
    Exponential,
}

impl RampShape {
    /// Value of the ramp at `position` (clamped to 0.0..=1.0)
    pub fn interpolate(&self, from: f32, to: f32, position: f64) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            RampShape::Linear => from + (to - from) * t as f32,
            RampShape::Exponential => {
                let from = from.max(EXPONENTIAL_FLOOR) as f64;
                let to = to.max(EXPONENTIAL_FLOOR) as f64;
                (from * (to / from).powf(t)) as f32
            }
        }
    }

    /// Parse shape from string (config files)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(RampShape::Linear),
            "exponential" | "exp" => Some(RampShape::Exponential),
            _ => None,
        }
    }
}

impl Default for RampShape {
    /// Guidance fades are linear
    fn default() -> Self {
        RampShape::Linear
    }
}

impl std::fmt::Display for RampShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RampShape::Linear => write!(f, "linear"),
            RampShape::Exponential => write!(f, "exponential"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_fade_in_to_target_volume() {
        let shape = RampShape::Linear;
        assert_eq!(shape.interpolate(0.0, 0.8, 0.0), 0.0);
        assert!((shape.interpolate(0.0, 0.8, 0.5) - 0.4).abs() < 1e-6);
        assert!((shape.interpolate(0.0, 0.8, 1.0) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_linear_fade_out() {
        let shape = RampShape::Linear;
        assert!((shape.interpolate(0.8, 0.0, 0.25) - 0.6).abs() < 1e-6);
        assert_eq!(shape.interpolate(0.8, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_position_clamped() {
        let shape = RampShape::Linear;
        assert_eq!(shape.interpolate(0.0, 1.0, -1.0), 0.0);
        assert_eq!(shape.interpolate(0.0, 1.0, 2.0), 1.0);
    }

    #[test]
    fn test_exponential_decay_is_monotonic_and_bounded() {
        let shape = RampShape::Exponential;
        let mut last = shape.interpolate(0.3, 0.0, 0.0);
        assert!((last - 0.3).abs() < 1e-6);
        for step in 1..=10 {
            let v = shape.interpolate(0.3, 0.0, step as f64 / 10.0);
            assert!(v < last, "exponential decay must fall at every step");
            last = v;
        }
        assert!((last - EXPONENTIAL_FLOOR).abs() < 1e-6);
    }

    #[test]
    fn test_exponential_halfway_is_geometric_mean() {
        let v = RampShape::Exponential.interpolate(0.01, 1.0, 0.5);
        assert!((v - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_parse() {
        assert_eq!(RampShape::from_str("LINEAR"), Some(RampShape::Linear));
        assert_eq!(RampShape::from_str("exp"), Some(RampShape::Exponential));
        assert_eq!(RampShape::from_str("cosine"), None);
        assert_eq!(RampShape::default(), RampShape::Linear);
        assert_eq!(RampShape::Exponential.to_string(), "exponential");
    }
}
