//! Acceleration curves for held-key motion
//!
//! A curve advances the speed multiplier once per tick. Every curve starts
//! from 1.0 after a full stop and is capped at `max_step / base_step`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of the per-tick speed increase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelerationCurve {
    /// Constant increment of `rate - 1` per tick
    Linear,
    /// Multiply by `rate` per tick (geometric progression)
    #[default]
    Exponential,
    /// Slow start, fast middle, slow approach to the cap
    SCurve,
}

impl AccelerationCurve {
    /// All curves, for settings UIs and tests
    pub const ALL: &'static [AccelerationCurve] = &[
        AccelerationCurve::Linear,
        AccelerationCurve::Exponential,
        AccelerationCurve::SCurve,
    ];

    /// Name as written in the config file
    pub fn as_str(&self) -> &'static str {
        match self {
            AccelerationCurve::Linear => "linear",
            AccelerationCurve::Exponential => "exponential",
            AccelerationCurve::SCurve => "s-curve",
        }
    }

    /// Compute the multiplier for the next tick
    ///
    /// # Arguments
    /// * `multiplier` - Current multiplier (>= 1.0)
    /// * `rate` - Acceleration rate from config (> 1.0)
    /// * `max_multiplier` - Ceiling, see [`max_multiplier`]
    pub fn advance(self, multiplier: f64, rate: f64, max_multiplier: f64) -> f64 {
        let next = match self {
            AccelerationCurve::Linear => multiplier + (rate - 1.0),
            AccelerationCurve::Exponential => multiplier * rate,
            AccelerationCurve::SCurve => {
                // Triangular weighting: zero at both ends, peak at t = 0.5
                let t = multiplier / max_multiplier;
                let increment = rate * (1.0 - (2.0 * t - 1.0).abs());
                multiplier + increment
            }
        };
        // A rate below 1.0 from a hand-edited file must not slow the key
        // down below its base step
        next.min(max_multiplier).max(1.0)
    }
}

impl fmt::Display for AccelerationCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multiplier ceiling for a base/max step pair
///
/// Never below 1.0, so a misconfigured `max_step < base_step` (or a zero
/// base step) pins the speed at the base step instead of dividing by zero.
pub fn max_multiplier(base_step: i32, max_step: i32) -> f64 {
    if base_step <= 0 {
        return 1.0;
    }
    (max_step as f64 / base_step as f64).max(1.0)
}
