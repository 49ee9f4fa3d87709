//! Adaptive performance regression
//!
//! Interactions call `regress()` to drop rendering fidelity to a floor while
//! the user is moving things. Once no further regression has arrived for the
//! debounce window, fidelity climbs back to its ceiling at a fixed rate.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::Duration;

/// Performance settings of a root
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Degraded floor
    pub min: f32,
    /// Un-degraded ceiling
    pub max: f32,
    /// Quiet period after the last regression before recovery starts
    pub debounce_ms: u64,
    /// Recovery speed in units of `current` per second
    pub recovery_rate: f32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 1.0,
            debounce_ms: 200,
            recovery_rate: 2.0,
        }
    }
}

/// Current performance level as stored in the render context
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Performance {
    /// Current fidelity factor in `[min, max]`
    pub current: f32,
    pub min: f32,
    pub max: f32,
    pub debounce: Duration,
}

impl Performance {
    pub fn from_config(config: &PerformanceConfig) -> Self {
        Self {
            current: config.max,
            min: config.min,
            max: config.max,
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// Whether fidelity is currently below its ceiling
    pub fn is_regressed(&self) -> bool {
        self.current < self.max
    }

    pub fn with_current(self, current: f32) -> Self {
        Self {
            current: current.clamp(self.min, self.max),
            ..self
        }
    }
}

impl Default for Performance {
    fn default() -> Self {
        Self::from_config(&PerformanceConfig::default())
    }
}

/// Outcome of one recovery step
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecoveryStep {
    /// Nothing to recover
    Idle,
    /// Still inside the debounce window
    Waiting,
    /// `current` should become the contained value
    Recovered(f32),
}

/// Bookkeeping for the regression window
#[derive(Debug)]
pub struct Regression {
    pending: Cell<bool>,
    regressed_at: Cell<Option<f64>>,
    count: Cell<u64>,
    recovery_rate: f32,
}

impl Regression {
    pub fn new(recovery_rate: f32) -> Self {
        Self {
            pending: Cell::new(false),
            regressed_at: Cell::new(None),
            count: Cell::new(0),
            recovery_rate,
        }
    }

    /// Record a regression; the window restarts at the next step
    pub fn mark(&self) {
        self.pending.set(true);
        self.count.set(self.count.get() + 1);
    }

    /// Number of regressions recorded so far
    pub fn count(&self) -> u64 {
        self.count.get()
    }

    /// Advance recovery to time `now` (seconds), `delta` seconds after the
    /// previous step
    pub fn step(&self, performance: &Performance, now: f64, delta: f32) -> RecoveryStep {
        if self.pending.replace(false) {
            self.regressed_at.set(Some(now));
        }
        if !performance.is_regressed() {
            self.regressed_at.set(None);
            return RecoveryStep::Idle;
        }

        let Some(at) = self.regressed_at.get() else {
            // Degraded by a direct write rather than a regress
            self.regressed_at.set(Some(now));
            return RecoveryStep::Waiting;
        };
        if now - at < performance.debounce.as_secs_f64() {
            return RecoveryStep::Waiting;
        }

        let next = if self.recovery_rate.is_infinite() {
            performance.max
        } else {
            (performance.current + self.recovery_rate * delta.max(0.0)).min(performance.max)
        };
        if next >= performance.max {
            self.regressed_at.set(None);
        }
        RecoveryStep::Recovered(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(current: f32) -> Performance {
        Performance {
            current,
            ..Performance::default()
        }
    }

    #[test]
    fn test_waits_for_debounce() {
        let regression = Regression::new(2.0);
        regression.mark();

        assert_eq!(regression.step(&perf(0.5), 1.0, 0.016), RecoveryStep::Waiting);
        assert_eq!(regression.step(&perf(0.5), 1.1, 0.1), RecoveryStep::Waiting);
        assert_eq!(
            regression.step(&perf(0.5), 1.25, 0.125),
            RecoveryStep::Recovered(0.75)
        );
    }

    #[test]
    fn test_new_regression_restarts_window() {
        let regression = Regression::new(2.0);
        regression.mark();
        regression.step(&perf(0.5), 0.0, 0.0);

        regression.mark();
        assert_eq!(regression.step(&perf(0.5), 0.15, 0.15), RecoveryStep::Waiting);
        assert_eq!(regression.step(&perf(0.5), 0.3, 0.15), RecoveryStep::Waiting);
        assert_eq!(regression.count(), 2);
    }

    #[test]
    fn test_recovery_clamps_to_max() {
        let regression = Regression::new(2.0);
        regression.mark();
        regression.step(&perf(0.5), 0.0, 0.0);

        assert_eq!(
            regression.step(&perf(0.9), 1.0, 0.5),
            RecoveryStep::Recovered(1.0)
        );
        assert_eq!(regression.step(&perf(1.0), 1.1, 0.1), RecoveryStep::Idle);
    }

    #[test]
    fn test_infinite_rate_jumps_to_max() {
        let regression = Regression::new(f32::INFINITY);
        regression.mark();
        regression.step(&perf(0.5), 0.0, 0.0);
        assert_eq!(
            regression.step(&perf(0.5), 0.5, 0.0),
            RecoveryStep::Recovered(1.0)
        );
    }
}
