//! Retry pacing shared by the readiness poller and the Helm wrapper.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Growth factor for exponential backoff.
pub const DEFAULT_FACTOR: f64 = 1.5;

/// Ceiling for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How long to wait between attempts, and how many attempts to make.
///
/// Delays are expressed in (fractional) seconds so the policy can be
/// written directly in the YAML config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay every time.
    Fixed {
        /// Delay between attempts.
        interval_secs: f64,
        /// Hard attempt cap.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Delay multiplied by `factor` after every attempt, capped at `max_secs`.
    Exponential {
        /// Delay after the first attempt.
        initial_secs: f64,
        /// Multiplier per attempt.
        #[serde(default = "default_factor")]
        factor: f64,
        /// Upper bound on a single delay.
        #[serde(default = "default_max_secs")]
        max_secs: f64,
        /// Hard attempt cap.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Delay of `step_secs * attempt`.
    Linear {
        /// Delay unit.
        step_secs: f64,
        /// Hard attempt cap.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

const fn default_factor() -> f64 {
    DEFAULT_FACTOR
}

const fn default_max_secs() -> f64 {
    DEFAULT_MAX_DELAY.as_secs() as f64
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl BackoffPolicy {
    /// Fixed interval, no attempt cap.
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed { interval_secs: interval.as_secs_f64(), max_attempts: None }
    }

    /// Exponential from `initial`, x1.5 per attempt, capped at 60s.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial_secs: initial.as_secs_f64(),
            factor: DEFAULT_FACTOR,
            max_secs: DEFAULT_MAX_DELAY.as_secs_f64(),
            max_attempts: None,
        }
    }

    /// Linearly increasing, `step * attempt`.
    pub fn linear(step: Duration) -> Self {
        Self::Linear { step_secs: step.as_secs_f64(), max_attempts: None }
    }

    /// Set the attempt cap.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        match &mut self {
            Self::Fixed { max_attempts, .. }
            | Self::Exponential { max_attempts, .. }
            | Self::Linear { max_attempts, .. } => *max_attempts = Some(attempts),
        }
        self
    }

    /// The attempt cap, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::Fixed { max_attempts, .. }
            | Self::Exponential { max_attempts, .. }
            | Self::Linear { max_attempts, .. } => *max_attempts,
        }
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts().is_none_or(|max| attempts_made < max)
    }

    /// Delay to wait after attempt number `attempt` (1-based) has failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let secs = match *self {
            Self::Fixed { interval_secs, .. } => interval_secs,
            Self::Exponential { initial_secs, factor, max_secs, .. } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                (initial_secs * factor.powi(exponent)).min(max_secs)
            }
            Self::Linear { step_secs, .. } => step_secs * f64::from(attempt),
        };
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        // Overflow and infinity both saturate.
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Reject values that cannot produce a sensible delay.
    ///
    /// `field` names the config key in the error message.
    pub fn validate(&self, field: &str) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::config(format!(
                    "{field}.{name} must be a positive number of seconds, got {value}"
                )))
            }
        };
        match *self {
            Self::Fixed { interval_secs, .. } => positive("interval_secs", interval_secs)?,
            Self::Exponential { initial_secs, factor, max_secs, .. } => {
                positive("initial_secs", initial_secs)?;
                positive("max_secs", max_secs)?;
                if !(factor.is_finite() && factor >= 1.0) {
                    return Err(Error::config(format!(
                        "{field}.factor must be a number of at least 1, got {factor}"
                    )));
                }
            }
            Self::Linear { step_secs, .. } => positive("step_secs", step_secs)?,
        }
        if self.max_attempts() == Some(0) {
            return Err(Error::config(format!("{field}.max_attempts must be at least 1")));
        }
        Ok(())
    }
}
