use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{BackoffConfig, RegistrationConfig, RetryBudgets, MAX_BACKOFF_CAP};

use super::pipeline::Step;

/// Whether a collaborator failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, 5xx, connection failures. Consumes retry budget.
    Transient,
    /// Explicit rejection. Ends the pipeline on first occurrence.
    Permanent,
}

/// Implemented by collaborator errors so the state machine can classify them.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Per-step retry budgets plus the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    budgets: RetryBudgets,
    backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(budgets: RetryBudgets, backoff: BackoffConfig) -> Self {
        Self { budgets, backoff }
    }

    pub fn max_attempts(&self, step: Step) -> u32 {
        match step {
            Step::PickUp | Step::ResolveIdentity => self.budgets.identity,
            Step::VerifyCredentials => self.budgets.credentials,
            Step::EvaluatePolicy => self.budgets.policy,
        }
    }

    /// `failures` counts consecutive transient failures including the current one.
    pub fn is_exhausted(&self, step: Step, failures: u32) -> bool {
        failures >= self.max_attempts(step)
    }

    /// Delay after the n-th consecutive failure: `base * multiplier^(n-1)`, capped.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.backoff.base.as_millis() as f64;
        let cap = self.backoff.cap.as_millis() as f64;
        let millis = (base * self.backoff.multiplier.powi(exponent)).min(cap);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// When the record becomes eligible again. Never earlier than `now`, never past
    /// [`MAX_BACKOFF_CAP`] from it, and saturates at the end of the representable range.
    pub fn retry_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        let delay = self.delay_for(failures).min(MAX_BACKOFF_CAP);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryBudgets::default(), BackoffConfig::default())
    }
}

impl From<&RegistrationConfig> for RetryPolicy {
    fn from(config: &RegistrationConfig) -> Self {
        Self::new(config.retry_budgets, config.backoff)
    }
}
