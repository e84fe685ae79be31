//! Backoff policy for dependency waits.
//!
//! A factory names the services it needs. Registration re-checks the
//! registry on an exponential schedule until every dependency is present, and
//! gives up once either the retry count or the elapsed-time budget runs out.
//!
//! ```rust
//! use svchost_runtime::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_retries(5)
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_max_elapsed(Duration::from_secs(20));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
//! ```

use std::time::Duration;
use svchost_core::{HostError, Result};
use tokio::time::{Instant, sleep};

const DEFAULT_MAX_RETRIES: usize = 10;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(60);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// How long, and how often, registration waits for missing dependencies.
///
/// Defaults: 10 retries, 1 s first delay doubling up to 30 s, 60 s total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Re-checks after the first one.
    pub max_retries: usize,
    /// Delay before the first re-check.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Total time budget; no re-check starts once it is used up.
    pub max_elapsed: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Policy with the default schedule.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_elapsed: DEFAULT_MAX_ELAPSED,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// - `SVCHOST_DEPENDENCY_MAX_RETRIES`
    /// - `SVCHOST_DEPENDENCY_INITIAL_DELAY_MS`
    /// - `SVCHOST_DEPENDENCY_MAX_DELAY_MS`
    /// - `SVCHOST_DEPENDENCY_MAX_ELAPSED_MS`
    /// - `SVCHOST_DEPENDENCY_MULTIPLIER`
    #[must_use]
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }
        let millis = |key: &str| parsed::<u64>(key).map(Duration::from_millis);

        let defaults = Self::new();
        Self {
            max_retries: parsed("SVCHOST_DEPENDENCY_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_delay: millis("SVCHOST_DEPENDENCY_INITIAL_DELAY_MS")
                .unwrap_or(defaults.initial_delay),
            max_delay: millis("SVCHOST_DEPENDENCY_MAX_DELAY_MS").unwrap_or(defaults.max_delay),
            max_elapsed: millis("SVCHOST_DEPENDENCY_MAX_ELAPSED_MS")
                .unwrap_or(defaults.max_elapsed),
            multiplier: parsed("SVCHOST_DEPENDENCY_MULTIPLIER").unwrap_or(defaults.multiplier),
        }
    }

    /// Set the number of re-checks.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first re-check.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap on any single delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the total time budget.
    #[must_use]
    pub const fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = budget;
        self
    }

    /// Set the growth factor between delays.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before re-check number `attempt + 1`:
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Run `check` until it stops reporting missing dependencies.
///
/// Only [`HostError::DependencyTimeout`] is retried; any other error, and the
/// last timeout once `policy` is exhausted, is returned as is.
pub(crate) async fn wait_for_dependencies<T>(
    policy: &RetryPolicy,
    service: &str,
    mut check: impl FnMut() -> Result<T>,
) -> Result<T> {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let err = match check() {
            Ok(resolved) => {
                if attempt > 0 {
                    tracing::info!(service, attempt, "Dependencies became available");
                }
                return Ok(resolved);
            }
            Err(err @ HostError::DependencyTimeout { .. }) => err,
            Err(err) => return Err(err),
        };

        let elapsed = started.elapsed();
        if attempt >= policy.max_retries || elapsed >= policy.max_elapsed {
            tracing::debug!(service, attempt, elapsed_ms = elapsed.as_millis(), "Dependency wait exhausted");
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(service, attempt, delay_ms = delay.as_millis(), error = %err, "Waiting for dependencies");
        sleep(delay).await;
        attempt += 1;
    }
}
