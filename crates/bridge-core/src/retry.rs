use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// `None` retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Blocks the current thread between attempts.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

/// Run `op` until it succeeds or `policy.max_attempts` is exhausted.
///
/// `op` receives the 1-based attempt number. Returns the last error when
/// attempts run out.
pub fn retry<T, E, F>(policy: &RetryPolicy, sleeper: &dyn Sleeper, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if policy.max_attempts.map_or(true, |max| attempt < max) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `op` until it succeeds, however many attempts that takes.
///
/// Returns the value and the number of attempts made.
pub fn retry_until_success<T, E, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> (T, u32)
where
    F: FnMut(u32) -> Result<T, E>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return (v, attempt),
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                sleeper.sleep(delay);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
