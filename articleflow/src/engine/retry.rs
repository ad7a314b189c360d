//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Only transient [`AdapterError`]s are retried; permanent errors are
//! returned on the first occurrence.

use crate::errors::{AdapterError, ConfigError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the initial one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Checks that the config can make progress.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new(
                format!("{field}.max_attempts"),
                "must be at least 1",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::new(
                format!("{field}.base_delay_ms"),
                "must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }
}

impl BackoffStrategy {
    /// Un-jittered delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_ms(self, base_ms: u64, retry: u32) -> u64 {
        match self {
            Self::Exponential => base_ms.saturating_mul(2u64.saturating_pow(retry)),
            Self::Linear => base_ms.saturating_mul(u64::from(retry) + 1),
            Self::Constant => base_ms,
        }
    }
}

impl JitterStrategy {
    /// Randomizes `delay_ms`. `previous_ms` carries state for
    /// [`Decorrelated`](Self::Decorrelated).
    fn apply(self, delay_ms: u64, config: &RetryConfig, previous_ms: &mut Option<u64>) -> u64 {
        let mut rng = rand::thread_rng();
        match self {
            Self::None => delay_ms,
            Self::Full if delay_ms == 0 => 0,
            Self::Full => rng.gen_range(0..=delay_ms),
            Self::Equal => {
                let half = delay_ms / 2;
                delay_ms - half + if half == 0 { 0 } else { rng.gen_range(0..=half) }
            }
            Self::Decorrelated => {
                let floor = config.base_delay_ms;
                let ceiling = previous_ms
                    .unwrap_or(floor)
                    .saturating_mul(3)
                    .min(config.max_delay_ms);
                let next = if ceiling > floor {
                    rng.gen_range(floor..=ceiling)
                } else {
                    floor
                };
                *previous_ms = Some(next);
                next
            }
        }
    }
}

/// Retry schedule for one adapter operation.
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    failures: usize,
    previous_ms: Option<u64>,
}

impl<'a> Backoff<'a> {
    /// Starts a schedule with no failures recorded.
    #[must_use]
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
            previous_ms: None,
        }
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Records a failure. Returns how long to wait before the next
    /// attempt, or `None` when the error is permanent or attempts ran out.
    pub fn after_failure(&mut self, error: &AdapterError) -> Option<Duration> {
        if !error.is_transient() {
            return None;
        }
        self.failures += 1;
        if self.failures >= self.config.max_attempts {
            return None;
        }
        let retry = u32::try_from(self.failures - 1).unwrap_or(u32::MAX);
        let delay = self
            .config
            .backoff_strategy
            .delay_ms(self.config.base_delay_ms, retry)
            .min(self.config.max_delay_ms);
        let jittered = self
            .config
            .jitter_strategy
            .apply(delay, self.config, &mut self.previous_ms);
        Some(Duration::from_millis(jittered))
    }
}

/// Executes an adapter operation, retrying transient failures.
///
/// `key` identifies the operation in logs (e.g. `"write:intro"`).
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, key: &str, mut operation: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut backoff = Backoff::new(config);
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(delay) = backoff.after_failure(&error) else {
            if error.is_transient() {
                tracing::warn!(key, attempts = backoff.failures(), error = %error, "Retries exhausted");
            }
            return Err(error);
        };
        tracing::debug!(
            key,
            attempt = backoff.failures(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
    }
}
