//! Bounded retry with exponential backoff and jitter.
//!
//! Used for the steps that race AWS eventual consistency: object uploads right
//! after bucket creation, bucket policy propagation, and distribution deletion
//! while the disabled state spreads across the CDN. Fatal errors are returned
//! at once; anything else is retried until `max_attempts` is reached.

use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::error::{Error, Kind, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
  /// Total attempts including the first, at least 1
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub backoff_multiplier: f64,
  /// Spread each delay over 0.5x..1.5x
  pub jitter: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 6,
      initial_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(20),
      backoff_multiplier: 2.0,
      jitter: true,
    }
  }
}

impl RetryConfig {
  pub fn with_max_attempts(attempts: u32) -> Self {
    Self {
      max_attempts: attempts,
      ..Default::default()
    }
  }

  /// Same delay between every attempt.
  pub fn fixed(attempts: u32, interval: Duration) -> Self {
    Self {
      max_attempts: attempts,
      initial_delay: interval,
      max_delay: interval,
      backoff_multiplier: 1.0,
      jitter: false,
    }
  }

  /// No sleeping at all, for tests.
  pub fn immediate(attempts: u32) -> Self {
    Self::fixed(attempts, Duration::ZERO)
  }
}

pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let max_attempts = config.max_attempts.max(1);
  let mut delay = config.initial_delay;
  let mut attempt = 0u32;

  loop {
    attempt += 1;
    let err = match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.kind() == Kind::Fatal => return Err(e),
      Err(e) => e,
    };

    if attempt >= max_attempts {
      return Err(Error::RetriesExhausted {
        operation: operation.to_string(),
        attempts: attempt,
        source: Box::new(err),
      });
    }

    let sleep_for = if config.jitter {
      delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    } else {
      delay
    };
    warn!("{operation} failed (attempt {attempt}/{max_attempts}), retrying in {sleep_for:?}: {err}");
    tokio::time::sleep(sleep_for).await;

    delay = delay.mul_f64(config.backoff_multiplier).min(config.max_delay);
  }
}
