//! Retry policy for generate calls. Off unless configured.

use std::time::Duration;
use log::debug;

use crate::config::RetryConfig;

/// Retry policy for failed requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_retries: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_retries: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_retries
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self
    {   RetryPolicy::new(0, 2.0, 100)
    }

    /// Calculate backoff duration for attempt number
    pub fn backoff_for_attempt(
      &self
    , attempt: usize
    ) -> Duration
    {   debug!("Calculating backoff for attempt {}", attempt);
        let multiplier
          = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(
          (self.initial_backoff.as_millis() as f32
            * multiplier) as u64
        )
    }

    /// Whether another attempt is allowed after `retries_done`
    pub fn allows_retry(&self, retries_done: usize) -> bool
    {   retries_done < self.max_retries
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::none()
    }
}

impl From<&RetryConfig> for RetryPolicy
{   fn from(config: &RetryConfig) -> Self
    {   RetryPolicy::new(
          config.max_retries,
          config.backoff_multiplier,
          config.initial_backoff_ms
        )
    }
}
