//! Row-level retry of sink writes with exponential backoff.

use crate::error::{ImportError, Result};
use crate::sink::{ColumnSink, OutputRecord};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// No retries, no waiting.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Upper bound of the delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay with jitter in `[delay/2, delay]`, so chunks that fail together
    /// do not retry in lockstep.
    fn jittered_delay(&self, attempt: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let millis = delay.as_millis() as u64;
        if millis < 2 {
            return delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }

    /// Put `record`, retrying failures until the budget is spent.
    pub async fn put_with_retry(
        &self,
        session: &mut dyn ColumnSink,
        record: &OutputRecord,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match session.put(record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        "Write of row '{}' to {} failed (attempt {}): {}. Retrying in {:?}",
                        record.row_key,
                        record.table,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ImportError::SinkWrite(format!(
                        "row '{}' in table '{}' failed after {} attempts: {}",
                        record.row_key,
                        record.table,
                        attempt + 1,
                        e
                    )))
                }
            }
        }
    }
}
