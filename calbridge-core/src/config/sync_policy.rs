//! Tuning knobs for batching, backoff and convergence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The `[sync]` table of the config file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicy {
    /// Writes per batch before it is committed and a fresh one is opened.
    pub max_actions_per_batch: usize,
    /// Successful rounds allowed in one sync before it is declared a bug.
    pub iteration_limit: usize,
    /// Delay accumulated per queued write, slept before the batch commits.
    pub per_write_delay_ms: u64,
    /// Delay accumulated per write rejected inside a batch.
    pub batch_failure_penalty_ms: u64,
    /// Base of the exponential sleep after a transient failure.
    pub retry_base_ms: u64,
    /// Base of the exponential backoff added to every replica after a transient failure.
    pub rate_limit_base_ms: u64,
    /// Upper bound for both exponential delays.
    pub max_retry_delay_ms: u64,
    /// Consecutive transient failures tolerated within one sync.
    pub max_transient_retries: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            max_actions_per_batch: 950,
            iteration_limit: 100,
            per_write_delay_ms: 2,
            batch_failure_penalty_ms: 1000,
            retry_base_ms: 1000,
            rate_limit_base_ms: 1000,
            max_retry_delay_ms: 300_000,
            max_transient_retries: 8,
        }
    }
}

impl SyncPolicy {
    pub fn per_write_delay(&self) -> Duration {
        Duration::from_millis(self.per_write_delay_ms)
    }

    pub fn batch_failure_penalty(&self) -> Duration {
        Duration::from_millis(self.batch_failure_penalty_ms)
    }

    /// Sleep before retrying a round, `retry_base · 2^iteration`.
    pub fn retry_delay(&self, iteration: u32) -> Duration {
        self.exponential(self.retry_base_ms, iteration)
    }

    /// Backoff added to each replica after a failed round, `rate_limit_base · 2^iteration`.
    pub fn rate_limit_penalty(&self, iteration: u32) -> Duration {
        self.exponential(self.rate_limit_base_ms, iteration)
    }

    fn exponential(&self, base_ms: u64, exponent: u32) -> Duration {
        let factor = 1u64 << exponent.min(32);
        let millis = base_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(millis)
    }
}
