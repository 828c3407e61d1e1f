use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Bounded retry with exponential backoff, used for message delivery and
/// integration calls inside node handlers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): exponential, capped,
    /// with up to 50% random jitter on top.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0..=capped / 2);
        Duration::from_millis(capped + jitter)
    }

    /// Worst-case total time spent inside one retried operation. The claim
    /// lease must cover this.
    pub fn ceiling(&self) -> Duration {
        let retries = self.max_attempts.saturating_sub(1) as u64;
        Duration::from_millis(retries * (self.max_delay_ms + self.max_delay_ms / 2))
    }
}

/// Engine tuning knobs. Defaults are safe for production; tests shrink the
/// delays.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Claim lease length in seconds. Sized to the worst-case single turn,
    /// which is bounded by the integration retry/timeout ceiling.
    pub claim_lease_secs: u64,
    /// Upper bound on nodes traversed in one turn, so a cyclic
    /// auto-continue chain cannot wedge a claimed session.
    pub max_steps_per_turn: usize,
    pub delivery_retry: RetryPolicy,
    pub integration_retry: RetryPolicy,
    /// Default per-request timeout for `apiCall` nodes that do not declare
    /// their own.
    pub integration_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_lease_secs: 30,
            max_steps_per_turn: 64,
            delivery_retry: RetryPolicy::default(),
            integration_retry: RetryPolicy::default(),
            integration_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn integration_timeout(&self) -> Duration {
        Duration::from_secs(self.integration_timeout_secs)
    }

    /// Reads overrides from `BOTFLOW_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u64("BOTFLOW_CLAIM_LEASE_SECS") {
            config.claim_lease_secs = v;
        }
        if let Some(v) = env_u64("BOTFLOW_MAX_STEPS_PER_TURN") {
            config.max_steps_per_turn = v as usize;
        }
        if let Some(v) = env_u64("BOTFLOW_INTEGRATION_TIMEOUT_SECS") {
            config.integration_timeout_secs = v;
        }
        if let Some(v) = env_u64("BOTFLOW_RETRY_MAX_ATTEMPTS") {
            config.delivery_retry.max_attempts = v as u32;
            config.integration_retry.max_attempts = v as u32;
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 400,
        };
        // jitter adds at most 50%
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
        assert!(policy.delay_for(0) <= Duration::from_millis(150));
        assert!(policy.delay_for(10) <= Duration::from_millis(600));
    }

    #[test]
    fn test_lease_covers_retry_ceiling() {
        let config = EngineConfig::default();
        assert!(config.claim_lease() > config.integration_retry.ceiling());
    }
}
