use std::str::FromStr;
use std::time::Duration;

/// Read `name` from the environment, falling back to `default`.
///
/// Panics on an unparseable value so misconfiguration fails at startup.
fn env_or<T: FromStr>(name: &str, default: &str) -> T {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
}

/// Task runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Delay between submission and the Pending -> Running transition.
    pub start_delay: Duration,
    /// Default time a work function gets to stop after cancellation.
    pub cancel_grace: Duration,
    /// Retries for a registry write that failed with a storage error.
    pub storage_retry_attempts: u32,
    /// Base of the linear backoff between storage retries.
    pub storage_retry_backoff: Duration,
    /// Upper bound on a submitted payload's serialized size.
    pub max_payload_bytes: usize,
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `TASK_START_DELAY_MS`      | `500`   |
    /// | `CANCEL_GRACE_MS`          | `5000`  |
    /// | `STORAGE_RETRY_ATTEMPTS`   | `3`     |
    /// | `STORAGE_RETRY_BACKOFF_MS` | `100`   |
    /// | `MAX_PAYLOAD_BYTES`        | `65536` |
    pub fn from_env() -> Self {
        Self {
            start_delay: Duration::from_millis(env_or("TASK_START_DELAY_MS", "500")),
            cancel_grace: Duration::from_millis(env_or("CANCEL_GRACE_MS", "5000")),
            storage_retry_attempts: env_or("STORAGE_RETRY_ATTEMPTS", "3"),
            storage_retry_backoff: Duration::from_millis(env_or("STORAGE_RETRY_BACKOFF_MS", "100")),
            max_payload_bytes: env_or("MAX_PAYLOAD_BYTES", "65536"),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(500),
            cancel_grace: Duration::from_secs(5),
            storage_retry_attempts: 3,
            storage_retry_backoff: Duration::from_millis(100),
            max_payload_bytes: 64 * 1024,
        }
    }
}

/// Pacing of the simulated agents.
#[derive(Debug, Clone)]
pub struct AgentSimConfig {
    pub tick_min: Duration,
    pub tick_max: Duration,
}

impl AgentSimConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default |
    /// |---------------------|---------|
    /// | `AGENT_TICK_MIN_MS` | `1000`  |
    /// | `AGENT_TICK_MAX_MS` | `3000`  |
    ///
    /// A maximum below the minimum is raised to the minimum.
    pub fn from_env() -> Self {
        let tick_min: u64 = env_or("AGENT_TICK_MIN_MS", "1000");
        let tick_max: u64 = env_or("AGENT_TICK_MAX_MS", "3000");

        Self {
            tick_min: Duration::from_millis(tick_min),
            tick_max: Duration::from_millis(tick_max.max(tick_min)),
        }
    }
}

impl Default for AgentSimConfig {
    fn default() -> Self {
        Self {
            tick_min: Duration::from_secs(1),
            tick_max: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.start_delay, Duration::from_millis(500));
        assert_eq!(config.cancel_grace, Duration::from_secs(5));
        assert_eq!(config.storage_retry_attempts, 3);
        assert_eq!(config.max_payload_bytes, 65536);
    }

    #[test]
    fn env_or_falls_back_to_default() {
        let value: u64 = env_or("PMDASH_TEST_UNSET_VARIABLE", "42");
        assert_eq!(value, 42);
    }

    #[test]
    #[should_panic(expected = "PMDASH_TEST_BAD_NUMBER must be a valid u32")]
    fn env_or_rejects_garbage() {
        std::env::set_var("PMDASH_TEST_BAD_NUMBER", "not-a-number");
        let _: u32 = env_or("PMDASH_TEST_BAD_NUMBER", "1");
    }
}
