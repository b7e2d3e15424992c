use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Configuration for the task queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Namespace prefix for index keys (`<prefix>:<task_type>`, `<prefix>:dlq`)
    pub queue_prefix: String,
    /// Timeout recorded on tasks that don't set one (advisory for handlers)
    pub default_timeout: Duration,
    /// Retry budget for tasks that don't set one
    pub max_retries: u32,
    /// How long completed results stay readable
    pub result_ttl: Duration,
    /// Interval at which dispatchers refresh their registration
    pub heartbeat_interval: Duration,
    /// Push exhausted tasks onto the dead-letter queue
    pub dead_letter_enabled: bool,
    /// How long a task may stay claimed before the sweeper may reclaim it
    pub visibility_timeout: Duration,
    /// Base retry backoff duration
    pub retry_base_delay: Duration,
    /// Maximum retry backoff duration
    pub max_retry_delay: Duration,
    /// A worker whose last heartbeat is older than this is considered stale
    pub worker_stale_after: Duration,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_prefix: "queue".to_string(),
            default_timeout: Duration::from_secs(300), // 5 minutes
            max_retries: 3,
            result_ttl: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(30),
            dead_letter_enabled: true,
            visibility_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            worker_stale_after: Duration::from_secs(90),
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DOG_TASKS_*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = env::var("DOG_TASKS_QUEUE_PREFIX") {
            config.queue_prefix = prefix;
        }
        if let Some(ms) = env_parse::<u64>("DOG_TASKS_DEFAULT_TIMEOUT_MS")? {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = env_parse::<u32>("DOG_TASKS_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(secs) = env_parse::<u64>("DOG_TASKS_RESULT_TTL_SECONDS")? {
            config.result_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("DOG_TASKS_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse::<bool>("DOG_TASKS_DEAD_LETTER_ENABLED")? {
            config.dead_letter_enabled = enabled;
        }
        if let Some(ms) = env_parse::<u64>("DOG_TASKS_VISIBILITY_TIMEOUT_MS")? {
            config.visibility_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the queue cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        if self.queue_prefix.trim().is_empty() {
            return Err(QueueError::InvalidConfig("queue_prefix must not be empty".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(QueueError::InvalidConfig("heartbeat_interval must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig("event_capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter_enabled = enabled;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Set base and cap of the exponential retry backoff
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.max_retry_delay = max;
        self
    }

    pub fn with_worker_stale_after(mut self, after: Duration) -> Self {
        self.worker_stale_after = after;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Backoff before the `retry_count`-th retry becomes eligible:
    /// `min(max_retry_delay, retry_base_delay * 2^retry_count)`
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.retry_base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }

    /// Key scheme derived from the prefix
    pub fn keys(&self) -> QueueKeys {
        QueueKeys::new(&self.queue_prefix)
    }
}

fn env_parse<T: FromStr>(key: &str) -> QueueResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| QueueError::InvalidConfig(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Namespaced keys for the priority index and dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// `<prefix>:<task_type>`
    pub fn task_type(&self, task_type: &str) -> String {
        format!("{}:{}", self.prefix, task_type)
    }

    /// `<prefix>:dlq`
    pub fn dead_letter(&self) -> String {
        format!("{}:dlq", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let config = QueueConfig::default();

        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
        assert_eq!(config.retry_delay(4), Duration::from_secs(16));
        assert_eq!(config.retry_delay(5), Duration::from_secs(30));
        assert_eq!(config.retry_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_keys_follow_prefix() {
        let keys = QueueConfig::default().with_queue_prefix("jobs").keys();

        assert_eq!(keys.task_type("build"), "jobs:build");
        assert_eq!(keys.dead_letter(), "jobs:dlq");
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = QueueConfig::default().with_queue_prefix("  ");
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_env_overrides_defaults() {
        // Only this test touches these variables.
        env::set_var("DOG_TASKS_MAX_RETRIES", "7");
        env::set_var("DOG_TASKS_DEAD_LETTER_ENABLED", "false");
        let config = QueueConfig::from_env().unwrap();
        env::remove_var("DOG_TASKS_MAX_RETRIES");
        env::remove_var("DOG_TASKS_DEAD_LETTER_ENABLED");

        assert_eq!(config.max_retries, 7);
        assert!(!config.dead_letter_enabled);
        assert_eq!(config.queue_prefix, "queue");
    }
}
