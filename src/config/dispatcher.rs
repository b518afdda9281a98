//! Queue, retry and worker-pool configuration.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`DispatcherConfig::from_env`].
pub const ENV_PREFIX: &str = "DISPATCH_";

/// Parameters of the priority/delay queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of priority levels.
    pub priorities: usize,
    /// Time an element may wait in one priority level before promotion.
    pub max_wait_ms: u64,
    /// Capacity, or `-1` for unbounded.
    pub max_size: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priorities: 3,
            max_wait_ms: 30_000,
            max_size: 10_000,
        }
    }
}

impl QueueConfig {
    /// Validate queue parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.priorities == 0 {
            return Err("priorities must be greater than 0".into());
        }
        if self.max_wait_ms == 0 {
            return Err("max_wait_ms must be greater than 0".into());
        }
        if self.max_size != -1 && self.max_size < 1 {
            return Err(format!("max_size must be -1 or greater than 0, got {}", self.max_size));
        }
        Ok(())
    }
}

/// Outer retry loop around persistence and notification calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Pause after the first failure.
    pub initial_backoff_ms: u64,
    /// Upper bound for the pause.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Validate retry parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms must not exceed max_backoff_ms".into());
        }
        Ok(())
    }
}

/// Root dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Queue parameters.
    pub queue: QueueConfig,
    /// Number of worker threads draining the queue.
    pub worker_count: usize,
    /// Idle poll interval right after the queue ran dry.
    pub poll_interval_ms: u64,
    /// Idle poll interval ceiling for the exponential backoff.
    pub max_poll_interval_ms: u64,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Retry policy for collaborator calls.
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            worker_count: num_cpus::get(),
            poll_interval_ms: 10,
            max_poll_interval_ms: 200,
            thread_stack_size: 2 * 1024 * 1024,
            retry: RetryConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Defaults; see [`Default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue parameters.
    #[must_use]
    pub const fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the idle poll interval bounds.
    #[must_use]
    pub const fn with_poll_interval(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.poll_interval_ms = min_ms;
        self.max_poll_interval_ms = max_ms;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.queue.validate().map_err(|e| format!("queue invalid: {e}"))?;
        self.retry.validate().map_err(|e| format!("retry invalid: {e}"))?;
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.poll_interval_ms > self.max_poll_interval_ms {
            return Err("poll_interval_ms must not exceed max_poll_interval_ms".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then apply `DISPATCH_*` variables over the
    /// defaults and validate.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Apply `DISPATCH_*` entries of `vars` over the defaults and validate.
    ///
    /// Recognized keys: `PRIORITIES`, `MAX_WAIT_MS`, `MAX_SIZE`,
    /// `WORKER_COUNT`, `POLL_INTERVAL_MS`, `MAX_POLL_INTERVAL_MS`,
    /// `THREAD_STACK_SIZE`, `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_BACKOFF_MS`,
    /// `RETRY_MAX_BACKOFF_MS`.
    pub fn from_vars<I>(vars: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|k| (k.to_owned(), v)))
            .collect();

        let mut cfg = Self::default();
        set_from(&vars, "PRIORITIES", &mut cfg.queue.priorities)?;
        set_from(&vars, "MAX_WAIT_MS", &mut cfg.queue.max_wait_ms)?;
        set_from(&vars, "MAX_SIZE", &mut cfg.queue.max_size)?;
        set_from(&vars, "WORKER_COUNT", &mut cfg.worker_count)?;
        set_from(&vars, "POLL_INTERVAL_MS", &mut cfg.poll_interval_ms)?;
        set_from(&vars, "MAX_POLL_INTERVAL_MS", &mut cfg.max_poll_interval_ms)?;
        set_from(&vars, "THREAD_STACK_SIZE", &mut cfg.thread_stack_size)?;
        set_from(&vars, "RETRY_MAX_ATTEMPTS", &mut cfg.retry.max_attempts)?;
        set_from(&vars, "RETRY_INITIAL_BACKOFF_MS", &mut cfg.retry.initial_backoff_ms)?;
        set_from(&vars, "RETRY_MAX_BACKOFF_MS", &mut cfg.retry.max_backoff_ms)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn set_from<T>(vars: &HashMap<String, String>, key: &str, slot: &mut T) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = vars.get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{key}={raw:?}: {e}"))?;
    }
    Ok(())
}
