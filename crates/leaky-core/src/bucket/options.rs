use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::error::BucketError;

pub const DEFAULT_QUEUE: &str = "leaky-bucket-default";
/// 2^31; large enough to act as "no limit" in practice.
pub const DEFAULT_LIMIT: u64 = 2_147_483_648;
pub const MAX_QUEUE_NAME_LEN: usize = 255;

/// Per-handle settings. Handles sharing a queue name should agree on these,
/// but nothing enforces it; each handle applies its own limit and interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct BucketOptions {
    /// Name of the shared bucket record.
    pub queue: String,
    /// Minimum milliseconds between two successful dequeues.
    pub interval_ms: u64,
    /// Maximum number of outstanding items.
    pub limit: u64,
    /// Admit a batch only when `count + batch <= limit` instead of `count < limit`.
    pub strict_capacity: bool,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            interval_ms: 0,
            limit: DEFAULT_LIMIT,
            strict_capacity: false,
        }
    }
}

impl BucketOptions {
    pub fn named(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_strict_capacity(mut self, strict: bool) -> Self {
        self.strict_capacity = strict;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), BucketError> {
        let name = self.queue.as_str();
        if name.trim().is_empty() {
            return Err(BucketError::Configuration(
                "queue name must not be empty".into(),
            ));
        }
        if name.len() > MAX_QUEUE_NAME_LEN {
            return Err(BucketError::Configuration(format!(
                "queue name exceeds {MAX_QUEUE_NAME_LEN} bytes"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(BucketError::Configuration(
                "queue name must not contain control characters".into(),
            ));
        }
        if self.limit == 0 {
            return Err(BucketError::Configuration(
                "limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Overlay `LEAKY_QUEUE`, `LEAKY_INTERVAL_MS`, `LEAKY_LIMIT` and
    /// `LEAKY_STRICT_CAPACITY` when set. Unparseable values are rejected.
    pub fn apply_env(&mut self) -> Result<(), BucketError> {
        if let Ok(queue) = std::env::var("LEAKY_QUEUE") {
            self.queue = queue;
        }
        if let Some(ms) = env_u64("LEAKY_INTERVAL_MS")? {
            self.interval_ms = ms;
        }
        if let Some(limit) = env_u64("LEAKY_LIMIT")? {
            self.limit = limit;
        }
        if let Some(strict) = env_flag("LEAKY_STRICT_CAPACITY")? {
            self.strict_capacity = strict;
        }
        Ok(())
    }
}

/// Unsigned integer from the environment; unset is `None`, garbage is an error.
pub fn env_u64(key: &str) -> Result<Option<u64>, BucketError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| BucketError::Configuration(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Boolean flag from the environment: 1/0, true/false, yes/no, on/off in any case.
pub fn env_flag(key: &str) -> Result<Option<bool>, BucketError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(BucketError::Configuration(format!(
            "{key}: not a flag: {raw}"
        ))),
    }
}
