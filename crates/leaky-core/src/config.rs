use std::collections::BTreeMap;

use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bucket::{BucketError, BucketOptions, DEFAULT_QUEUE};

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the shared bucket database
    #[serde(default)]
    pub state_dir: Option<String>,
    /// SQLite busy timeout in milliseconds (default 5000)
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

/// Per-queue overrides; unset fields fall back to the defaults.
#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BucketOverrides {
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub strict_capacity: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Queue used when none is named on the command line or in LEAKY_QUEUE
    #[serde(default)]
    pub default_queue: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketOverrides>,
}

impl Config {
    /// Defaults overlaid with the `[buckets.<queue>]` table, if any.
    pub fn bucket_options(&self, queue: &str) -> BucketOptions {
        let mut opts = BucketOptions::named(queue);
        if let Some(o) = self.buckets.get(queue) {
            if let Some(ms) = o.interval_ms {
                opts.interval_ms = ms;
            }
            if let Some(limit) = o.limit {
                opts.limit = limit;
            }
            if let Some(strict) = o.strict_capacity {
                opts.strict_capacity = strict;
            }
        }
        opts
    }

    /// Resolve options for a handle: explicit queue > `LEAKY_QUEUE` >
    /// `default_queue` > built-in default, then file overrides, then env.
    pub fn resolve(&self, queue: Option<&str>) -> Result<BucketOptions, BucketError> {
        let name = queue
            .map(str::to_string)
            .or_else(|| std::env::var("LEAKY_QUEUE").ok())
            .or_else(|| self.default_queue.clone())
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        let mut opts = self.bucket_options(&name);
        opts.apply_env()?;
        opts.queue = name;
        opts.validate()?;
        Ok(opts)
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn write_schema_file(path: &str) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
