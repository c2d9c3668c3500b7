use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    pub source: SourceSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    /// "file" or "stdin"
    pub kind: String,
    pub topic: String,
    pub path: PathBuf,
    pub follow: bool,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl IngestSettings {
    /// Loads `config/default.toml`, `config/local.toml` and an optional
    /// explicit file over built-in defaults, then applies
    /// `SENSORSTREAM__<SECTION>__<KEY>` environment variables.
    pub fn new(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = Path::new("config");
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("source.kind", defaults.source.kind)?
            .set_default("source.topic", defaults.source.topic)?
            .set_default("source.path", defaults.source.path.to_string_lossy().as_ref())?
            .set_default("source.follow", defaults.source.follow)?
            .set_default("source.poll_interval_ms", defaults.source.poll_interval_ms)?
            .set_default("retry.max_attempts", defaults.retry.max_attempts)?
            .set_default("retry.initial_backoff_ms", defaults.retry.initial_backoff_ms)?
            .set_default("retry.max_backoff_ms", defaults.retry.max_backoff_ms)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix("SENSORSTREAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                kind: "file".to_string(),
                topic: "sensor_data".to_string(),
                path: PathBuf::from("data/sensor_data.jsonl"),
                follow: true,
                poll_interval_ms: 500,
            },
            retry: RetrySettings {
                max_attempts: 5,
                initial_backoff_ms: 100,
                max_backoff_ms: 5000,
            },
        }
    }
}
