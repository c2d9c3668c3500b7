//! Configuration management for the streaming index service.
//!
//! Configuration is loaded from multiple sources, later ones overriding
//! earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/streamindex/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (`STREAMINDEX__<SECTION>__<KEY>`)
//! 5. Command-line arguments
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore, for example
//! `STREAMINDEX__SERVER__PORT=9000` or `STREAMINDEX__INDEX__PATH=/var/lib/streaming_db`.

use clap::Args;
use crate::error::Result;
use config::Config;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/streamindex/config.toml";

/// Command-line arguments for the server and its stores.
///
/// Every option can also be set through the matching environment variable.
#[derive(Args, Debug, Default)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, env = "STREAMINDEX_SERVER_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "STREAMINDEX_SERVER_PORT")]
    pub port: Option<u16>,

    /// Point index engine ("sled" or "memory")
    #[arg(long, env = "STREAMINDEX_INDEX_ENGINE")]
    pub index_engine: Option<String>,

    /// Directory of the durable point index
    #[arg(long, env = "STREAMINDEX_INDEX_PATH")]
    pub index_path: Option<PathBuf>,

    /// Analytics connection string (":memory:" or a database file)
    #[arg(long, env = "STREAMINDEX_ANALYTICS_CONNECTION")]
    pub analytics_connection: Option<String>,

    /// Analytics engine options (key=value pairs)
    #[arg(long, env = "STREAMINDEX_ANALYTICS_OPTIONS")]
    pub analytics_options: Option<Vec<String>>,

    /// Reject duplicate (sensor_id, recorded_at) raw rows
    #[arg(long, env = "STREAMINDEX_DEDUPE_RAW_ROWS")]
    pub dedupe_raw_rows: Option<bool>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub analytics: AnalyticsConfig,
}

/// Network interface and port for the query interface.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Point index configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Engine type ("sled" or "memory")
    pub engine: String,
    /// On-disk location, persisted across restarts
    pub path: PathBuf,
    /// Page cache size in bytes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: u64,
    /// Background flush interval; `None` disables periodic flushing
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: Option<u64>,
}

/// Analytics store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Engine type ("duckdb")
    pub engine: String,
    /// ":memory:" keeps the analytics table process-local and empty after
    /// each restart
    pub connection: String,
    /// Enforce a composite (sensor_id, recorded_at) key on raw rows
    #[serde(default)]
    pub dedupe_raw_rows: bool,
    /// Engine-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_flush_every_ms() -> Option<u64> {
    Some(500)
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            engine: "sled".to_string(),
            path: PathBuf::from("streaming_db"),
            cache_capacity_bytes: default_cache_capacity(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            engine: "duckdb".to_string(),
            connection: ":memory:".to_string(),
            dedupe_raw_rows: false,
            options: HashMap::new(),
        }
    }
}

impl Settings {
    /// Loads configuration from all available sources. Any failure is an
    /// [`IndexError::Config`](crate::error::IndexError::Config).
    pub fn new(cli: &CliArgs) -> Result<Self> {
        let mut builder = Config::builder().add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(config::File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(config::File::from(config_path.clone()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("STREAMINDEX")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(ref host) = cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(ref engine) = cli.index_engine {
            builder = builder.set_override("index.engine", engine.as_str())?;
        }
        if let Some(ref path) = cli.index_path {
            builder = builder.set_override("index.path", path.to_string_lossy().as_ref())?;
        }
        if let Some(ref connection) = cli.analytics_connection {
            builder = builder.set_override("analytics.connection", connection.as_str())?;
        }
        if let Some(ref options) = cli.analytics_options {
            builder = builder.set_override("analytics.options", parse_key_values(options))?;
        }
        if let Some(dedupe) = cli.dedupe_raw_rows {
            builder = builder.set_override("analytics.dedupe_raw_rows", dedupe)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Socket address string for the query interface.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parses `key=value` pairs, skipping malformed entries.
fn parse_key_values(options: &[String]) -> HashMap<String, String> {
    options
        .iter()
        .filter_map(|opt| {
            let (key, value) = opt.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let settings = Settings::new(&CliArgs::default()).unwrap();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.index.engine, "sled");
        assert_eq!(settings.index.path, PathBuf::from("streaming_db"));
        assert_eq!(settings.analytics.engine, "duckdb");
        assert_eq!(settings.analytics.connection, ":memory:");
        assert!(!settings.analytics.dedupe_raw_rows);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(9100),
            index_engine: Some("memory".to_string()),
            analytics_options: Some(vec!["threads=2".to_string(), "garbage".to_string()]),
            dedupe_raw_rows: Some(true),
            ..CliArgs::default()
        };
        let settings = Settings::new(&cli).unwrap();
        assert_eq!(settings.bind_address(), "127.0.0.1:9100");
        assert_eq!(settings.index.engine, "memory");
        assert_eq!(settings.analytics.options.get("threads").map(String::as_str), Some("2"));
        assert_eq!(settings.analytics.options.len(), 1);
        assert!(settings.analytics.dedupe_raw_rows);
    }

    #[test]
    fn test_load_failures_are_config_errors() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/streamindex.toml")),
            ..CliArgs::default()
        };
        assert!(matches!(Settings::new(&cli), Err(crate::error::IndexError::Config(_))));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"[server]\nport = \"not a port\"\n").unwrap();
        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        assert!(matches!(Settings::new(&cli), Err(crate::error::IndexError::Config(_))));
    }

    #[test]
    fn test_parse_key_values() {
        let parsed = parse_key_values(&["a=1".to_string(), "b = two".to_string(), "c".to_string()]);
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("two"));
        assert!(!parsed.contains_key("c"));
    }
}
