//! Sensorstream server binary.
//!
//! Runs the ingestion loop and the HTTP/WebSocket query interface over one
//! shared streaming index.
//!
//! # Configuration
//!
//! Server and store settings are layered, lowest precedence first:
//!
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration (`/etc/streamindex/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (`STREAMINDEX__SECTION__KEY`)
//! 5. Command-line arguments
//!
//! Ingestion settings come from `config/default.toml`, `config/local.toml`,
//! `--ingest-config` and `SENSORSTREAM__SECTION__KEY` variables.
//!
//! ```text
//! Options:
//!   -c, --config <FILE>                 Path to configuration file
//!       --host <HOST>                   Server host address [env: STREAMINDEX_SERVER_HOST]
//!       --port <PORT>                   Server port [env: STREAMINDEX_SERVER_PORT]
//!       --index-engine <ENGINE>         "sled" or "memory" [env: STREAMINDEX_INDEX_ENGINE]
//!       --index-path <DIR>              Point index directory [env: STREAMINDEX_INDEX_PATH]
//!       --analytics-connection <STR>    ":memory:" or a database file [env: STREAMINDEX_ANALYTICS_CONNECTION]
//!       --analytics-options <KEY=VAL>   Analytics engine options [env: STREAMINDEX_ANALYTICS_OPTIONS]
//!       --dedupe-raw-rows <BOOL>        Reject duplicate raw rows [env: STREAMINDEX_DEDUPE_RAW_ROWS]
//!       --ingest-config <FILE>          Ingestion configuration file
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Follow data/sensor_data.jsonl and serve on 0.0.0.0:8000
//! sensorstream
//!
//! # Pipe a Kafka console consumer that prints keys
//! kafka-console-consumer --topic sensor_data --from-beginning \
//!     --property print.key=true --property key.separator=$'\t' \
//!   | SENSORSTREAM__SOURCE__KIND=stdin sensorstream --port 9000
//! ```
//!
//! Logging is controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use sensorstream::{source, EventSink, IngestSettings, Ingestor};
use std::path::PathBuf;
use std::sync::Arc;
use streamindex_core::config::{CliArgs, Settings};
use streamindex_core::{service, StreamingIndex};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensorstream", version, about)]
struct Cli {
    #[command(flatten)]
    server: CliArgs,

    /// Ingestion configuration file
    #[arg(long, value_name = "FILE")]
    ingest_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sensorstream=info,streamindex_core=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::new(&cli.server).context("loading server configuration")?;
    let ingest = IngestSettings::new(cli.ingest_config.as_deref())
        .context("loading ingestion configuration")?;

    let index = Arc::new(
        StreamingIndex::open(&settings)
            .await
            .context("opening streaming index")?,
    );

    let event_source = source::from_settings(&ingest.source)?;
    let sink: Arc<dyn EventSink> = index.clone();
    let ingestor = Ingestor::with_retry_policy(event_source, sink, ingest.retry_policy());
    tracing::info!(
        topic = %ingest.source.topic,
        kind = %ingest.source.kind,
        path = %ingest.source.path.display(),
        "starting ingestion"
    );
    let ingest_task = tokio::spawn(async move { ingestor.run().await });

    let addr = settings.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    service::serve(listener, index.clone(), shutdown_signal()).await?;

    ingest_task.abort();
    index.flush().await.context("flushing point index")?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
