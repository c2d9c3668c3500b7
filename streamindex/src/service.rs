//! HTTP and WebSocket query interface.
//!
//! Routes:
//! - `GET /query?timestamp_threshold=T` - records with `timestamp >= T`, in key order
//! - `GET /aggregated_metrics[?bucket=minute|hour|day]` - grouped averages as
//!   `[sensorId, avgTemperature, avgHumidity, avgPressure, timeBucket]` arrays
//! - `GET /live_query` - WebSocket snapshot feed
//! - `GET /events/:id` - point lookup
//! - `GET /stats` - entry counts of both projections
//! - `GET /health` - liveness
//!
//! The snapshot feed is bounded: it pushes every record present during one
//! scan of the point index and then closes. Events stored after the scan
//! are not delivered.

use crate::aggregation::TimeBucket;
use crate::error::{IndexError, Result};
use crate::event::{AggregateRow, IndexedRecord, StoreStats};
use crate::index::StreamingIndex;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Close code sent when the snapshot scan fails part way.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct ThresholdParams {
    pub timestamp_threshold: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub bucket: Option<String>,
}

/// Builds the router over a shared index.
pub fn create_router(index: Arc<StreamingIndex>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", get(query_events))
        .route("/aggregated_metrics", get(aggregated_metrics))
        .route("/live_query", get(live_query))
        .route("/events/:id", get(get_event))
        .route("/stats", get(stats))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(index)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    index: Arc<StreamingIndex>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "query interface listening");
    axum::serve(listener, create_router(index))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn query_events(
    State(index): State<Arc<StreamingIndex>>,
    Query(params): Query<ThresholdParams>,
) -> Result<Json<Vec<IndexedRecord>>> {
    let threshold = params.timestamp_threshold.ok_or_else(|| {
        IndexError::InvalidQuery("missing timestamp_threshold parameter".to_string())
    })?;
    let records = index.query_events(&threshold).await?;
    tracing::debug!(threshold, matched = records.len(), "point query");
    Ok(Json(records))
}

async fn aggregated_metrics(
    State(index): State<Arc<StreamingIndex>>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<Vec<AggregateRow>>> {
    let bucket = match params.bucket {
        Some(ref b) => b.parse::<TimeBucket>()?,
        None => TimeBucket::default(),
    };
    Ok(Json(index.aggregate_metrics_by(bucket).await?))
}

async fn get_event(
    State(index): State<Arc<StreamingIndex>>,
    Path(id): Path<String>,
) -> Result<Response> {
    match index.get_event(&id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("event {} not found", id) })),
        )
            .into_response()),
    }
}

async fn stats(State(index): State<Arc<StreamingIndex>>) -> Result<Json<StoreStats>> {
    Ok(Json(index.stats().await?))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn live_query(ws: WebSocketUpgrade, State(index): State<Arc<StreamingIndex>>) -> Response {
    ws.on_upgrade(move |socket| push_snapshot(socket, index))
}

/// Pushes one scan of the point index over `socket`, then closes it.
///
/// A client that disconnects or sends Close stops the feed; the scan is
/// released when the stream is dropped. A single send can still block on a
/// slow reader.
async fn push_snapshot(mut socket: WebSocket, index: Arc<StreamingIndex>) {
    let mut records = index.snapshot();
    let mut sent = 0usize;

    loop {
        tokio::select! {
            biased;

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        tracing::debug!(sent, "snapshot client went away");
                        return;
                    }
                    // Client messages carry no meaning on this channel.
                    Some(Ok(_)) => {}
                }
            }

            next = records.next() => {
                match next {
                    Some(Ok(record)) => {
                        let text = match serde_json::to_string(&record) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to encode snapshot record");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            tracing::debug!(sent, "snapshot client disconnected");
                            return;
                        }
                        sent += 1;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, sent, "snapshot scan failed");
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_INTERNAL_ERROR,
                                reason: "snapshot scan failed".into(),
                            })))
                            .await;
                        return;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::debug!(sent, "snapshot complete");
    let _ = socket.send(Message::Close(None)).await;
}
