//! HTTP query and notification boundary.
//!
//! - `GET /health` liveness probe
//! - `GET /telemetry` latest snapshot, or a "no data" body before the first publish
//! - `GET /telemetry/status` monitor state and ingestion counters
//! - `GET /telemetry/stream` server-sent `telemetry` events, one per publish

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use chrono::{DateTime, Utc};
use gt7_telemetry_contracts::{TelemetrySnapshot, TelemetrySource, TireTemps};
use gt7_telemetry_orchestrator::{IngestionService, IngestionStatus};
use serde::Serialize;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

pub const NO_TELEMETRY_MESSAGE: &str = "No telemetry data available";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<IngestionService>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// `shutdown` flipping to `true` (or its sender dropping) ends open event streams.
    pub fn new(service: Arc<IngestionService>, shutdown: watch::Receiver<bool>) -> Self {
        Self { service, shutdown }
    }
}

/// Snapshot in the snake_case shape HTTP clients consume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryView {
    pub current_lap: u16,
    pub total_laps: u16,
    pub position: u16,
    pub fuel_pct: f32,
    pub speed_kph: f32,
    pub engine_rpm: f32,
    pub last_lap_time_ms: u32,
    pub best_lap_time_ms: u32,
    pub delta_ms: i32,
    pub tire_temps: TireTemps,
    pub oil_pressure: f32,
    pub water_temp: f32,
    pub oil_temp: f32,
    pub total_cars: u8,
    pub is_loading: bool,
    pub connected: bool,
    pub source: TelemetrySource,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryView {
    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            current_lap: snapshot.current_lap,
            total_laps: snapshot.total_laps,
            position: snapshot.position,
            fuel_pct: snapshot.fuel_percent,
            speed_kph: snapshot.speed_kph,
            engine_rpm: snapshot.engine_rpm,
            last_lap_time_ms: snapshot.last_lap_time_ms,
            best_lap_time_ms: snapshot.best_lap_time_ms,
            delta_ms: snapshot.delta_ms,
            tire_temps: snapshot.tire_temps,
            oil_pressure: snapshot.oil_pressure,
            water_temp: snapshot.water_temp,
            oil_temp: snapshot.oil_temp,
            total_cars: snapshot.total_cars,
            is_loading: false,
            connected: true,
            source: snapshot.source,
            timestamp: snapshot.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoTelemetry {
    pub connected: bool,
    pub error: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryResponse {
    Snapshot(Box<TelemetryView>),
    Unavailable(NoTelemetry),
}

impl TelemetryResponse {
    pub fn from_latest(latest: Option<&TelemetrySnapshot>) -> Self {
        match latest {
            Some(snapshot) => Self::Snapshot(Box::new(TelemetryView::from_snapshot(snapshot))),
            None => Self::Unavailable(NoTelemetry {
                connected: false,
                error: NO_TELEMETRY_MESSAGE,
                timestamp: Utc::now(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/telemetry", get(telemetry_handler))
        .route("/telemetry/status", get(status_handler))
        .route("/telemetry/stream", get(stream_handler))
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

async fn telemetry_handler(State(state): State<AppState>) -> Json<TelemetryResponse> {
    let latest = state.service.latest();
    Json(TelemetryResponse::from_latest(latest.as_deref()))
}

async fn status_handler(State(state): State<AppState>) -> Json<IngestionStatus> {
    Json(state.service.status())
}

async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(snapshot_events(state)).keep_alive(KeepAlive::default())
}

fn snapshot_events(state: AppState) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut snapshots = state.service.subscribe();
    let mut shutdown = state.shutdown;

    async_stream::stream! {
        let already_stopping = *shutdown.borrow();
        if !already_stopping {
            loop {
                let received = tokio::select! {
                    _ = shutdown.changed() => break,
                    received = snapshots.recv() => received,
                };
                match received {
                    Ok(snapshot) => match Event::default().event("telemetry").json_data(&*snapshot) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(error = %e, "Failed to encode telemetry event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Telemetry stream client lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt7_telemetry_adapters::{MockLiveSource, PACKET_SIZE, decode_packet, synthetic};
    use gt7_telemetry_config::TelemetrySettings;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn live_snapshot() -> Result<TelemetrySnapshot, Box<dyn std::error::Error>> {
        let mut pkt = vec![0u8; PACKET_SIZE];
        pkt[0x78..0x7A].copy_from_slice(&5u16.to_le_bytes());
        pkt[0x7C..0x80].copy_from_slice(&92_500i32.to_le_bytes());
        pkt[0x80..0x84].copy_from_slice(&91_000i32.to_le_bytes());
        Ok(decode_packet(&pkt, Utc::now())?)
    }

    #[test]
    fn absent_snapshot_reports_disconnected() -> TestResult {
        let value = serde_json::to_value(TelemetryResponse::from_latest(None))?;
        assert_eq!(value["connected"], false);
        assert_eq!(value["error"], NO_TELEMETRY_MESSAGE);
        assert!(value["timestamp"].is_string());
        Ok(())
    }

    #[test]
    fn snapshot_view_uses_snake_case_fields() -> TestResult {
        let snapshot = live_snapshot()?;
        let value = serde_json::to_value(TelemetryResponse::from_latest(Some(&snapshot)))?;

        assert_eq!(value["current_lap"], 5);
        assert_eq!(value["last_lap_time_ms"], 92_500);
        assert_eq!(value["delta_ms"], 1_500);
        assert_eq!(value["fuel_pct"], 100.0);
        assert_eq!(value["tire_temps"]["fl"], 80.0);
        assert_eq!(value["is_loading"], false);
        assert_eq!(value["connected"], true);
        assert_eq!(value["source"], "live");
        Ok(())
    }

    #[test]
    fn synthetic_view_is_tagged() -> TestResult {
        let snapshot = synthetic::generate(Utc::now());
        let view = TelemetryView::from_snapshot(&snapshot);
        assert_eq!(view.source, TelemetrySource::Synthetic);
        assert!(view.connected);
        Ok(())
    }

    #[tokio::test]
    async fn telemetry_handler_serves_latest() -> TestResult {
        let (source, feed) = MockLiveSource::channel();
        let service = Arc::new(IngestionService::new(
            TelemetrySettings::default(),
            Box::new(source),
        ));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(Arc::clone(&service), shutdown_rx);

        let Json(before) = telemetry_handler(State(state.clone())).await;
        assert!(matches!(before, TelemetryResponse::Unavailable(_)));

        service.start().await?;
        let mut latest = service.watch_latest();
        let mut pkt = vec![0u8; PACKET_SIZE];
        pkt[0x78..0x7A].copy_from_slice(&9u16.to_le_bytes());
        assert!(feed.push_datagram(pkt).await);
        tokio::time::timeout(Duration::from_secs(2), latest.changed()).await??;

        let Json(after) = telemetry_handler(State(state.clone())).await;
        let TelemetryResponse::Snapshot(view) = after else {
            return Err("expected a snapshot".into());
        };
        assert_eq!(view.current_lap, 9);
        assert_eq!(view.source, TelemetrySource::Live);

        let Json(status) = status_handler(State(state)).await;
        assert_eq!(status.stats.accepted, 1);

        service.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn event_stream_forwards_snapshots_and_ends_on_shutdown() -> TestResult {
        let (source, feed) = MockLiveSource::channel();
        let service = Arc::new(IngestionService::new(
            TelemetrySettings::default(),
            Box::new(source),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(Arc::clone(&service), shutdown_rx);
        service.start().await?;

        let mut events = std::pin::pin!(snapshot_events(state));
        assert!(feed.push_datagram(vec![0u8; PACKET_SIZE]).await);
        let first = tokio::time::timeout(Duration::from_secs(2), events.next()).await?;
        assert!(matches!(first, Some(Ok(_))));

        shutdown_tx.send(true)?;
        let end = tokio::time::timeout(Duration::from_secs(2), events.next()).await?;
        assert!(end.is_none());

        service.stop().await?;
        Ok(())
    }
}
