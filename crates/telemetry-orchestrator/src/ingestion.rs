//! Ingestion Service: the single control loop that turns live packets and
//! synthetic ticks into the latest snapshot.
//!
//! All monitor mutation and every publish happens on the control loop task,
//! so a live arrival and a synthetic tick can never interleave. Readers see
//! whichever snapshot the loop published last.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use gt7_telemetry_adapters::{
    BridgeLiveSource, LiveEvent, LiveEventReceiver, LiveSource, TelemetryError, UdpLiveSource,
    decode_with_report, synthetic,
};
use gt7_telemetry_config::{SourceConfig, TelemetrySettings};
use gt7_telemetry_contracts::{Sanitized, TelemetrySnapshot};
use gt7_telemetry_core::{HealthReport, MonitorStatus, MonitorUpdate, SourceMonitor};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::stats::{IngestionStats, StatsSnapshot};

/// Capacity of the channel between the live source and the control loop.
const LIVE_EVENT_BUFFER: usize = 512;
/// A debug line is logged every this many accepted live records.
const LOG_EVERY_PACKETS: u64 = 100;
const MIN_TICK: Duration = Duration::from_millis(1);

/// Monotonic clock that follows tokio's paused time in tests.
fn clock_now() -> std::time::Instant {
    time::Instant::now().into_std()
}

/// Build the live source selected by configuration.
pub fn live_source_for(source: &SourceConfig) -> Box<dyn LiveSource> {
    match source {
        SourceConfig::Udp { bind_address, port } => Box::new(UdpLiveSource::new(
            std::net::SocketAddr::new(*bind_address, *port),
        )),
        SourceConfig::Bridge {
            command,
            args,
            max_restarts,
            restart_backoff_ms,
        } => Box::new(
            BridgeLiveSource::new(command.clone(), args.clone())
                .with_max_restarts(*max_restarts)
                .with_restart_backoff(Duration::from_millis(*restart_backoff_ms)),
        ),
    }
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionStatus {
    pub running: bool,
    pub source: String,
    pub synthetic_enabled: bool,
    pub monitor: MonitorStatus,
    pub stats: StatsSnapshot,
    pub last_source_error: Option<String>,
}

struct Shared {
    latest: watch::Sender<Option<Arc<TelemetrySnapshot>>>,
    events: broadcast::Sender<Arc<TelemetrySnapshot>>,
    monitor: Mutex<SourceMonitor>,
    stats: IngestionStats,
    last_source_error: Mutex<Option<String>>,
    running: AtomicBool,
    synthetic_enabled: bool,
}

impl Shared {
    fn publish(&self, snapshot: TelemetrySnapshot) {
        let snapshot = Arc::new(snapshot);
        self.latest.send_replace(Some(Arc::clone(&snapshot)));
        // No subscribers is fine.
        let _receivers = self.events.send(snapshot).unwrap_or(0);
    }

    fn log_update(update: MonitorUpdate) {
        if let Some(transition) = update.transition {
            info!(from = %transition.from, to = %transition.to, "Telemetry source state changed");
        }
        match update.synthetic_changed {
            Some(true) => info!("No live telemetry, starting synthetic telemetry"),
            Some(false) => info!("Live telemetry received, synthetic telemetry suspended"),
            None => {}
        }
    }

    fn handle_live_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::Datagram(bytes) => match decode_with_report(&bytes, Utc::now()) {
                Ok(decoded) => self.accept_live(decoded),
                Err(e) => {
                    let rejected = self.stats.record_rejected();
                    warn!(error = %e, rejected_total = rejected, "Dropping GT7 packet");
                }
            },
            LiveEvent::Decoded(decoded) => self.accept_live(decoded),
            LiveEvent::Failure(e) => {
                let failures = self.stats.record_live_failure();
                warn!(error = %e, failures_total = failures, "Live telemetry source failed");
                *self.last_source_error.lock() = Some(e.to_string());
            }
        }
    }

    fn accept_live(&self, decoded: Sanitized) {
        for adjustment in &decoded.adjustments {
            debug!(
                field = adjustment.field,
                raw = ?adjustment.raw,
                applied = adjustment.applied,
                reason = %adjustment.reason,
                "Sanitized telemetry field"
            );
        }

        let accepted = self.stats.record_accepted(decoded.adjustments.len());
        if accepted % LOG_EVERY_PACKETS == 0 {
            debug!(packets_received = accepted, "Live telemetry flowing");
        }

        let update = self.monitor.lock().record_arrival(clock_now());
        Self::log_update(update);

        self.publish(decoded.snapshot);
        self.stats.record_live_published();
    }

    fn refresh(&self) {
        let (update, synthetic_active) = {
            let mut monitor = self.monitor.lock();
            let update = monitor.evaluate(clock_now());
            (update, monitor.is_synthetic_active())
        };
        Self::log_update(update);

        if self.synthetic_enabled && synthetic_active {
            self.publish(synthetic::generate(Utc::now()));
            self.stats.record_synthetic_published();
        }
    }

    fn health_check(&self) {
        let (report, update) = self.monitor.lock().check_health(clock_now());
        Self::log_update(update);
        match report {
            HealthReport::Healthy { packets_received } => {
                debug!(packets_received, "Telemetry health: {report}");
            }
            HealthReport::AwaitingFirstPacket { .. } | HealthReport::Silent { .. } => {
                info!("Telemetry health: {report}");
            }
        }
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    health_period: Duration,
    refresh_period: Duration,
    mut live_rx: LiveEventReceiver,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let health_period = health_period.max(MIN_TICK);
    let mut health = time::interval_at(time::Instant::now() + health_period, health_period);
    health.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut refresh = time::interval(refresh_period.max(MIN_TICK));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut live_open = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            event = live_rx.recv(), if live_open => match event {
                Some(event) => shared.handle_live_event(event),
                None => {
                    live_open = false;
                    info!("Live telemetry source closed its channel");
                }
            },
            _ = health.tick() => shared.health_check(),
            _ = refresh.tick() => shared.refresh(),
        }
    }
    debug!("Telemetry control loop stopped");
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    source: Box<dyn LiveSource>,
    running: Option<Running>,
}

/// Owns the live source and publishes the latest snapshot.
pub struct IngestionService {
    settings: TelemetrySettings,
    source_id: String,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl IngestionService {
    /// Create a service around an explicit live source.
    pub fn new(settings: TelemetrySettings, source: Box<dyn LiveSource>) -> Self {
        let (latest, _) = watch::channel(None);
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let shared = Arc::new(Shared {
            latest,
            events,
            monitor: Mutex::new(SourceMonitor::new(settings.monitor.clone(), clock_now())),
            stats: IngestionStats::default(),
            last_source_error: Mutex::new(None),
            running: AtomicBool::new(false),
            synthetic_enabled: settings.synthetic.enabled,
        });

        Self {
            source_id: source.source_id().to_string(),
            settings,
            shared,
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                source,
                running: None,
            }),
        }
    }

    /// Create a service with the live source named in `settings`.
    pub fn from_settings(settings: TelemetrySettings) -> Self {
        let source = live_source_for(&settings.source);
        Self::new(settings, source)
    }

    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }

    /// Start the live source and the control loop.
    ///
    /// The control loop (health checks and synthetic fallback) keeps running
    /// even when the live source fails to start; that failure is returned
    /// once so the caller can report it. A restart begins with no snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::AlreadyRunning`] if the service was started
    /// already, or the live source's start error (for example
    /// [`TelemetryError::TransportFailure`]).
    pub async fn start(&self) -> Result<(), TelemetryError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }

        *self.shared.monitor.lock() = SourceMonitor::new(self.settings.monitor.clone(), clock_now());
        *self.shared.last_source_error.lock() = None;
        self.shared.latest.send_replace(None);

        let (live_tx, live_rx) = mpsc::channel(LIVE_EVENT_BUFFER);
        let source_result = lifecycle.source.start(live_tx).await;
        if let Err(e) = &source_result {
            error!(source = %self.source_id, error = %e, "Live telemetry source failed to start");
            self.shared.stats.record_live_failure();
            *self.shared.last_source_error.lock() = Some(e.to_string());
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(control_loop(
            Arc::clone(&self.shared),
            self.settings.monitor.health_check_interval(),
            self.settings.synthetic.refresh_interval(),
            live_rx,
            shutdown_rx,
        ));
        lifecycle.running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
        self.shared.running.store(true, Ordering::Release);

        info!(
            source = %self.source_id,
            synthetic = self.settings.synthetic.enabled,
            bootstrap_grace_ms = self.settings.monitor.bootstrap_grace_ms,
            freshness_window_ms = self.settings.monitor.freshness_window_ms,
            "Telemetry ingestion started"
        );
        source_result
    }

    /// Stop the control loop and release the live source. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the live source's error if releasing it failed.
    pub async fn stop(&self) -> Result<(), TelemetryError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            return Ok(());
        };

        if running.shutdown.send(()).is_err() {
            debug!("Telemetry control loop already finished");
        }
        if let Err(e) = running.task.await {
            warn!(error = %e, "Telemetry control loop ended abnormally");
        }
        self.shared.running.store(false, Ordering::Release);

        let result = lifecycle.source.stop().await;
        info!(source = %self.source_id, "Telemetry ingestion stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The most recently published snapshot, live or synthetic.
    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.shared.latest.borrow().clone()
    }

    /// Receive every snapshot as it is published.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetrySnapshot>> {
        self.shared.events.subscribe()
    }

    /// Watch the latest snapshot without queuing intermediate ones.
    pub fn watch_latest(&self) -> watch::Receiver<Option<Arc<TelemetrySnapshot>>> {
        self.shared.latest.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn status(&self) -> IngestionStatus {
        IngestionStatus {
            running: self.is_running(),
            source: self.source_id.clone(),
            synthetic_enabled: self.shared.synthetic_enabled,
            monitor: self.shared.monitor.lock().status(clock_now()),
            stats: self.shared.stats.snapshot(),
            last_source_error: self.shared.last_source_error.lock().clone(),
        }
    }
}

impl Drop for IngestionService {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().running.take() {
            running.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt7_telemetry_adapters::MockLiveSource;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn live_source_for_selects_by_kind() {
        let udp = live_source_for(&SourceConfig::default_udp());
        assert_eq!(udp.source_id(), "udp");

        let bridge = live_source_for(&SourceConfig::default_bridge());
        assert_eq!(bridge.source_id(), "bridge");
    }

    #[tokio::test(start_paused = true)]
    async fn status_before_start() -> TestResult {
        let (source, _feed) = MockLiveSource::channel();
        let service = IngestionService::new(TelemetrySettings::default(), Box::new(source));

        assert!(service.latest().is_none());
        let status = service.status();
        assert!(!status.running);
        assert_eq!(status.source, "mock");
        assert!(status.synthetic_enabled);
        assert_eq!(status.stats, StatsSnapshot::default());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected() -> TestResult {
        let (source, _feed) = MockLiveSource::channel();
        let service = IngestionService::new(TelemetrySettings::default(), Box::new(source));

        service.start().await?;
        assert!(matches!(
            service.start().await,
            Err(TelemetryError::AlreadyRunning)
        ));
        service.stop().await?;
        Ok(())
    }
}
