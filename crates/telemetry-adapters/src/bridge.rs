//! Subprocess bridge live source.
//!
//! Runs a helper process that talks to the console and prints one JSON object
//! per line on stdout (roughly 20 Hz). A line of `null` means the helper is
//! connected but has nothing to report yet. Every object goes through the same
//! sanitization as a decoded UDP packet.
//!
//! When the helper cannot be spawned or exits, a
//! [`TelemetryError::SourceProcessFailure`] is reported and the helper is
//! restarted after a fixed backoff, up to `max_restarts` consecutive times.
//! The counter resets whenever a valid record arrives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gt7_telemetry_contracts::{RawTelemetry, Sanitized, TelemetrySource, sanitize};
use gt7_telemetry_core::{LiveEvent, LiveEventSender, LiveSource, TelemetryError};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BRIDGE_COMMAND: &str = "python3";
pub const DEFAULT_BRIDGE_SCRIPT: &str = "backend/gt7_bridge.py";
pub const DEFAULT_MAX_RESTARTS: u32 = 5;
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 5000;
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_millis(DEFAULT_RESTART_BACKOFF_MS);

/// How long a helper may linger after closing stdout before it is killed.
const STDOUT_CLOSED_GRACE: Duration = Duration::from_secs(2);

/// One line of bridge output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRecord {
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub current_lap: Option<f64>,
    #[serde(default)]
    pub total_laps: Option<f64>,
    #[serde(default)]
    pub speed_kph: Option<f64>,
    #[serde(default)]
    pub engine_rpm: Option<f64>,
    #[serde(default)]
    pub fuel_capacity: Option<f64>,
    #[serde(default)]
    pub fuel_level: Option<f64>,
    #[serde(default)]
    pub last_lap_time_ms: Option<f64>,
    #[serde(default)]
    pub best_lap_time_ms: Option<f64>,
    #[serde(default, rename = "tireTempFL")]
    pub tire_temp_fl: Option<f64>,
    #[serde(default, rename = "tireTempFR")]
    pub tire_temp_fr: Option<f64>,
    #[serde(default, rename = "tireTempRL")]
    pub tire_temp_rl: Option<f64>,
    #[serde(default, rename = "tireTempRR")]
    pub tire_temp_rr: Option<f64>,
    #[serde(default)]
    pub oil_pressure: Option<f64>,
    #[serde(default)]
    pub water_temp: Option<f64>,
    #[serde(default)]
    pub oil_temp: Option<f64>,
    #[serde(default)]
    pub total_cars: Option<f64>,
    /// Unix time in seconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default, rename = "is_valid")]
    pub is_valid: Option<bool>,
}

fn float(value: Option<f64>) -> Option<f32> {
    value.map(|v| v as f32)
}

fn integer(value: Option<f64>) -> Option<i64> {
    value.filter(|v| v.is_finite()).map(|v| v.round() as i64)
}

impl BridgeRecord {
    pub fn to_raw(&self) -> RawTelemetry {
        RawTelemetry {
            position: integer(self.position),
            total_cars: integer(self.total_cars),
            current_lap: integer(self.current_lap),
            total_laps: integer(self.total_laps),
            speed_kph: float(self.speed_kph),
            engine_rpm: float(self.engine_rpm),
            fuel_capacity: float(self.fuel_capacity),
            fuel_level: float(self.fuel_level),
            last_lap_time_ms: integer(self.last_lap_time_ms),
            best_lap_time_ms: integer(self.best_lap_time_ms),
            tire_temps: [
                float(self.tire_temp_fl),
                float(self.tire_temp_fr),
                float(self.tire_temp_rl),
                float(self.tire_temp_rr),
            ],
            oil_pressure: float(self.oil_pressure),
            water_temp: float(self.water_temp),
            oil_temp: float(self.oil_temp),
        }
    }

    fn captured_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.filter(|t| t.is_finite() && *t > 0.0)?;
        DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
    }
}

/// Parse one line of bridge output.
///
/// Returns `Ok(None)` for blank lines, `null` and records flagged invalid.
///
/// # Errors
///
/// Returns the JSON error when the line is not a bridge record.
pub fn parse_bridge_line(
    line: &str,
    received_at: DateTime<Utc>,
) -> Result<Option<Sanitized>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: Option<BridgeRecord> = serde_json::from_str(line)?;
    Ok(record
        .filter(|r| r.is_valid != Some(false))
        .map(|r| {
            let captured_at = r.captured_at().unwrap_or(received_at);
            sanitize(r.to_raw(), captured_at, TelemetrySource::Live)
        }))
}

enum ChildOutcome {
    Shutdown,
    ReceiverGone,
    Exited(String),
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct BridgeLiveSource {
    command: String,
    args: Vec<String>,
    max_restarts: u32,
    restart_backoff: Duration,
    running: Option<Running>,
}

impl Default for BridgeLiveSource {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_COMMAND, vec![DEFAULT_BRIDGE_SCRIPT.to_string()])
    }
}

impl BridgeLiveSource {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            running: None,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

struct Supervisor {
    command: String,
    args: Vec<String>,
    max_restarts: u32,
    restart_backoff: Duration,
    events: LiveEventSender,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    fn failure(&self, reason: String) -> LiveEvent {
        LiveEvent::Failure(TelemetryError::SourceProcessFailure {
            command: self.command.clone(),
            reason,
        })
    }

    /// Send an event unless shutdown arrives first.
    async fn emit(&mut self, event: LiveEvent) -> Result<(), ChildOutcome> {
        tokio::select! {
            _ = self.shutdown.changed() => Err(ChildOutcome::Shutdown),
            sent = self.events.send(event) => sent.map_err(|_closed| ChildOutcome::ReceiverGone),
        }
    }

    async fn run(mut self) {
        let mut restarts = 0u32;

        loop {
            let outcome = match Command::new(&self.command)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => {
                    info!(command = %self.command, pid = ?child.id(), "GT7 bridge process started");
                    self.pump(child, &mut restarts).await
                }
                Err(e) => ChildOutcome::Exited(format!("spawn failed: {e}")),
            };

            let reason = match outcome {
                ChildOutcome::Shutdown | ChildOutcome::ReceiverGone => break,
                ChildOutcome::Exited(reason) => reason,
            };

            warn!(command = %self.command, %reason, "GT7 bridge process failed");
            let failure = self.failure(reason);
            if self.emit(failure).await.is_err() {
                break;
            }

            if restarts >= self.max_restarts {
                error!(
                    command = %self.command,
                    max_restarts = self.max_restarts,
                    "GT7 bridge restart limit reached, giving up"
                );
                break;
            }
            restarts = restarts.saturating_add(1);
            info!(
                attempt = restarts,
                max_restarts = self.max_restarts,
                backoff_ms = self.restart_backoff.as_millis(),
                "Restarting GT7 bridge process"
            );

            tokio::select! {
                _ = self.shutdown.changed() => break,
                _ = tokio::time::sleep(self.restart_backoff) => {}
            }
        }
        debug!(command = %self.command, "GT7 bridge supervisor stopped");
    }

    async fn pump(&mut self, mut child: Child, restarts: &mut u32) -> ChildOutcome {
        let Some(stdout) = child.stdout.take() else {
            kill(&mut child).await;
            return ChildOutcome::Exited("stdout not captured".to_string());
        };
        let mut lines = BufReader::new(stdout).lines();

        let outcome = loop {
            let line = tokio::select! {
                _ = self.shutdown.changed() => break ChildOutcome::Shutdown,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => match parse_bridge_line(&line, Utc::now()) {
                    Ok(Some(decoded)) => {
                        *restarts = 0;
                        if let Err(outcome) = self.emit(LiveEvent::Decoded(decoded)).await {
                            break outcome;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Ignoring malformed GT7 bridge line"),
                },
                Ok(None) => break ChildOutcome::Exited(String::new()),
                Err(e) => break ChildOutcome::Exited(format!("stdout read failed: {e}")),
            }
        };

        let reason = match outcome {
            ChildOutcome::Exited(reason) => reason,
            other => {
                kill(&mut child).await;
                return other;
            }
        };

        // Output is gone; give the process a moment to exit before killing it.
        let waited = tokio::select! {
            _ = self.shutdown.changed() => None,
            waited = tokio::time::timeout(STDOUT_CLOSED_GRACE, child.wait()) => Some(waited),
        };
        let status = match waited {
            None => {
                kill(&mut child).await;
                return ChildOutcome::Shutdown;
            }
            Some(Ok(Ok(status))) => format!("exited with {status}"),
            Some(Ok(Err(e))) => format!("wait failed: {e}"),
            Some(Err(_elapsed)) => {
                kill(&mut child).await;
                "still running after closing stdout, killed".to_string()
            }
        };
        if reason.is_empty() {
            ChildOutcome::Exited(status)
        } else {
            ChildOutcome::Exited(format!("{reason} ({status})"))
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "GT7 bridge process already gone");
    }
}

#[async_trait]
impl LiveSource for BridgeLiveSource {
    fn source_id(&self) -> &str {
        "bridge"
    }

    async fn start(&mut self, events: LiveEventSender) -> Result<(), TelemetryError> {
        if self.running.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor {
            command: self.command.clone(),
            args: self.args.clone(),
            max_restarts: self.max_restarts,
            restart_backoff: self.restart_backoff,
            events,
            shutdown: shutdown_rx,
        };
        info!(command = %self.command_line(), "Starting GT7 bridge");
        let task = tokio::spawn(supervisor.run());

        self.running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TelemetryError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        if running.shutdown.send(true).is_err() {
            debug!("GT7 bridge supervisor already finished");
        }
        if let Err(e) = running.task.await {
            warn!(error = %e, "GT7 bridge supervisor ended abnormally");
        }
        Ok(())
    }
}

impl Drop for BridgeLiveSource {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}
