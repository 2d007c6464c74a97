//! Source Monitor: decides whether the live feed or the synthetic generator
//! supplies the latest snapshot.
//!
//! The monitor never reads a clock itself. Every operation takes `now`, so the
//! caller (one control loop) serializes arrivals and checks, and tests can
//! drive it with fabricated instants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 30_000;
pub const DEFAULT_BOOTSTRAP_GRACE_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often the health of the live feed is reported.
    pub health_check_interval_ms: u64,
    /// Maximum silence after the last arrival before the feed is stale.
    pub freshness_window_ms: u64,
    /// How long to wait for a first packet before falling back to synthetic.
    pub bootstrap_grace_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            bootstrap_grace_ms: DEFAULT_BOOTSTRAP_GRACE_MS,
        }
    }
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn bootstrap_grace(&self) -> Duration {
        Duration::from_millis(self.bootstrap_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// No packet has ever arrived.
    #[default]
    NoData,
    /// Packets are arriving inside the freshness window.
    Live,
    /// Packets were arriving but have stopped.
    Stale,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::NoData => "no_data",
            SourceState::Live => "live",
            SourceState::Stale => "stale",
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SourceState,
    pub to: SourceState,
}

/// What changed in one call into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorUpdate {
    pub transition: Option<StateTransition>,
    /// `Some(true)` when synthetic refresh just started, `Some(false)` when it
    /// was just suspended.
    pub synthetic_changed: Option<bool>,
}

impl MonitorUpdate {
    pub fn is_empty(&self) -> bool {
        self.transition.is_none() && self.synthetic_changed.is_none()
    }
}

/// Result of a periodic health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthReport {
    AwaitingFirstPacket { waited: Duration },
    Silent { since_last: Duration },
    Healthy { packets_received: u64 },
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthReport::AwaitingFirstPacket { waited } => {
                write!(f, "no packets received yet ({}s)", waited.as_secs())
            }
            HealthReport::Silent { since_last } => {
                write!(f, "no packets for {}s", since_last.as_secs())
            }
            HealthReport::Healthy { packets_received } => {
                write!(f, "healthy, {packets_received} packets received")
            }
        }
    }
}

/// Point-in-time view of the monitor for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub state: SourceState,
    pub synthetic_active: bool,
    pub packets_received: u64,
    pub synthetic_activations: u64,
    pub since_last_packet_ms: Option<u64>,
    pub uptime_ms: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug)]
pub struct SourceMonitor {
    config: MonitorConfig,
    started_at: Instant,
    last_arrival: Option<Instant>,
    packets_received: u64,
    state: SourceState,
    synthetic_active: bool,
    synthetic_activations: u64,
}

impl SourceMonitor {
    pub fn new(config: MonitorConfig, now: Instant) -> Self {
        Self {
            config,
            started_at: now,
            last_arrival: None,
            packets_received: 0,
            state: SourceState::NoData,
            synthetic_active: false,
            synthetic_activations: 0,
        }
    }

    pub fn with_defaults(now: Instant) -> Self {
        Self::new(MonitorConfig::default(), now)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn is_synthetic_active(&self) -> bool {
        self.synthetic_active
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Number of times synthetic refresh has started.
    pub fn synthetic_activations(&self) -> u64 {
        self.synthetic_activations
    }

    pub fn time_since_last_packet(&self, now: Instant) -> Option<Duration> {
        self.last_arrival
            .map(|last| now.saturating_duration_since(last))
    }

    /// Record a successfully decoded live packet.
    ///
    /// This is the only way into [`SourceState::Live`].
    pub fn record_arrival(&mut self, now: Instant) -> MonitorUpdate {
        self.last_arrival = Some(now);
        self.packets_received = self.packets_received.saturating_add(1);

        MonitorUpdate {
            transition: self.transition_to(SourceState::Live),
            synthetic_changed: self.set_synthetic(false),
        }
    }

    /// Re-evaluate freshness and the synthetic flag at `now`.
    pub fn evaluate(&mut self, now: Instant) -> MonitorUpdate {
        let transition = match (self.state, self.last_arrival) {
            (SourceState::Live, Some(last))
                if now.saturating_duration_since(last) > self.config.freshness_window() =>
            {
                self.transition_to(SourceState::Stale)
            }
            _ => None,
        };

        let synthetic = match self.state {
            SourceState::Live => false,
            SourceState::Stale => true,
            SourceState::NoData => {
                self.packets_received == 0
                    && now.saturating_duration_since(self.started_at)
                        > self.config.bootstrap_grace()
            }
        };

        MonitorUpdate {
            transition,
            synthetic_changed: self.set_synthetic(synthetic),
        }
    }

    /// Periodic health check: re-evaluates and reports on the live feed.
    pub fn check_health(&mut self, now: Instant) -> (HealthReport, MonitorUpdate) {
        let update = self.evaluate(now);
        let report = match self.time_since_last_packet(now) {
            None => HealthReport::AwaitingFirstPacket {
                waited: now.saturating_duration_since(self.started_at),
            },
            Some(since_last) if since_last > self.config.freshness_window() => {
                HealthReport::Silent { since_last }
            }
            Some(_) => HealthReport::Healthy {
                packets_received: self.packets_received,
            },
        };
        (report, update)
    }

    pub fn status(&self, now: Instant) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            synthetic_active: self.synthetic_active,
            packets_received: self.packets_received,
            synthetic_activations: self.synthetic_activations,
            since_last_packet_ms: self.time_since_last_packet(now).map(millis),
            uptime_ms: millis(now.saturating_duration_since(self.started_at)),
        }
    }

    fn transition_to(&mut self, new_state: SourceState) -> Option<StateTransition> {
        if self.state == new_state {
            return None;
        }
        let from = self.state;
        self.state = new_state;
        Some(StateTransition { from, to: new_state })
    }

    fn set_synthetic(&mut self, active: bool) -> Option<bool> {
        if self.synthetic_active == active {
            return None;
        }
        self.synthetic_active = active;
        if active {
            self.synthetic_activations = self.synthetic_activations.saturating_add(1);
        }
        Some(active)
    }
}
