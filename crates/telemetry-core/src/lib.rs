//! Core telemetry types for the GT7 race engineer.
//!
//! ## Modules
//! - `monitor` - Source Monitor state machine (`NoData` / `Live` / `Stale`)
//!   and its timing configuration
//!
//! The crate root holds the error taxonomy shared by every ingestion crate and
//! the [`LiveSource`] capability implemented by the UDP listener and the
//! subprocess bridge.

use async_trait::async_trait;
use gt7_telemetry_contracts::Sanitized;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod monitor;

pub use gt7_telemetry_contracts as contracts;
pub use monitor::{
    HealthReport, MonitorConfig, MonitorStatus, MonitorUpdate, SourceMonitor, SourceState,
    StateTransition,
};

/// Size in bytes of one GT7 telemetry datagram.
pub const GT7_PACKET_SIZE: usize = 296;

pub type LiveEventSender = mpsc::Sender<LiveEvent>;
pub type LiveEventReceiver = mpsc::Receiver<LiveEvent>;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Undersized packet: expected at least {expected} bytes, got {actual}")]
    UndersizedPacket { expected: usize, actual: usize },

    #[error("Telemetry transport failed on {addr}: {source}")]
    TransportFailure {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Telemetry source process `{command}` failed: {reason}")]
    SourceProcessFailure { command: String, reason: String },

    #[error("Ingestion is already running")]
    AlreadyRunning,

    #[error("Invalid telemetry configuration: {0}")]
    InvalidConfig(String),
}

impl TelemetryError {
    /// Whether the error came from the live source itself rather than a
    /// single bad packet or the caller.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            TelemetryError::TransportFailure { .. } | TelemetryError::SourceProcessFailure { .. }
        )
    }
}

/// Something a live source observed.
#[derive(Debug)]
pub enum LiveEvent {
    /// A raw datagram that still needs decoding.
    Datagram(Vec<u8>),
    /// A record the source already decoded and sanitized.
    Decoded(Sanitized),
    /// The source stopped delivering data. It may recover on its own.
    Failure(TelemetryError),
}

/// A feed of real telemetry.
///
/// Sources push everything they observe into the channel handed to
/// [`LiveSource::start`]; the receiving side decides what becomes the latest
/// snapshot. `stop` must be safe to call more than once.
#[async_trait]
pub trait LiveSource: Send {
    fn source_id(&self) -> &str;
    async fn start(&mut self, events: LiveEventSender) -> Result<(), TelemetryError>;
    async fn stop(&mut self) -> Result<(), TelemetryError>;
}
