//! GT7 telemetry adapters.
//!
//! This crate provides the protocol side of ingestion: the packet decoder,
//! the two live sources (raw UDP and the subprocess bridge) and the synthetic
//! generator that stands in for them while they are silent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use gt7_telemetry_core::{
    LiveEvent, LiveEventReceiver, LiveEventSender, LiveSource, TelemetryError,
};

pub mod bridge;
pub mod gran_turismo_7;
pub mod synthetic;
pub mod udp;

pub use bridge::{BridgeLiveSource, BridgeRecord, parse_bridge_line};
pub use gran_turismo_7::{PACKET_SIZE, decode_packet, decode_with_report};
pub use udp::{DEFAULT_UDP_PORT, UdpLiveSource};

/// Mock live source for tests and demos.
///
/// Events are injected through the paired [`MockFeed`] once the source has
/// been started.
pub struct MockLiveSource {
    slot: Arc<Mutex<Option<LiveEventSender>>>,
    fail_start: bool,
}

/// Handle that pushes events into a started [`MockLiveSource`].
#[derive(Clone)]
pub struct MockFeed {
    slot: Arc<Mutex<Option<LiveEventSender>>>,
}

impl MockLiveSource {
    pub fn channel() -> (Self, MockFeed) {
        let slot = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
                fail_start: false,
            },
            MockFeed { slot },
        )
    }

    /// Make `start` fail the way an unbindable socket does.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl MockFeed {
    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Push an event. Returns `false` when the source is not running.
    pub async fn push(&self, event: LiveEvent) -> bool {
        let sender = self.slot.lock().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn push_datagram(&self, bytes: Vec<u8>) -> bool {
        self.push(LiveEvent::Datagram(bytes)).await
    }
}

#[async_trait]
impl LiveSource for MockLiveSource {
    fn source_id(&self) -> &str {
        "mock"
    }

    async fn start(&mut self, events: LiveEventSender) -> Result<(), TelemetryError> {
        if self.fail_start {
            return Err(TelemetryError::TransportFailure {
                addr: std::net::SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "mock bind failure"),
            });
        }
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }
        *slot = Some(events);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TelemetryError> {
        self.slot.lock().take();
        Ok(())
    }
}
