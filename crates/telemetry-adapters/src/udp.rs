//! UDP live source: receives raw GT7 datagrams and forwards them undecoded.

use async_trait::async_trait;
use gt7_telemetry_core::{LiveEvent, LiveEventSender, LiveSource, TelemetryError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default port the telemetry relay sends GT7 packets to.
pub const DEFAULT_UDP_PORT: u16 = 33742;

/// Large enough for every known GT7 packet variant.
const RECV_BUFFER_SIZE: usize = 2048;

/// A debug line is logged every this many datagrams.
const LOG_EVERY_PACKETS: u64 = 100;

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct UdpLiveSource {
    bind_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    running: Option<Running>,
}

impl Default for UdpLiveSource {
    fn default() -> Self {
        Self::new(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            DEFAULT_UDP_PORT,
        ))
    }
}

impl UdpLiveSource {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            local_addr: None,
            running: None,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Address actually bound, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

#[async_trait]
impl LiveSource for UdpLiveSource {
    fn source_id(&self) -> &str {
        "udp"
    }

    async fn start(&mut self, events: LiveEventSender) -> Result<(), TelemetryError> {
        if self.running.is_some() {
            return Err(TelemetryError::AlreadyRunning);
        }

        let addr = self.bind_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TelemetryError::TransportFailure { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TelemetryError::TransportFailure { addr, source })?;
        info!(%local_addr, "GT7 UDP listener bound");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            let mut received = 0u64;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, src)) => {
                            received = received.saturating_add(1);
                            if received % LOG_EVERY_PACKETS == 0 {
                                debug!(packets_received = received, %src, len, "GT7 datagrams received");
                            }
                            let datagram = buf.get(..len).map(<[u8]>::to_vec).unwrap_or_default();
                            if events.send(LiveEvent::Datagram(datagram)).await.is_err() {
                                debug!("Event receiver dropped, stopping GT7 UDP listener");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "GT7 UDP receive error"),
                    },
                }
            }
            info!(%local_addr, packets_received = received, "GT7 UDP listener stopped");
        });

        self.local_addr = Some(local_addr);
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
        // The task may already have exited on its own.
        if running.shutdown.send(()).is_err() {
            debug!("GT7 UDP listener already finished");
        }
        if let Err(e) = running.task.await {
            warn!(error = %e, "GT7 UDP listener task ended abnormally");
        }
        self.local_addr = None;
        Ok(())
    }
}

impl Drop for UdpLiveSource {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}
