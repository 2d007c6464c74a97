//! GT7 telemetry ingestion.
//!
//! [`IngestionService`] owns one live source (UDP listener or subprocess
//! bridge), feeds its output through the decoder and the
//! [`SourceMonitor`](gt7_telemetry_core::SourceMonitor), and falls back to
//! synthetic telemetry whenever the live feed has never started or has gone
//! silent. Consumers read the latest snapshot or subscribe to every publish.

pub mod ingestion;
mod stats;

pub use ingestion::{IngestionService, IngestionStatus, live_source_for};
pub use stats::StatsSnapshot;
