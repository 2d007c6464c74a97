//! GT7 telemetry daemon (`gt7d`).
//!
//! Wires the ingestion service to its outer surfaces: command-line options,
//! logging, and the HTTP query and event-stream endpoints.

pub mod http;
pub mod logging;
pub mod options;

pub use http::{AppState, router, serve};
pub use options::{Args, SourceKind};
