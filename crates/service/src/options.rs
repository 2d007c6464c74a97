//! Command-line options and how they override the configuration file.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use gt7_telemetry_config::{Gt7Config, SourceConfig};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "gt7d")]
#[command(about = "GT7 telemetry ingestion daemon")]
#[command(version)]
pub struct Args {
    /// Configuration file (YAML, or JSON by extension). A missing file means defaults.
    #[arg(short, long, default_value = "gt7d.yaml")]
    pub config: PathBuf,

    /// UDP port to listen on for console packets
    #[arg(long)]
    pub udp_port: Option<u16>,

    /// HTTP port for the query and stream endpoints
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Live telemetry source
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Never publish synthetic telemetry
    #[arg(long)]
    pub no_synthetic: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Udp,
    Bridge,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Udp => "udp",
            SourceKind::Bridge => "bridge",
        }
    }
}

impl Args {
    /// Apply flag overrides on top of a loaded configuration.
    ///
    /// Switching `--source` to a different kind starts from that kind's
    /// defaults; keeping the same kind preserves the file's settings.
    pub fn apply_to(&self, config: &mut Gt7Config) {
        if let Some(kind) = self.source {
            if config.telemetry.source.kind() != kind.as_str() {
                config.telemetry.source = match kind {
                    SourceKind::Udp => SourceConfig::default_udp(),
                    SourceKind::Bridge => SourceConfig::default_bridge(),
                };
            }
        }

        if let Some(udp_port) = self.udp_port {
            match &mut config.telemetry.source {
                SourceConfig::Udp { port, .. } => *port = udp_port,
                SourceConfig::Bridge { .. } => {
                    warn!(udp_port, "Ignoring --udp-port for the bridge source");
                }
            }
        }

        if let Some(http_port) = self.http_port {
            config.server.port = http_port;
        }

        if self.no_synthetic {
            config.telemetry.synthetic.enabled = false;
        }
    }
}
