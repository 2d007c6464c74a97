//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const CRATE_TARGETS: [&str; 6] = [
    "gt7d",
    "gt7_engineer_service",
    "gt7_telemetry_orchestrator",
    "gt7_telemetry_adapters",
    "gt7_telemetry_core",
    "gt7_telemetry_config",
];

/// Level applied to the workspace crates for a given `-v` count.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(verbose: u8) -> String {
    let level = level_for_verbosity(verbose);
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_workspace_level_only() {
        assert_eq!(default_directives(0).split(',').next(), Some("warn"));
        assert!(default_directives(0).contains("gt7_telemetry_orchestrator=info"));
        assert!(default_directives(1).contains("gt7d=debug"));
        assert!(default_directives(5).contains("gt7_telemetry_adapters=trace"));
    }

    #[test]
    fn directives_parse_as_a_filter() {
        for verbose in 0..3 {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
    }
}
