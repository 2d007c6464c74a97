//! File-backed configuration for the GT7 race engineer service.
//!
//! Configuration is read from YAML (`.yaml`/`.yml`) or JSON (`.json`). Every
//! section has defaults, so a missing file or a partial file is fine:
//!
//! ```yaml
//! telemetry:
//!   source:
//!     kind: udp
//!     port: 33742
//!   monitor:
//!     freshness_window_ms: 30000
//!   synthetic:
//!     enabled: true
//! server:
//!   port: 3001
//! ```

use anyhow::{Context, Result, bail};
use gt7_telemetry_core::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use gt7_telemetry_adapters::DEFAULT_UDP_PORT;
pub use gt7_telemetry_adapters::bridge::{
    DEFAULT_BRIDGE_COMMAND, DEFAULT_BRIDGE_SCRIPT, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_BACKOFF_MS,
};

pub const DEFAULT_HTTP_PORT: u16 = 3001;
/// 20 Hz.
pub const DEFAULT_SYNTHETIC_REFRESH_MS: u64 = 50;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

fn unspecified() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_bridge_command() -> String {
    DEFAULT_BRIDGE_COMMAND.to_string()
}

fn default_bridge_args() -> Vec<String> {
    vec![DEFAULT_BRIDGE_SCRIPT.to_string()]
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_restart_backoff_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_MS
}

/// Which live source feeds the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Listen for raw GT7 datagrams.
    Udp {
        #[serde(default = "unspecified")]
        bind_address: IpAddr,
        #[serde(default = "default_udp_port")]
        port: u16,
    },
    /// Run a helper process that prints JSON records.
    Bridge {
        #[serde(default = "default_bridge_command")]
        command: String,
        #[serde(default = "default_bridge_args")]
        args: Vec<String>,
        #[serde(default = "default_max_restarts")]
        max_restarts: u32,
        #[serde(default = "default_restart_backoff_ms")]
        restart_backoff_ms: u64,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::default_udp()
    }
}

impl SourceConfig {
    pub fn default_udp() -> Self {
        SourceConfig::Udp {
            bind_address: unspecified(),
            port: DEFAULT_UDP_PORT,
        }
    }

    pub fn default_bridge() -> Self {
        SourceConfig::Bridge {
            command: default_bridge_command(),
            args: default_bridge_args(),
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_backoff_ms: DEFAULT_RESTART_BACKOFF_MS,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Udp { .. } => "udp",
            SourceConfig::Bridge { .. } => "bridge",
        }
    }

    /// Socket address for the UDP source, `None` for the bridge.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        match self {
            SourceConfig::Udp { bind_address, port } => Some(SocketAddr::new(*bind_address, *port)),
            SourceConfig::Bridge { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Fall back to generated telemetry while the live feed is silent.
    pub enabled: bool,
    pub refresh_interval_ms: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_ms: DEFAULT_SYNTHETIC_REFRESH_MS,
        }
    }
}

impl SyntheticConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub source: SourceConfig,
    pub monitor: MonitorConfig,
    pub synthetic: SyntheticConfig,
    /// Capacity of the snapshot notification channel.
    pub event_buffer: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            monitor: MonitorConfig::default(),
            synthetic: SyntheticConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: unspecified(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gt7Config {
    pub telemetry: TelemetrySettings,
    pub server: ServerConfig,
}

impl Gt7Config {
    /// Load configuration from `path`, falling back to defaults if it does not exist.
    ///
    /// The format is chosen by extension: `.json` is JSON, anything else YAML.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error when `content` is not a valid YAML configuration.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Invalid YAML configuration")
    }

    /// # Errors
    ///
    /// Returns an error when `content` is not a valid JSON configuration.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid JSON configuration")
    }

    /// # Errors
    ///
    /// Returns an error when the configuration cannot be serialized.
    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let monitor = &self.telemetry.monitor;
        if monitor.health_check_interval_ms == 0 {
            bail!("Invalid health check interval: 0 ms");
        }
        if monitor.freshness_window_ms == 0 {
            bail!("Invalid freshness window: 0 ms");
        }
        if self.telemetry.synthetic.refresh_interval_ms == 0 {
            bail!("Invalid synthetic refresh interval: 0 ms");
        }
        if self.telemetry.event_buffer == 0 {
            bail!("Invalid event buffer size: 0");
        }
        if self.server.port == 0 {
            bail!("Invalid HTTP port: 0");
        }

        if let SourceConfig::Bridge {
            command,
            restart_backoff_ms,
            ..
        } = &self.telemetry.source
        {
            if command.trim().is_empty() {
                bail!("Bridge command must not be empty");
            }
            if *restart_backoff_ms == 0 {
                bail!("Invalid bridge restart backoff: 0 ms");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn defaults_match_documented_values() -> TestResult {
        let config = Gt7Config::default();

        assert_eq!(
            config.telemetry.source.udp_addr(),
            Some("0.0.0.0:33742".parse()?)
        );
        assert_eq!(config.telemetry.monitor.health_check_interval_ms, 10_000);
        assert_eq!(config.telemetry.monitor.freshness_window_ms, 30_000);
        assert_eq!(config.telemetry.monitor.bootstrap_grace_ms, 30_000);
        assert!(config.telemetry.synthetic.enabled);
        assert_eq!(config.telemetry.synthetic.refresh_interval(), Duration::from_millis(50));
        assert_eq!(config.telemetry.event_buffer, 256);
        assert_eq!(config.server.socket_addr(), "0.0.0.0:3001".parse()?);
        config.validate()?;
        Ok(())
    }

    #[test]
    fn bridge_defaults_agree_with_the_adapter() -> TestResult {
        let config = Gt7Config::from_yaml_str("telemetry:\n  source:\n    kind: bridge\n")?;
        assert_eq!(config.telemetry.source, SourceConfig::default_bridge());

        let SourceConfig::Bridge { command, args, .. } = &config.telemetry.source else {
            return Err("expected a bridge source".into());
        };
        let adapter = gt7_telemetry_adapters::BridgeLiveSource::default();
        assert_eq!(adapter.command_line(), format!("{command} {}", args.join(" ")));
        assert_eq!(
            SourceConfig::default_udp().udp_addr().map(|addr| addr.port()),
            Some(gt7_telemetry_adapters::DEFAULT_UDP_PORT)
        );
        Ok(())
    }

    #[test]
    fn partial_yaml_keeps_defaults() -> TestResult {
        let yaml = r#"
telemetry:
  source:
    kind: bridge
    max_restarts: 2
  monitor:
    freshness_window_ms: 5000
server:
  port: 8080
"#;
        let config = Gt7Config::from_yaml_str(yaml)?;

        match &config.telemetry.source {
            SourceConfig::Bridge {
                command,
                args,
                max_restarts,
                restart_backoff_ms,
            } => {
                assert_eq!(command, "python3");
                assert_eq!(args, &vec!["backend/gt7_bridge.py".to_string()]);
                assert_eq!(*max_restarts, 2);
                assert_eq!(*restart_backoff_ms, 5000);
            }
            other => return Err(format!("expected bridge source, got {other:?}").into()),
        }
        assert_eq!(config.telemetry.monitor.freshness_window_ms, 5000);
        assert_eq!(config.telemetry.monitor.bootstrap_grace_ms, 30_000);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, unspecified());
        Ok(())
    }

    #[test]
    fn json_config_parses() -> TestResult {
        let json = r#"{"telemetry":{"source":{"kind":"udp","port":40000},"synthetic":{"enabled":false}}}"#;
        let config = Gt7Config::from_json_str(json)?;
        assert_eq!(config.telemetry.source.kind(), "udp");
        assert_eq!(
            config.telemetry.source.udp_addr(),
            Some("0.0.0.0:40000".parse()?)
        );
        assert!(!config.telemetry.synthetic.enabled);
        Ok(())
    }

    #[test]
    fn empty_yaml_is_default() -> TestResult {
        assert_eq!(Gt7Config::from_yaml_str("  \n")?, Gt7Config::default());
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() -> TestResult {
        let mut config = Gt7Config::default();
        config.telemetry.monitor.freshness_window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Gt7Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Gt7Config::default();
        config.telemetry.source = SourceConfig::Bridge {
            command: "  ".to_string(),
            args: Vec::new(),
            max_restarts: 1,
            restart_backoff_ms: 100,
        };
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn yaml_round_trip() -> TestResult {
        let mut config = Gt7Config::default();
        config.telemetry.source = SourceConfig::default_bridge();
        let yaml = config.to_yaml_string()?;
        assert_eq!(Gt7Config::from_yaml_str(&yaml)?, config);
        Ok(())
    }

    #[test]
    fn load_from_path_handles_missing_and_files() -> TestResult {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("absent.yaml");
        assert_eq!(Gt7Config::load_from_path(&missing)?, Gt7Config::default());

        let json_path = dir.path().join("gt7.json");
        let mut file = std::fs::File::create(&json_path)?;
        file.write_all(br#"{"server":{"port":4000}}"#)?;
        drop(file);
        assert_eq!(Gt7Config::load_from_path(&json_path)?.server.port, 4000);

        let yaml_path = dir.path().join("gt7.yml");
        std::fs::write(&yaml_path, "server: [not, a, map]\n")?;
        let err = Gt7Config::load_from_path(&yaml_path)
            .err()
            .ok_or("expected a parse error")?;
        assert!(format!("{err:#}").contains("gt7.yml"));
        Ok(())
    }
}
