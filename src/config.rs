//! Configuration management for MIDI Relay
//!
//! Handles loading and validating the optional YAML configuration file.
//! Command-line flags are applied on top of the loaded values in `main`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::supervisor::ReconnectPolicy;
use crate::transport::TransportKind;

/// Ports the receiving server conventionally listens on
pub const CONVENTIONAL_PORTS: [u16; 2] = [3902, 3907];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub transport: TransportKind,
    pub device: DeviceConfig,
    pub reconnect: ReconnectConfig,
    pub profiles: Vec<ProfileRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            transport: TransportKind::default(),
            device: DeviceConfig::default(),
            reconnect: ReconnectConfig::default(),
            profiles: default_profiles(),
        }
    }
}

/// Remote endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Asked for interactively when missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Which MIDI input to open
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Case-insensitive substring of the port name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// WebSocket reconnection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Enables capped linear backoff when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: Option<u64>,
}

/// Channel policy for devices whose port name contains `match`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileRule {
    #[serde(rename = "match")]
    pub matches: String,
    pub channel_offset: u8,
    #[serde(default)]
    pub channel_filter_min: u8,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_interval_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    ///
    /// A missing file is an error only when it was asked for explicitly.
    pub async fn load_or_default(path: &str, explicit: bool) -> Result<Self> {
        if !explicit && !Path::new(path).exists() {
            debug!("No config file at {}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Save configuration to a YAML file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// Silent on success; the unconventional-port warning is left to the
    /// caller so it is logged once per run.
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            anyhow::bail!("Remote host cannot be empty");
        }

        if self.remote.port == Some(0) {
            anyhow::bail!("Remote port must be between 1 and 65535");
        }

        if self.reconnect.interval_ms == 0 {
            anyhow::bail!("Reconnect interval must be greater than 0 ms");
        }

        if let Some(max) = self.reconnect.max_interval_ms {
            if max < self.reconnect.interval_ms {
                anyhow::bail!(
                    "Reconnect max_interval_ms ({}) is below interval_ms ({})",
                    max,
                    self.reconnect.interval_ms
                );
            }
        }

        if self.reconnect.connect_timeout_ms == Some(0) {
            anyhow::bail!("Connect timeout must be greater than 0 ms");
        }

        for rule in &self.profiles {
            if rule.matches.is_empty() {
                anyhow::bail!("Profile 'match' cannot be empty");
            }
            if rule.channel_offset > 15 {
                anyhow::bail!(
                    "Profile '{}' has invalid channel_offset {} (must be 0-15)",
                    rule.matches,
                    rule.channel_offset
                );
            }
            if rule.channel_filter_min > 15 {
                anyhow::bail!(
                    "Profile '{}' has invalid channel_filter_min {} (must be 0-15)",
                    rule.matches,
                    rule.channel_filter_min
                );
            }
        }

        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let base = Duration::from_millis(self.reconnect.interval_ms);
        match self.reconnect.max_interval_ms {
            Some(max) => ReconnectPolicy::Backoff {
                base,
                max: Duration::from_millis(max),
            },
            None => ReconnectPolicy::Fixed(base),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.reconnect.connect_timeout_ms.map(Duration::from_millis)
    }

    /// WebSocket URL for the remote endpoint
    pub fn websocket_url(&self, port: u16) -> String {
        format!("ws://{}:{}", self.remote.host, port)
    }
}

/// Log a warning for ports outside the usual server ports
pub fn warn_unconventional_port(port: u16) {
    if !CONVENTIONAL_PORTS.contains(&port) {
        warn!(
            "Port {} is not one of the usual server ports {:?}",
            port, CONVENTIONAL_PORTS
        );
    }
}

// Default value functions
fn default_host() -> String { "199.19.73.131".to_string() }
fn default_interval_ms() -> u64 { 1000 }
fn default_connect_timeout_ms() -> Option<u64> { Some(5000) }

fn default_profiles() -> Vec<ProfileRule> {
    vec![ProfileRule {
        matches: "Guitar".to_string(),
        channel_offset: 6,
        channel_filter_min: 0,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.remote.host, "199.19.73.131");
        assert_eq!(config.remote.port, None);
        assert_eq!(config.transport, TransportKind::WebSocket);
        assert_eq!(config.reconnect.interval_ms, 1000);
        assert_eq!(config.profiles, default_profiles());
        assert_eq!(
            config.reconnect_policy(),
            ReconnectPolicy::Fixed(Duration::from_secs(1))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
remote:
  host: relay.example.org
  port: 3907
transport: udp
device:
  name: keystep
reconnect:
  interval_ms: 500
  max_interval_ms: 4000
  connect_timeout_ms: 2000
profiles:
  - match: Pads
    channel_offset: 9
    channel_filter_min: 8
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.remote.port, Some(3907));
        assert_eq!(config.transport, TransportKind::Udp);
        assert_eq!(config.device.name.as_deref(), Some("keystep"));
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(
            config.reconnect_policy(),
            ReconnectPolicy::Backoff {
                base: Duration::from_millis(500),
                max: Duration::from_millis(4000),
            }
        );
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].channel_filter_min, 8);
        assert_eq!(config.websocket_url(3907), "ws://relay.example.org:3907");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AppConfig::default();
        config.remote.port = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reconnect.max_interval_ms = Some(10);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.profiles[0].channel_offset = 16;
        assert!(config.validate().is_err());
    }

    /// Log sink for asserting on emitted warnings
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_unconventional_port_warned_once() {
        let mut config = AppConfig::default();
        config.remote.port = Some(4000);

        let logs = capture_logs(|| {
            assert!(config.validate().is_ok());
            assert!(config.validate().is_ok());
        });
        assert!(logs.is_empty(), "validate must not log: {}", logs);

        let logs = capture_logs(|| warn_unconventional_port(4000));
        assert_eq!(logs.matches("Port 4000").count(), 1);

        let logs = capture_logs(|| warn_unconventional_port(3902));
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "remote:\n  port: 3902\ntransport: websocket").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.remote.port, Some(3902));
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path, false).await.unwrap();
        assert_eq!(config.remote.port, None);
        assert!(AppConfig::load_or_default(path, true).await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.remote.port = Some(3907);
        config.transport = TransportKind::Udp;
        config.save(path).await.unwrap();

        let reloaded = AppConfig::load(path).await.unwrap();
        assert_eq!(reloaded.remote.port, Some(3907));
        assert_eq!(reloaded.transport, TransportKind::Udp);
        assert_eq!(reloaded.profiles, config.profiles);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let result: Result<AppConfig, _> = serde_yaml::from_str("transport: carrier-pigeon");
        assert!(result.is_err());
    }
}
