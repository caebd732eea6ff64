//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first found, or `--config <path>`)
//! - Environment variables (`HUDDLE_*`, nested keys joined with `__`)

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched, in order, when no path is given.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Event delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Presence configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum room subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events buffered per room for slow subscribers.
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds, advertised to clients.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Event delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Time allowed for a single broadcast, in milliseconds.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_ms: u64,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Issue the outstanding leaves of a connection when it drops.
    #[serde(default = "default_true")]
    pub leave_on_disconnect: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_topic_capacity() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_delivery_timeout() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            delivery: DeliveryConfig::default(),
            presence: PresenceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_message_size: default_max_message_size(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_delivery_timeout(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            leave_on_disconnect: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_file().as_deref())
    }

    /// Load configuration from `path` (if any), then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder
                .add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let layered = builder
            .add_source(
                config::Environment::with_prefix("HUDDLE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match path {
                Some(path) => format!("Failed to load config file: {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        let config: Self = layered
            .try_deserialize()
            .context("Invalid configuration values")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.limits.topic_capacity > 0,
            "limits.topic_capacity must be at least 1"
        );
        ensure!(
            self.limits.max_connections > 0,
            "limits.max_connections must be at least 1"
        );
        Ok(())
    }

    /// First existing file among the default config locations.
    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// Heartbeat interval as sent in the `connected` frame, saturating at
    /// `u32::MAX` milliseconds.
    #[must_use]
    pub fn advertised_heartbeat_ms(&self) -> u32 {
        u32::try_from(self.heartbeat.interval_ms).unwrap_or(u32::MAX)
    }

    /// Broadcast timeout as a duration.
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Held by every test that loads through the environment layer.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.presence.leave_on_disconnect);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_subscriptions_per_connection = 8

            [presence]
            leave_on_disconnect = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_subscriptions_per_connection, 8);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(!config.presence.leave_on_disconnect);
    }

    #[test]
    fn test_load_from_file() {
        let _env = env_lock();
        let path = std::env::temp_dir().join(format!("huddle-config-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 7001\n[delivery]\ntimeout_ms = 250\n").unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert_eq!(config.delivery_timeout(), Duration::from_millis(250));
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_load_from_missing_file() {
        let _env = env_lock();
        let path = Path::new("/definitely/not/here/huddle.toml");
        assert!(Config::load_from(Some(path)).is_err());
    }

    #[test]
    fn test_zero_topic_capacity_rejected() {
        let _env = env_lock();
        let path = std::env::temp_dir().join(format!(
            "huddle-config-zero-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[limits]\ntopic_capacity = 0\n").unwrap();

        let result = Config::load_from(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("topic_capacity"));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.limits.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let _env = env_lock();
        std::env::set_var("HUDDLE_PORT", "7444");
        std::env::set_var("HUDDLE_LIMITS__MAX_SUBSCRIPTIONS_PER_CONNECTION", "3");
        std::env::set_var("HUDDLE_PRESENCE__LEAVE_ON_DISCONNECT", "false");

        let result = Config::load_from(None);

        std::env::remove_var("HUDDLE_PORT");
        std::env::remove_var("HUDDLE_LIMITS__MAX_SUBSCRIPTIONS_PER_CONNECTION");
        std::env::remove_var("HUDDLE_PRESENCE__LEAVE_ON_DISCONNECT");

        let config = result.unwrap();
        assert_eq!(config.port, 7444);
        assert_eq!(config.limits.max_subscriptions_per_connection, 3);
        assert!(!config.presence.leave_on_disconnect);
        assert_eq!(config.limits.topic_capacity, 1024);
    }

    #[test]
    fn test_advertised_heartbeat_saturates() {
        let mut config = Config::default();
        assert_eq!(config.advertised_heartbeat_ms(), 30_000);

        config.heartbeat.interval_ms = u64::from(u32::MAX) + 10;
        assert_eq!(config.advertised_heartbeat_ms(), u32::MAX);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.port, 8080);
        assert_eq!(parsed.limits.topic_capacity, 1024);
    }
}
