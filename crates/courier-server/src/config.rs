//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (COURIER_*, PORT, NOTIFIER_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use courier_core::{HubConfig, PaymentConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

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

    /// Payment handshake timing.
    #[serde(default)]
    pub payment: PaymentSettings,

    /// Payment notifier surface.
    #[serde(default)]
    pub notifier: NotifierConfig,

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
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events buffered per connection.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Retained message log entries, `0` for unbounded.
    #[serde(default = "default_message_log_capacity")]
    pub message_log_capacity: usize,
}

/// Payment handshake configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Payment window in seconds.
    #[serde(default = "default_timer_secs")]
    pub timer_secs: u64,

    /// Receipt button delay hint in seconds.
    #[serde(default = "default_receipt_button_delay_secs")]
    pub receipt_button_delay_secs: u64,

    /// Idle session timeout in seconds.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Expired session sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Enable the notifier listener and poller.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Notifier port.
    #[serde(default = "default_notifier_port")]
    pub port: u16,

    /// Payment status poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Requester reported by the simulated source.
    #[serde(default = "default_requester")]
    pub requester: String,

    /// Payer reported by the simulated source.
    #[serde(default = "default_payer")]
    pub payer: String,

    /// Amount reported by the simulated source.
    #[serde(default = "default_amount")]
    pub amount: u64,
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
    std::env::var("COURIER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("COURIER_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(2001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue_capacity() -> usize {
    courier_core::hub::DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_message_log_capacity() -> usize {
    courier_core::log::DEFAULT_LOG_CAPACITY
}

fn default_timer_secs() -> u64 {
    courier_core::payment::DEFAULT_TIMER_SECS
}

fn default_receipt_button_delay_secs() -> u64 {
    courier_core::payment::DEFAULT_RECEIPT_BUTTON_DELAY_SECS
}

fn default_session_idle_secs() -> u64 {
    courier_core::payment::DEFAULT_SESSION_IDLE_SECS
}

fn default_sweep_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_notifier_port() -> u16 {
    std::env::var("NOTIFIER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_poll_interval() -> u64 {
    courier_core::notifier::DEFAULT_POLL_INTERVAL_MS
}

fn default_requester() -> String {
    "user123".to_string()
}

fn default_payer() -> String {
    "user456".to_string()
}

fn default_amount() -> u64 {
    150
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
            payment: PaymentSettings::default(),
            notifier: NotifierConfig::default(),
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
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            message_log_capacity: default_message_log_capacity(),
        }
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            timer_secs: default_timer_secs(),
            receipt_button_delay_secs: default_receipt_button_delay_secs(),
            session_idle_secs: default_session_idle_secs(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_notifier_port(),
            poll_interval_ms: default_poll_interval(),
            requester: default_requester(),
            payer: default_payer(),
            amount: default_amount(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "courier.toml",
            "/etc/courier/courier.toml",
            "~/.config/courier/courier.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address of the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    /// Get the socket address of the notifier listener.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn notifier_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.notifier.port)
    }

    /// Hub settings derived from limits and payment timing.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_capacity: self.limits.outbound_queue_capacity,
            message_log_capacity: self.limits.message_log_capacity,
            payment: PaymentConfig {
                timer: Duration::from_secs(self.payment.timer_secs),
                receipt_button_delay: Duration::from_secs(self.payment.receipt_button_delay_secs),
                session_idle: Duration::from_secs(self.payment.session_idle_secs),
            },
        }
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid host:port {}:{}", host, port))
}
