//! Configuration schema definitions.
//!
//! Every section and field is defaulted, so a missing file, an empty file and
//! a partial file all yield a runnable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the interception proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Where to listen and which traffic to route through the proxy.
    pub listener: ListenerConfig,

    /// Deadlines for client reads and upstream exchanges.
    pub timeouts: TimeoutConfig,

    /// Size limits for request heads and bodies.
    pub limits: LimitsConfig,

    /// Certificate used to terminate tunnelled HTTPS. Absent: CONNECT is refused.
    pub tls: Option<TlsConfig>,

    /// OS proxy registration.
    pub registrar: RegistrarConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0", "127.0.0.1").
    pub bind_address: String,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,

    /// Traffic kinds the OS is told to send through the proxy.
    pub modes: Vec<ProxyMode>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8888,
            modes: vec![ProxyMode::Http, ProxyMode::Https],
        }
    }
}

/// A kind of traffic the proxy can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Http,
    Https,
}

/// Timeout configuration, in seconds. Zero disables a deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for the client to deliver a complete request head.
    pub client_read_secs: u64,

    /// Upstream connection establishment timeout.
    pub connect_secs: u64,

    /// Upstream request + response head timeout.
    pub request_secs: u64,

    /// How long the binary waits for in-flight transactions after stop.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn client_read(&self) -> Duration {
        Duration::from_secs(self.client_read_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_read_secs: 30,
            connect_secs: 10,
            request_secs: 60,
            drain_secs: 10,
        }
    }
}

/// Size limits applied to message heads and bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a request line plus headers, in bytes.
    pub max_header_bytes: usize,

    /// Maximum declared request body size, in bytes.
    pub max_body_bytes: u64,

    /// Maximum origin response body size, in bytes.
    pub max_response_body_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024, // 16MB
            max_response_body_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Certificate chain and key used to impersonate tunnelled hosts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// OS proxy registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Which registrar drives the OS settings.
    pub kind: RegistrarKind,

    /// Exclude loopback and local hostnames from proxying.
    pub bypass_local: bool,

    /// Host patterns that should bypass the proxy.
    pub overrides: Vec<String>,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            kind: RegistrarKind::None,
            bypass_local: true,
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrarKind {
    /// Leave OS settings alone.
    #[default]
    None,
    /// GNOME proxy settings via the `gsettings` tool (Linux).
    Gsettings,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.port, 8888);
        assert_eq!(config.listener.bind_address, "0.0.0.0");
        assert_eq!(config.listener.modes, vec![ProxyMode::Http, ProxyMode::Https]);
        assert!(config.tls.is_none());
        assert!(config.registrar.bypass_local);
        assert_eq!(config.registrar.kind, RegistrarKind::None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            port = 9000
            modes = ["http"]

            [timeouts]
            request_secs = 5

            [registrar]
            kind = "gsettings"
            overrides = ["*.internal", "10.0.0.0/8"]

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.modes, vec![ProxyMode::Http]);
        assert_eq!(config.timeouts.request(), Duration::from_secs(5));
        assert_eq!(config.timeouts.connect_secs, 10);
        assert_eq!(config.registrar.kind, RegistrarKind::Gsettings);
        assert_eq!(config.registrar.overrides.len(), 2);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let result: Result<ProxyConfig, _> = toml::from_str("[listener]\nmodes = [\"ftp\"]\n");
        assert!(result.is_err());
    }
}
