use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 10_000;

/// Process-level bootstrap state, optionally loaded from a JSON file at
/// startup. The file is never rewritten; runtime mutations live only in
/// memory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Plain HTTP listener port.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Optional TLS listener port; certificates resolve per vHost via SNI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_port: Option<u16>,

    /// Control-plane listener port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_proxy_port(),
            ssl_port: None,
            api_port: default_api_port(),
        }
    }
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_api_port() -> u16 {
    8081
}

/// Backend selection strategy for a route.
///
/// `LEAST_LATENCY` is reserved; it selects like `ROUND_ROBIN` for now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
    IpHash,
    LeastLatency,
}

/// Declarative desired state for one virtual host.
///
/// Replaced atomically; the data plane never mutates it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub id: String,

    /// Routing key: the Host header value after port stripping. Installed
    /// lowercase; compared as stored.
    pub v_host: String,

    #[serde(default)]
    pub strategy: Strategy,

    /// Requests allowed in flight before the queue is used.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Requests allowed to wait; beyond this the route sheds.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,

    /// Extra headers injected verbatim onto the upstream request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl RouteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS))
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms.unwrap_or(DEFAULT_PROXY_TIMEOUT_MS))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub id: String,
    pub host: String,
    pub port: u16,

    /// Reserved for weighted balancing; currently unused.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// PEM-encoded key and certificate bound to a vHost.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TlsMaterial {
    pub key: String,
    pub cert: String,
}

fn default_max_active() -> usize {
    100
}

fn default_max_queued() -> usize {
    100
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_config_json_uses_camel_case_keys() {
        // Arrange
        let config = RouteConfig {
            id: "r1".to_string(),
            v_host: "app.local".to_string(),
            strategy: Strategy::IpHash,
            max_active: 4,
            max_queued: 8,
            connect_timeout_ms: Some(1_000),
            proxy_timeout_ms: None,
            tls: None,
            headers: BTreeMap::new(),
            backends: vec![BackendConfig {
                id: "b1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                weight: 1,
            }],
        };

        // Act
        let json = serde_json::to_string(&config).unwrap();

        // Assert
        assert!(json.contains("\"vHost\":\"app.local\""));
        assert!(json.contains("\"maxActive\":4"));
        assert!(json.contains("\"maxQueued\":8"));
        assert!(json.contains("\"connectTimeoutMs\":1000"));
        assert!(json.contains("\"strategy\":\"IP_HASH\""));
        assert!(!json.contains("proxyTimeoutMs"));
    }

    #[test]
    fn route_config_defaults_apply() {
        // Arrange
        let raw = r#"{"id":"r1","vHost":"app.local","backends":[]}"#;

        // Act
        let config: RouteConfig = serde_json::from_str(raw).unwrap();

        // Assert
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert_eq!(config.max_active, 100);
        assert_eq!(config.max_queued, 100);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.proxy_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn backend_weight_defaults_to_one() {
        let raw = r#"{"id":"b1","host":"127.0.0.1","port":9000}"#;
        let backend: BackendConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(backend.weight, 1);
    }

    #[test]
    fn strategy_names_are_screaming_snake_case() {
        for (strategy, name) in [
            (Strategy::RoundRobin, "\"ROUND_ROBIN\""),
            (Strategy::Random, "\"RANDOM\""),
            (Strategy::IpHash, "\"IP_HASH\""),
            (Strategy::LeastLatency, "\"LEAST_LATENCY\""),
        ] {
            assert_eq!(serde_json::to_string(&strategy).unwrap(), name);
        }
    }
}
