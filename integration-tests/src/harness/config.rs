use std::collections::BTreeMap;
use switchyard_core::conf::{BackendConfig, RouteConfig, Strategy};

pub fn backend(id: &str, port: u16) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        weight: 1,
    }
}

/// A route with the admission limits the scenario needs.
pub fn route(
    vhost: &str,
    backends: Vec<BackendConfig>,
    max_active: usize,
    max_queued: usize,
) -> RouteConfig {
    RouteConfig {
        id: format!("route-{vhost}"),
        v_host: vhost.to_string(),
        strategy: Strategy::RoundRobin,
        max_active,
        max_queued,
        connect_timeout_ms: None,
        proxy_timeout_ms: None,
        tls: None,
        headers: BTreeMap::new(),
        backends,
    }
}
