use crate::conf::error::ConfigError;
use crate::conf::types::{BootstrapConfig, ServerConfig};
use crate::conf::validate::{normalize_route, validate_route};
use std::fs;
use std::path::Path;

/// Load and validate the bootstrap config from a JSON file.
///
/// Route vHosts are normalized on the way in; any validation problem is
/// fatal at startup (unlike the control plane, there is no caller to hand
/// a 400 to).
pub fn load_bootstrap(path: &Path) -> Result<BootstrapConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let mut config: BootstrapConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::parse(path, e))?;

    let mut details = Vec::new();
    for route in &mut config.routes {
        normalize_route(route);
        details.extend(
            validate_route(route)
                .into_iter()
                .map(|d| format!("route {}: {}", route.id, d)),
        );
    }

    if !details.is_empty() {
        return Err(ConfigError::Invalid { details });
    }

    Ok(config)
}

/// Apply `PORT`, `SSL_PORT`, and `API_PORT` environment overrides.
pub fn apply_env(server: &mut ServerConfig) {
    if let Some(port) = env_port("PORT") {
        server.port = port;
    }
    if let Some(port) = env_port("SSL_PORT") {
        server.ssl_port = Some(port);
    }
    if let Some(port) = env_port("API_PORT") {
        server.api_port = port;
    }
}

fn env_port(name: &str) -> Option<u16> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable port override");
            None
        }
    }
}
