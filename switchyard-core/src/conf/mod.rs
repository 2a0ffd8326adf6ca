mod error;
mod loader;
mod types;
mod validate;

pub use error::ConfigError;
pub use loader::{apply_env, load_bootstrap};
pub use types::{
    BackendConfig, BootstrapConfig, RouteConfig, ServerConfig, Strategy, TlsMaterial,
};
pub use validate::{normalize_route, validate_backend, validate_route};
