mod setup;
pub mod tls;

pub use setup::{build_server, run, ProxyServer};
