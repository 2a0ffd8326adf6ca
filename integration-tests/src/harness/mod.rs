pub mod config;
pub mod server;
pub mod upstream;

pub use config::{backend, route};
pub use server::{next_port, TestProxy};
pub use upstream::{
    start_delayed_upstream, start_echo_upstream, start_gated_upstream, start_refusing_upstream,
    Gate,
};
