mod control;
mod ctx;
mod error_classification;
mod flight;
mod gateway;
mod handlers;
pub(crate) mod respond;

pub use control::ControlGateway;
pub use ctx::{ProxyCtx, UpstreamOutcome};
pub use error_classification::{classify_upstream_error, UpstreamErrorKind};
pub use flight::FlightGuard;
pub use gateway::ProxyGateway;
