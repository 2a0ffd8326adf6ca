//! Switchyard core: a dynamic HTTP(S) reverse proxy built on Pingora.
//!
//! The data plane admits each request against its route's active budget,
//! queues the overflow in FIFO order, sheds when both budgets are exhausted,
//! and quarantines backends after repeated failures. The control plane
//! mutates routes, backends, and TLS material at runtime over a JSON API.

pub mod balance;
pub mod conf;
pub mod logging;
pub mod proxy;
pub mod route;
pub mod server;
pub mod track;
