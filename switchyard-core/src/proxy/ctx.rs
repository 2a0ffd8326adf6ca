use crate::proxy::error_classification::UpstreamErrorKind;
use crate::proxy::flight::FlightGuard;
use crate::route::{PickedBackend, Route};
use pingora::prelude::Session;
use pingora::protocols::l4::socket::SocketAddr as PingoraSocketAddr;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// How the upstream leg ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Success,
    /// Response delivered with this status; >= 500 counts as an error for
    /// metrics even though the bytes went out.
    HttpStatus(u16),
    Transport(UpstreamErrorKind),
    /// The client hung up (or an internal fault ended the exchange).
    ClientAbort,
}

/// Per-request state threaded through the proxy hooks. Allocated empty by
/// `new_ctx` and hydrated once the request head is readable.
pub struct ProxyCtx {
    pub request_id: Uuid,
    pub started_at: Instant,

    pub vhost: Option<String>,
    pub client_ip: Option<IpAddr>,

    /// Whether the request arrived on the TLS listener.
    pub tls_downstream: bool,

    /// The route this request was admitted to.
    pub route: Option<Arc<Route>>,

    /// The backend chosen for this dispatch.
    pub target: Option<PickedBackend>,

    /// Owns the active slot; present only for admitted requests.
    pub flight: Option<FlightGuard>,

    pub outcome: Option<UpstreamOutcome>,

    /// A backend takes at most one failure credit per request.
    pub failure_credited: bool,
}

impl ProxyCtx {
    pub fn empty() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            started_at: Instant::now(),
            vhost: None,
            client_ip: None,
            tls_downstream: false,
            route: None,
            target: None,
            flight: None,
            outcome: None,
            failure_credited: false,
        }
    }

    /// Pull connection facts out of the session.
    pub fn hydrate(&mut self, session: &Session) {
        self.client_ip = match session.client_addr() {
            Some(PingoraSocketAddr::Inet(addr)) => Some(addr.ip()),
            _ => None,
        };
        self.tls_downstream = session
            .digest()
            .map(|d| d.ssl_digest.is_some())
            .unwrap_or(false);
    }
}
