/// How an upstream failure surfaces to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// The backend went silent mid-exchange: a blown connect/read/write
    /// deadline, or a reset/closed connection. 504.
    Timeout,
    /// Any other upstream transport failure (e.g. a refused connection): 502.
    Upstream,
}

impl UpstreamErrorKind {
    pub fn status(&self) -> u16 {
        match self {
            Self::Timeout => 504,
            Self::Upstream => 502,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Timeout => "Gateway Timeout",
            Self::Upstream => "Bad Gateway",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "UPSTREAM_TIMEOUT",
            Self::Upstream => "UPSTREAM_ERROR",
        }
    }
}

/// Classify a Pingora error from the proxy path.
///
/// Returns `None` for downstream and internal errors: those carry no
/// failure credit and get no error envelope (the client is gone, or the
/// fault is ours).
pub fn classify_upstream_error(err: &pingora::Error) -> Option<UpstreamErrorKind> {
    use pingora::{ErrorSource, ErrorType::*};

    if err.esource() != &ErrorSource::Upstream {
        return None;
    }

    Some(match err.etype() {
        // Deadlines and mid-connection resets are one class: the backend
        // accepted work and then went silent.
        ConnectTimedout | ReadTimedout | WriteTimedout | TLSHandshakeTimedout | ReadError
        | WriteError | ConnectionClosed => UpstreamErrorKind::Timeout,

        _ => UpstreamErrorKind::Upstream,
    })
}
