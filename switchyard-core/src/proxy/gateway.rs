use crate::proxy::ctx::{ProxyCtx, UpstreamOutcome};
use crate::proxy::error_classification::classify_upstream_error;
use crate::proxy::flight::FlightGuard;
use crate::proxy::respond::{send_json, send_plain, send_plain_with};
use crate::route::{Admission, Router};
use crate::track::Tracker;
use async_trait::async_trait;
use http::{header, StatusCode};
use pingora::prelude::*;
use pingora::proxy::FailToProxy;
use pingora::Custom;
use pingora_http::{RequestHeader, ResponseHeader};
use std::sync::Arc;

/// The data plane: one `ProxyHttp` implementation driving admission,
/// dispatch, and finalize for every client request.
///
/// Hook order per request:
///
/// 1. `new_ctx` — allocate the empty per-request context
/// 2. `request_filter` — resolve vHost, admission decision (forward now /
///    wait in queue / shed), backend pick; every rejection responds here
/// 3. `upstream_peer` — build the peer with the route's timeouts
/// 4. `upstream_request_filter` — forwarding headers + the route's custom map
/// 5. [Pingora upstream I/O]
/// 6. `response_filter` — classify the delivered status
/// 7. `fail_to_proxy` — error envelope + backend failure credit
/// 8. `logging` — ALWAYS LAST: the single finalize point
#[derive(Clone)]
pub struct ProxyGateway {
    router: Arc<Router>,
    tracker: Arc<Tracker>,
}

impl ProxyGateway {
    pub fn new(router: Arc<Router>, tracker: Arc<Tracker>) -> Self {
        Self { router, tracker }
    }

    /// At most one failure credit per request, no matter how many error
    /// edges fire.
    fn credit_failure(&self, ctx: &mut ProxyCtx) {
        if ctx.failure_credited {
            return;
        }
        if let (Some(route), Some(target)) = (ctx.route.as_ref(), ctx.target.as_ref()) {
            route.mark_failure(&target.id);
            ctx.failure_credited = true;
        }
    }
}

#[async_trait]
impl ProxyHttp for ProxyGateway {
    type CTX = ProxyCtx;

    fn new_ctx(&self) -> Self::CTX {
        ProxyCtx::empty()
    }

    /// RESOLVE → ADMIT → (FORWARD | WAIT | SHED)
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        ctx.hydrate(session);

        let Some(host) = host_header(session) else {
            send_plain(session, StatusCode::BAD_REQUEST, "Missing Host Header").await?;
            return Ok(true);
        };
        let hostname = strip_port(&host).to_string();

        let Some(route) = self.router.get_route(&hostname) else {
            send_plain(
                session,
                StatusCode::NOT_FOUND,
                &format!("No route configured for {hostname}"),
            )
            .await?;
            return Ok(true);
        };
        ctx.vhost = Some(hostname.clone());

        match route.admit() {
            Admission::Ready => {}
            Admission::Queued(rx) => {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    vhost = %hostname,
                    "request queued"
                );
                if rx.await.is_err() {
                    // The route was replaced or removed while we waited;
                    // nothing will ever pump this queue entry.
                    send_plain_with(
                        session,
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Server Busy",
                        &[("Retry-After", "10")],
                    )
                    .await?;
                    return Ok(true);
                }
            }
            Admission::Shed => {
                self.tracker.on_error(&hostname, "QUEUE_FULL");
                send_plain_with(
                    session,
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Server Busy",
                    &[("Retry-After", "10")],
                )
                .await?;
                return Ok(true);
            }
        }

        // An active slot is held from here; the guard owns its release.
        let mut flight = FlightGuard::new(
            route.clone(),
            self.tracker.clone(),
            hostname.clone(),
            ctx.started_at,
        );

        let Some(target) = route.pick(ctx.client_ip) else {
            flight.abandon();
            send_plain(
                session,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service Unavailable - No Healthy Backends",
            )
            .await?;
            return Ok(true);
        };

        flight.dispatched();
        tracing::debug!(
            request_id = %ctx.request_id,
            vhost = %hostname,
            backend = %target.id,
            "dispatching to backend"
        );

        ctx.route = Some(route);
        ctx.target = Some(target);
        ctx.flight = Some(flight);
        Ok(false)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let target = ctx
            .target
            .as_ref()
            .ok_or_else(|| Error::new(Custom("no backend selected")))?;
        let route = ctx
            .route
            .as_ref()
            .ok_or_else(|| Error::new(Custom("no route bound")))?;
        let config = route.config();

        let mut peer = HttpPeer::new((target.host.as_str(), target.port), false, String::new());
        peer.options.connection_timeout = Some(config.connect_timeout());
        peer.options.read_timeout = Some(config.proxy_timeout());
        peer.options.write_timeout = Some(config.proxy_timeout());

        Ok(Box::new(peer))
    }

    /// Forwarding headers, then the route's custom header map verbatim.
    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(ip) = ctx.client_ip.map(|ip| ip.to_string()) {
            let forwarded = match upstream
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.clone(),
            };
            upstream.insert_header("X-Forwarded-For", forwarded)?;
            upstream.insert_header("X-Real-IP", ip)?;
        }
        upstream.insert_header(
            "X-Forwarded-Proto",
            if ctx.tls_downstream { "https" } else { "http" },
        )?;

        if let Some(route) = ctx.route.as_ref() {
            for (name, value) in &route.config().headers {
                upstream.insert_header(name.clone(), value.as_str())?;
            }
        }

        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        let status = upstream.status.as_u16();
        ctx.outcome = Some(if status >= 500 {
            UpstreamOutcome::HttpStatus(status)
        } else {
            UpstreamOutcome::Success
        });
        Ok(())
    }

    /// Upstream failed. Credit the backend, and answer with the error
    /// envelope when response headers have not gone out yet.
    async fn fail_to_proxy(
        &self,
        session: &mut Session,
        e: &Error,
        ctx: &mut Self::CTX,
    ) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        let Some(kind) = classify_upstream_error(e) else {
            ctx.outcome = Some(UpstreamOutcome::ClientAbort);
            if e.esource() == &pingora::ErrorSource::Downstream {
                // The client hung up; there is nobody to answer.
                return FailToProxy {
                    error_code: 0,
                    can_reuse_downstream: false,
                };
            }
            // Internal fault: log it and fall back to a bare 502.
            tracing::error!(
                request_id = %ctx.request_id,
                error = %e,
                "unclassified error on the request path"
            );
            if session.response_written().is_none() {
                let _ = session.respond_error(502).await;
            }
            return FailToProxy {
                error_code: 502,
                can_reuse_downstream: false,
            };
        };

        self.credit_failure(ctx);
        ctx.outcome = Some(UpstreamOutcome::Transport(kind));

        if session.response_written().is_none() {
            let envelope = serde_json::json!({
                "error": kind.title(),
                "code": kind.code(),
                "message": e.to_string(),
            });
            let status =
                StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::BAD_GATEWAY);
            if let Err(write_err) = send_json(session, status, &envelope).await {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    error = %write_err,
                    "could not write upstream error response"
                );
            }
        }

        FailToProxy {
            error_code: kind.status(),
            can_reuse_downstream: false,
        }
    }

    /// Pingora guarantees this hook runs last, which makes it the single
    /// finalize point: settle the outcome, then let the guard decrement the
    /// active count, update the tracker, and pump the queue.
    async fn logging(&self, _session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX)
    where
        Self::CTX: Send + Sync,
    {
        if let Some(e) = e {
            if ctx.outcome.is_none() {
                match classify_upstream_error(e) {
                    Some(kind) => {
                        self.credit_failure(ctx);
                        ctx.outcome = Some(UpstreamOutcome::Transport(kind));
                    }
                    None => ctx.outcome = Some(UpstreamOutcome::ClientAbort),
                }
            }
        }

        let success = matches!(ctx.outcome, Some(UpstreamOutcome::Success) | None);

        if let Some(mut flight) = ctx.flight.take() {
            if success {
                flight.success();
            } else {
                flight.failure();
            }
        }

        if let (Some(vhost), Some(target)) = (ctx.vhost.as_ref(), ctx.target.as_ref()) {
            tracing::info!(
                request_id = %ctx.request_id,
                vhost = %vhost,
                backend = %target.id,
                outcome = ?ctx.outcome,
                latency_ms = ctx.started_at.elapsed().as_millis() as u64,
                "request finished"
            );
        }
    }
}

/// The Host header, falling back to the URI authority for HTTP/2.
fn host_header(session: &Session) -> Option<String> {
    let req = session.req_header();
    if let Some(host) = req
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
    {
        return Some(host.to_string());
    }
    req.uri.host().map(|h| h.to_string())
}

/// Host values may carry a port; routing keys never do.
fn strip_port(host: &str) -> &str {
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}
