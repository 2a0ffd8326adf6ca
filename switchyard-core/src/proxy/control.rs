use crate::proxy::handlers::ApiHandler;
use crate::route::Router;
use crate::track::Tracker;
use async_trait::async_trait;
use pingora::prelude::*;
use pingora::Custom;
use std::sync::Arc;

/// The control plane: a Pingora service that answers every request from
/// `request_filter` and never proxies. Mutations go straight to the shared
/// Router and Tracker.
pub struct ControlGateway {
    handler: ApiHandler,
}

impl ControlGateway {
    pub fn new(router: Arc<Router>, tracker: Arc<Tracker>) -> Self {
        Self {
            handler: ApiHandler::new(router, tracker),
        }
    }
}

#[async_trait]
impl ProxyHttp for ControlGateway {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        self.handler.handle(session).await?;
        Ok(true)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        // Unreachable: request_filter always responds.
        Err(Error::new(Custom("control plane does not proxy")))
    }
}
