use crate::conf::{RouteConfig, TlsMaterial};
use crate::route::Route;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Maps vHost names to their Routes and owns the route lifecycle.
///
/// Keys are exact host names (port already stripped, installed lowercase);
/// wildcard matching is not implemented.
pub struct Router {
    routes: DashMap<String, Arc<Route>>,
    probe: Handle,
    probe_client: reqwest::Client,
}

impl Router {
    /// `probe` is the runtime the quarantine rechecks run on; it outlives
    /// the router.
    pub fn new(probe: Handle, probe_client: reqwest::Client) -> Self {
        Self {
            routes: DashMap::new(),
            probe,
            probe_client,
        }
    }

    /// Install a route, destructively replacing any existing one for the
    /// same vHost. The old route is stopped first; its queue and counters
    /// are gone with it.
    pub fn add_route(&self, config: RouteConfig) -> Arc<Route> {
        let vhost = config.v_host.clone();
        let route = Arc::new(Route::new(config));
        route.start_recheck(&self.probe, self.probe_client.clone());

        match self.routes.insert(vhost.clone(), route.clone()) {
            Some(old) => {
                old.stop();
                tracing::info!(vhost = %vhost, "route replaced");
            }
            None => tracing::info!(vhost = %vhost, "route added"),
        }
        route
    }

    pub fn remove_route(&self, vhost: &str) -> bool {
        match self.routes.remove(vhost) {
            Some((_, route)) => {
                route.stop();
                tracing::info!(vhost, "route removed");
                true
            }
            None => false,
        }
    }

    pub fn get_route(&self, vhost: &str) -> Option<Arc<Route>> {
        self.routes.get(vhost).map(|entry| entry.value().clone())
    }

    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Stop every route's recheck task. Used at teardown.
    pub fn stop(&self) {
        for entry in self.routes.iter() {
            entry.value().stop();
        }
    }

    /// Look up the TLS material for an SNI server name. `None` when the
    /// vHost is unknown or carries no certificate; the handshake layer
    /// decides whether that is fatal.
    pub fn resolve_sni(&self, servername: &str) -> Option<TlsMaterial> {
        let route = self.get_route(servername)?;
        route.config().tls.clone()
    }
}
