use crate::conf::BootstrapConfig;
use crate::proxy::{ControlGateway, ProxyGateway};
use crate::route::{Router, PROBE_TIMEOUT};
use crate::server::tls::SniCertResolver;
use crate::track::Tracker;
use anyhow::Result;
use pingora::listeners::tls::TlsSettings;
use pingora::prelude::*;
use pingora::server::Server;
use std::sync::Arc;

/// A fully assembled proxy, ready to run.
pub struct ProxyServer {
    pub server: Server,
    pub router: Arc<Router>,
    pub tracker: Arc<Tracker>,

    /// Drives the quarantine rechecks. Must stay alive as long as the
    /// server does.
    pub probe_rt: tokio::runtime::Runtime,
}

/// Build the Pingora server: data-plane service (plain + optional TLS
/// listener), control-plane service, and the probe runtime.
pub fn build_server(config: BootstrapConfig) -> Result<ProxyServer> {
    let mut server = Server::new(None)?;
    server.bootstrap();

    // Quarantine probes run on their own small runtime, outside Pingora's.
    let probe_rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let probe_client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;

    let router = Arc::new(Router::new(probe_rt.handle().clone(), probe_client));
    let tracker = Arc::new(Tracker::new());

    for route in &config.routes {
        tracker.ensure(&route.v_host);
        router.add_route(route.clone());
    }

    let gateway = ProxyGateway::new(router.clone(), tracker.clone());
    let mut proxy_service = http_proxy_service(&server.configuration, gateway);
    proxy_service.add_tcp(&format!("0.0.0.0:{}", config.server.port));

    if let Some(ssl_port) = config.server.ssl_port {
        let resolver = SniCertResolver::new(router.clone());
        let tls_settings = TlsSettings::with_callbacks(Box::new(resolver))?;
        proxy_service.add_tls_with_settings(
            &format!("0.0.0.0:{ssl_port}"),
            None,
            tls_settings,
        );
    }
    server.add_service(proxy_service);

    let control = ControlGateway::new(router.clone(), tracker.clone());
    let mut api_service = http_proxy_service(&server.configuration, control);
    api_service.add_tcp(&format!("0.0.0.0:{}", config.server.api_port));
    server.add_service(api_service);

    tracing::info!(
        port = config.server.port,
        ssl_port = config.server.ssl_port,
        api_port = config.server.api_port,
        routes = config.routes.len(),
        "switchyard configured"
    );

    Ok(ProxyServer {
        server,
        router,
        tracker,
        probe_rt,
    })
}

/// Run the proxy until the process is stopped.
pub fn run(config: BootstrapConfig) -> Result<()> {
    let ProxyServer {
        server,
        probe_rt: _probe_rt,
        ..
    } = build_server(config)?;

    // IMPORTANT:
    // - _probe_rt must stay in scope so its worker thread lives
    // - run_forever blocks the main thread as intended
    server.run_forever();
}
