use crate::conf::{
    normalize_route, validate_backend, validate_route, BackendConfig, RouteConfig, TlsMaterial,
};
use crate::proxy::respond::{send_json, send_no_content};
use crate::route::Router;
use crate::track::Tracker;
use http::StatusCode;
use pingora::prelude::*;
use pingora::Custom;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const API_PREFIX: &str = "/api/v1";
const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct CertificateUpload {
    domain: String,
    key: String,
    cert: String,
}

/// CRUD over routes and backends, certificate upload, and stats reads.
/// Every input is validated before any mutation.
pub(crate) struct ApiHandler {
    router: Arc<Router>,
    tracker: Arc<Tracker>,
}

impl ApiHandler {
    pub(crate) fn new(router: Arc<Router>, tracker: Arc<Tracker>) -> Self {
        Self { router, tracker }
    }

    pub(crate) async fn handle(&self, session: &mut Session) -> Result<()> {
        let method = session.req_header().method.clone();
        let path = session.req_header().uri.path().to_string();

        let Some(rest) = path.strip_prefix(API_PREFIX) else {
            return not_found(session).await;
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["routes"]) => self.list_routes(session).await,
            ("POST", ["routes"]) => self.upsert_route(session).await,
            ("GET", ["routes", vhost]) => self.get_route(session, vhost).await,
            ("DELETE", ["routes", vhost]) => self.delete_route(session, vhost).await,
            ("POST", ["routes", vhost, "backends"]) => self.add_backend(session, vhost).await,
            ("DELETE", ["routes", vhost, "backends", id]) => {
                self.remove_backend(session, vhost, id).await
            }
            ("POST", ["certificates"]) => self.upload_certificate(session).await,
            ("GET", ["stats"]) => self.all_stats(session).await,
            ("GET", ["stats", vhost]) => self.vhost_stats(session, vhost).await,
            _ => not_found(session).await,
        }
    }

    async fn list_routes(&self, session: &mut Session) -> Result<()> {
        let configs: Vec<RouteConfig> = self
            .router
            .routes()
            .iter()
            .map(|route| (*route.config()).clone())
            .collect();
        send_json(session, StatusCode::OK, &configs).await
    }

    /// Idempotent upsert by vHost. Replacement is destructive: the old
    /// route's queue and active counter are gone with it.
    async fn upsert_route(&self, session: &mut Session) -> Result<()> {
        let body = read_body(session).await?;
        let mut config: RouteConfig = match serde_json::from_slice(&body) {
            Ok(config) => config,
            Err(e) => {
                return validation_error(session, vec![format!("invalid JSON body: {e}")]).await;
            }
        };

        normalize_route(&mut config);
        let details = validate_route(&config);
        if !details.is_empty() {
            return validation_error(session, details).await;
        }

        self.tracker.ensure(&config.v_host);
        self.router.add_route(config.clone());
        send_json(session, StatusCode::CREATED, &config).await
    }

    async fn get_route(&self, session: &mut Session, vhost: &str) -> Result<()> {
        match self.router.get_route(vhost) {
            Some(route) => send_json(session, StatusCode::OK, &*route.config()).await,
            None => not_found(session).await,
        }
    }

    async fn delete_route(&self, session: &mut Session, vhost: &str) -> Result<()> {
        if self.router.remove_route(vhost) {
            self.tracker.remove(vhost);
            send_no_content(session).await
        } else {
            not_found(session).await
        }
    }

    async fn add_backend(&self, session: &mut Session, vhost: &str) -> Result<()> {
        let Some(route) = self.router.get_route(vhost) else {
            return not_found(session).await;
        };

        let body = read_body(session).await?;
        let backend: BackendConfig = match serde_json::from_slice(&body) {
            Ok(backend) => backend,
            Err(e) => {
                return validation_error(session, vec![format!("invalid JSON body: {e}")]).await;
            }
        };

        let mut details = validate_backend(&backend);
        let mut config = (*route.config()).clone();
        if config.backends.iter().any(|b| b.id == backend.id) {
            details.push(format!("duplicate backend id: {}", backend.id));
        }
        if !details.is_empty() {
            return validation_error(session, details).await;
        }

        config.backends.push(backend.clone());
        route.update_config(config);
        send_json(session, StatusCode::CREATED, &backend).await
    }

    async fn remove_backend(&self, session: &mut Session, vhost: &str, id: &str) -> Result<()> {
        let Some(route) = self.router.get_route(vhost) else {
            return not_found(session).await;
        };

        let mut config = (*route.config()).clone();
        let before = config.backends.len();
        config.backends.retain(|b| b.id != id);
        if config.backends.len() == before {
            return not_found(session).await;
        }

        route.update_config(config);
        send_no_content(session).await
    }

    /// Binding a certificate to an unknown vHost is a 404, not an implicit
    /// route create.
    async fn upload_certificate(&self, session: &mut Session) -> Result<()> {
        let body = read_body(session).await?;
        let upload: CertificateUpload = match serde_json::from_slice(&body) {
            Ok(upload) => upload,
            Err(e) => {
                return validation_error(session, vec![format!("invalid JSON body: {e}")]).await;
            }
        };

        let mut details = Vec::new();
        if upload.domain.trim().is_empty() {
            details.push("domain must be a non-empty string".to_string());
        }
        if upload.key.trim().is_empty() {
            details.push("key must be a non-empty PEM string".to_string());
        }
        if upload.cert.trim().is_empty() {
            details.push("cert must be a non-empty PEM string".to_string());
        }
        if !details.is_empty() {
            return validation_error(session, details).await;
        }

        let domain = upload.domain.to_ascii_lowercase();
        let Some(route) = self.router.get_route(&domain) else {
            return not_found(session).await;
        };

        route.set_tls(TlsMaterial {
            key: upload.key,
            cert: upload.cert,
        });
        tracing::info!(vhost = %domain, "certificate installed");
        send_json(session, StatusCode::OK, &json!({ "success": true })).await
    }

    async fn all_stats(&self, session: &mut Session) -> Result<()> {
        send_json(session, StatusCode::OK, &self.tracker.all()).await
    }

    async fn vhost_stats(&self, session: &mut Session, vhost: &str) -> Result<()> {
        match self.tracker.get(vhost) {
            Some(view) => send_json(session, StatusCode::OK, &view).await,
            None => not_found(session).await,
        }
    }
}

async fn not_found(session: &mut Session) -> Result<()> {
    send_json(session, StatusCode::NOT_FOUND, &json!({ "error": "Not Found" })).await
}

async fn validation_error(session: &mut Session, details: Vec<String>) -> Result<()> {
    send_json(
        session,
        StatusCode::BAD_REQUEST,
        &json!({ "error": "Validation Error", "details": details }),
    )
    .await
}

async fn read_body(session: &mut Session) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = session.read_request_body().await? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(Error::new(Custom("control plane body too large")));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
