use crate::route::Router;
use async_trait::async_trait;
use pingora::listeners::TlsAccept;
use pingora::tls::ext;
use pingora::tls::pkey::PKey;
use pingora::tls::ssl::{NameType, SslRef};
use pingora::tls::x509::X509;
use std::sync::Arc;

/// Resolves the handshake certificate from the client-advertised SNI name.
///
/// The route's PEM pair is re-parsed on every handshake; there is no
/// context cache. A missing route, missing material, or bad PEM leaves the
/// handshake without a certificate, which fails it with an alert.
pub struct SniCertResolver {
    router: Arc<Router>,
}

impl SniCertResolver {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl TlsAccept for SniCertResolver {
    async fn certificate_callback(&self, ssl: &mut SslRef) {
        let Some(name) = ssl.servername(NameType::HOST_NAME).map(str::to_owned) else {
            tracing::warn!("TLS handshake without an SNI server name");
            return;
        };

        let Some(material) = self.router.resolve_sni(&name) else {
            tracing::warn!(servername = %name, "no certificate bound for SNI name");
            return;
        };

        let cert = match X509::from_pem(material.cert.as_bytes()) {
            Ok(cert) => cert,
            Err(e) => {
                tracing::error!(servername = %name, error = %e, "certificate PEM is invalid");
                return;
            }
        };
        let key = match PKey::private_key_from_pem(material.key.as_bytes()) {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(servername = %name, error = %e, "private key PEM is invalid");
                return;
            }
        };

        if let Err(e) = ext::ssl_use_certificate(ssl, &cert) {
            tracing::error!(servername = %name, error = %e, "failed to apply certificate");
            return;
        }
        if let Err(e) = ext::ssl_use_private_key(ssl, &key) {
            tracing::error!(servername = %name, error = %e, "failed to apply private key");
        }
    }
}
