//! TLS termination for intercepted HTTPS traffic.
//!
//! The pipeline asks a [`CertificateSource`] for a server configuration for the
//! host named in a `CONNECT` request, then completes the handshake with the
//! client itself. Issuing per-host certificates on demand is the job of an
//! external authority; this module only ships a static PEM-backed source.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{ProxyError, Result};

/// Supplies the server-side TLS configuration used to impersonate `host`.
pub trait CertificateSource: Send + Sync {
    fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>>;
}

/// Serves one certificate chain for every host.
///
/// Suitable when the chain carries a wildcard or every intercepted host in
/// its subject alternative names.
pub struct PemCertificateSource {
    config: Arc<ServerConfig>,
}

impl PemCertificateSource {
    /// Load a certificate chain and private key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        Self::from_parts(certs, key)
    }

    pub fn from_parts(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ProxyError::Tls(format!("invalid certificate or key: {e}")))?;
        // The pipeline speaks HTTP/1.1 only.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

impl CertificateSource for PemCertificateSource {
    fn server_config(&self, _host: &str) -> Result<Arc<ServerConfig>> {
        Ok(Arc::clone(&self.config))
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ProxyError::Tls(format!("certificate file {}: {e}", path.display()))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Tls(format!("certificate file {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Tls(format!("key file {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ProxyError::Tls(format!("key file {}: {e}", path.display())))?
        .ok_or_else(|| ProxyError::Tls(format!("no private key found in {}", path.display())))
}

/// Complete a server-side TLS handshake for `host` over `stream`.
pub async fn accept<S>(source: &dyn CertificateSource, host: &str, stream: S) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = source.server_config(host)?;
    TlsAcceptor::from(config)
        .accept(stream)
        .await
        .map_err(|e| ProxyError::Tls(format!("handshake with client for {host} failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported() {
        let dir = std::env::temp_dir().join("intercept-proxy-missing-tls");
        let err = PemCertificateSource::from_pem_files(&dir.join("cert.pem"), &dir.join("key.pem"))
            .err()
            .expect("loading should fail");
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let dir = std::env::temp_dir().join("intercept-proxy-empty-tls");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("cert.pem");
        std::fs::write(&cert, "not a pem file\n").unwrap();

        let err = load_certs(&cert).unwrap_err();
        assert!(err.to_string().contains("no certificates"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
