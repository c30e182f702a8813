use crate::error::ClientError;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Build a TLS 1.3 connector that trusts only the certificates in `cert`.
///
/// # Errors
///
/// Returns an error if the file is unreadable or holds no certificate.
pub fn load_connector(cert: &Path) -> Result<TlsConnector, ClientError> {
    let pem = std::fs::read(cert)?;
    let mut roots = RootCertStore::empty();
    for der in rustls_pemfile::certs(&mut &pem[..]) {
        roots.add(der?)?;
    }
    if roots.is_empty() {
        return Err(ClientError::Certificate(format!(
            "no certificate in {}",
            cert.display()
        )));
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse `host` as the name the server certificate must match.
///
/// # Errors
///
/// Returns [`ClientError::Certificate`] if `host` is neither a DNS name nor
/// an IP address.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ClientError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::Certificate(format!("invalid server name {host:?}: {e}")))
}
