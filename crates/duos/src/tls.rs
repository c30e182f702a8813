//! TLS acceptor construction from PEM files.

use crate::error::DuosError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS 1.3 acceptor from a certificate chain and private key.
///
/// `cert` and `key` may name the same file when it holds both blocks.
///
/// # Errors
///
/// Returns an error if either file is unreadable, holds no usable PEM
/// block, or rustls refuses the pair.
pub fn load_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor, DuosError> {
    let certs = load_certs(cert)?;
    let key = load_key(key)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, DuosError> {
    let pem = std::fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..]).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(DuosError::TlsMaterial(format!(
            "no certificate in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, DuosError> {
    let pem = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut &pem[..])?
        .ok_or_else(|| DuosError::TlsMaterial(format!("no private key in {}", path.display())))
}
