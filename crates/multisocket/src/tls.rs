//! Server-side TLS material loading.

use crate::error::Error;
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Builds an acceptor from a PEM certificate chain and a PEM private key
/// (PKCS#8 or PKCS#1 RSA).
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, Error> {
    let cert_chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Tls(format!("Invalid certificate or key: {e}")))?;

    debug!("🔐 Loaded TLS certificate from {}", cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open cert file {}: {e}", path.display())))?;
    let chain = certs(&mut BufReader::new(file))
        .map_err(|_| Error::Tls("Failed to parse certificate".into()))?;

    if chain.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {}", path.display())));
    }
    Ok(chain.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open key file {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let keys = pkcs8_private_keys(&mut reader)
        .map_err(|_| Error::Tls("Failed to parse PKCS8 private key".into()))?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    reader.seek(SeekFrom::Start(0))?;
    let keys = rsa_private_keys(&mut reader)
        .map_err(|_| Error::Tls("Failed to parse RSA private key".into()))?;
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", path.display())))
}
