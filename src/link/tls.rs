//! Mutual-TLS client configuration from PEM files.

use crate::config::TlsFiles;
use crate::error::LinkError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Loads the CA bundle and the node's key pair into a rustls client config.
///
/// Called on every dial, so rotated certificates are picked up by the next connection.
pub fn client_config(files: &TlsFiles) -> Result<Arc<ClientConfig>, LinkError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&files.ca_file)? {
        roots
            .add(cert)
            .map_err(|e| LinkError::Tls(format!("bad CA certificate: {e}")))?;
    }

    let chain = load_certs(&files.cert_file)?;
    let key = load_key(&files.key_file)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| LinkError::Tls(format!("bad client key pair: {e}")))?;
    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, LinkError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| LinkError::Tls(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, LinkError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LinkError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(LinkError::Tls(format!(
            "{}: no certificate found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, LinkError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| LinkError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| LinkError::Tls(format!("{}: no private key found", path.display())))
}
