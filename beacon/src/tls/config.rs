use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;
use tracing::info;

/// Errors raised while loading TLS material.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid client CA certificate in {path}: {source}")]
    ClientCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("client certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Builds the shared server configuration.
///
/// With `client_roots`, clients presenting a certificate must chain to one
/// of those roots; clients presenting none are still accepted.
pub fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Option<RootCertStore>,
) -> Result<Arc<ServerConfig>, TlsConfigError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let builder = match client_roots {
        Some(roots) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .allow_unauthenticated()
                .build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

/// Loads a PEM certificate chain, a PEM private key and an optional PEM
/// bundle of client CAs, then calls [`build_server_config`].
pub fn load_server_config(
    cert: &Path,
    key: &Path,
    client_ca: Option<&Path>,
) -> Result<Arc<ServerConfig>, TlsConfigError> {
    let certs = read_certs(cert)?;

    let pem = read(key)?;
    let key = rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|source| TlsConfigError::Read {
            path: key.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(key.to_path_buf()))?;

    let client_roots = match client_ca {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for ca in read_certs(path)? {
                roots
                    .add(ca)
                    .map_err(|source| TlsConfigError::ClientCa {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
            Some(roots)
        }
        None => None,
    };

    info!(
        cert = %cert.display(),
        chain = certs.len(),
        client_auth = client_roots.is_some(),
        "TLS material loaded"
    );

    build_server_config(certs, key, client_roots)
}

fn read(path: &Path) -> Result<Vec<u8>, TlsConfigError> {
    fs::read(path).map_err(|source| TlsConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let pem = read(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificate(path.to_path_buf()));
    }

    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_pem_material_with_client_roots() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert = pem_file(&certified.cert.pem());
        let key = pem_file(&certified.key_pair.serialize_pem());

        let config = load_server_config(cert.path(), key.path(), Some(cert.path())).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_key_is_reported() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert = pem_file(&certified.cert.pem());
        let empty = pem_file("");

        let err = load_server_config(cert.path(), empty.path(), None).unwrap_err();
        assert!(matches!(err, TlsConfigError::NoPrivateKey(_)));
    }

    #[test]
    fn unreadable_certificate_is_reported() {
        let err = load_server_config(
            Path::new("/nonexistent/server.pem"),
            Path::new("/nonexistent/server.key"),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, TlsConfigError::Read { .. }));
    }
}
