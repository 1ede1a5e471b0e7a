//! Keystore/truststore loading for mutual TLS.

use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
pub use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer},
};

/// Location of the client key material. The keystore holds the client
/// certificate chain and private key (PEM), the truststore the cluster
/// roots. The password travels with the material; it is part of the
/// credential set the cloud paths require.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub keystore: PathBuf,
    pub truststore: PathBuf,
    pub password: String,
}

/// TLS setup error. Always pre-connect and fatal; bad key material is
/// never a retryable condition.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {0}")]
    EmptyCerts(PathBuf),
    #[error("no private key found in {0}")]
    NoKey(PathBuf),
    #[error("tls configuration rejected: {0}")]
    Rejected(#[from] tokio_rustls::rustls::Error),
}

/// Build a connector performing mutual TLS with the given key material.
///
/// # Errors
/// Fails when either store is unreadable, holds no usable material, or
/// the resulting configuration is rejected.
pub fn connector(settings: &TlsSettings) -> Result<TlsConnector, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&settings.truststore)? {
        roots.add(cert)?;
    }
    if roots.is_empty() {
        return Err(TlsError::EmptyCerts(settings.truststore.clone()));
    }

    let chain = read_certs(&settings.keystore)?;
    if chain.is_empty() {
        return Err(TlsError::EmptyCerts(settings.keystore.clone()));
    }
    let key = read_key(&settings.keystore)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;
    Ok(TlsConnector::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(path.to_path_buf()))
}
