//! Certificate Authority loading for TLS interception.
//!
//! The CA certificate and key are supplied by the user as PEM files; they
//! are loaded once at startup and handed to hudsucker, which signs
//! per-host certificates on the fly.

use std::fs;
use std::path::{Path, PathBuf};

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rcgen::{Issuer, KeyPair};
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;

use shroud_core::ProxySettings;

use crate::error::CaError;

/// Number of per-host certificates hudsucker keeps cached.
const CERT_CACHE_SIZE: u64 = 1000;

/// Paths to a PEM-encoded CA certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaFiles {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CaFiles {
    /// Creates a CA file pair.
    pub fn new(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    /// Takes the pair from proxy settings; both paths must be set.
    pub fn from_settings(settings: &ProxySettings) -> Result<Self, CaError> {
        match (&settings.ssl_cert, &settings.ssl_key) {
            (Some(cert), Some(key)) => Ok(Self::new(cert, key)),
            _ => Err(CaError::NotConfigured),
        }
    }

    /// Returns the path to the CA certificate file.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Returns the path to the CA private key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Loads the CA and creates a hudsucker authority.
    pub fn load_authority(&self) -> Result<RcgenAuthority, CaError> {
        let cert_pem = read_pem(&self.cert_path)?;
        let key_pem = read_pem(&self.key_path)?;

        let key_pair = KeyPair::from_pem(&key_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaError::Parse(e.to_string()))?;

        tracing::info!("Loaded CA certificate from {}", self.cert_path.display());

        Ok(RcgenAuthority::new(issuer, CERT_CACHE_SIZE, default_provider()))
    }
}

fn read_pem(path: &Path) -> Result<String, CaError> {
    fs::read_to_string(path).map_err(|source| CaError::Read {
        path: path.to_path_buf(),
        source,
    })
}
