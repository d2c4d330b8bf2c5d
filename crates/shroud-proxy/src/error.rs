//! Error types for the proxy.

use std::path::PathBuf;

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listen address could not be parsed.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// CA loading error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// No certificate/key pair was configured.
    #[error("no CA configured: set ssl_cert and ssl_key")]
    NotConfigured,

    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The certificate or key could not be parsed.
    #[error("failed to parse CA: {0}")]
    Parse(String),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
