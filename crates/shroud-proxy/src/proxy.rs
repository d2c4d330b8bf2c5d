//! Intercepting proxy server.
//!
//! Loads the configured CA and runs hudsucker in a background task with a
//! [`ProxyHandler`] over the shared [`FilterService`].

use std::net::SocketAddr;
use std::sync::Arc;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use shroud_core::ProxySettings;

use crate::ca::CaFiles;
use crate::error::{ProxyError, Result};
use crate::handler::ProxyHandler;
use crate::service::FilterService;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// CA certificate and key used for interception.
    pub ca: CaFiles,
}

impl ProxyConfig {
    /// Creates a configuration.
    pub fn new(addr: SocketAddr, ca: CaFiles) -> Self {
        Self { addr, ca }
    }

    /// Derives the configuration from proxy settings.
    pub fn from_settings(settings: &ProxySettings) -> Result<Self> {
        let addr_str = settings.listen_addr();
        let addr = addr_str
            .parse::<SocketAddr>()
            .map_err(|_| ProxyError::InvalidAddress(addr_str))?;

        if let Some(upstream) = &settings.upstream_proxy {
            tracing::warn!("Upstream proxy {} is not supported; connecting directly", upstream);
        }

        Ok(Self::new(addr, CaFiles::from_settings(settings)?))
    }
}

/// Intercepting proxy server.
#[derive(Debug)]
pub struct ProxyServer {
    config: ProxyConfig,
    service: Arc<FilterService>,
}

impl ProxyServer {
    /// Creates a server. The CA is loaded once here to fail early.
    pub fn new(config: ProxyConfig, service: Arc<FilterService>) -> Result<Self> {
        config.ca.load_authority()?;
        Ok(Self { config, service })
    }

    /// Starts the proxy in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let addr = self.config.addr;

        let authority = self.config.ca.load_authority()?;
        let handler = ProxyHandler::new(Arc::clone(&self.service));
        let stealth_mode = self.service.stealth_mode();
        let cosmetic = self.service.rewrites_html();

        let handle = tokio::spawn(async move {
            let proxy = match Proxy::builder()
                .with_addr(addr)
                .with_ca(authority)
                .with_rustls_connector(default_provider())
                .with_http_handler(handler)
                .build()
            {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("Failed to build proxy: {}", e);
                    return;
                }
            };

            tracing::info!("Starting Shroud proxy on {}", addr);
            tracing::info!("Stealth mode: {}", stealth_mode);
            tracing::info!("Cosmetic filtering: {}", cosmetic);

            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
#[derive(Debug)]
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
