//! Shroud - filtering proxy that blocks ads and trackers.
//!
//! Loads the configuration, builds the filtering service, and runs the
//! intercepting proxy until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shroud_core::{Config, ConfigError};
use shroud_proxy::{FilterService, ProxyConfig, ProxyServer};

/// Shroud - ad and tracker filtering proxy
#[derive(Parser, Debug)]
#[command(name = "shroud", version, about)]
struct Args {
    /// Configuration file (JSON, or YAML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Separate filter configuration file
    #[arg(long)]
    filter_config: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream proxy URL
    #[arg(long)]
    upstream: Option<String>,

    /// CA certificate (PEM)
    #[arg(long)]
    ssl_cert: Option<PathBuf>,

    /// CA private key (PEM)
    #[arg(long)]
    ssl_key: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Do not rewrite request headers
    #[arg(long)]
    no_stealth: bool,

    /// Do not inject cosmetic filters into HTML
    #[arg(long)]
    no_cosmetic: bool,
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "shroud", "Shroud").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with file rotation.
fn init_logging(args: &Args, level: &str) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug {
        "debug".to_string()
    } else {
        level.to_lowercase()
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shroud={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("shroud")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

/// Loads the config file, keeping any error for logging once logging is up.
fn load_config(path: Option<&PathBuf>) -> (Config, Option<ConfigError>) {
    match path {
        Some(path) => match Config::from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
        None => (Config::default(), None),
    }
}

/// Applies command-line overrides on top of the file configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(path) = &args.filter_config {
        config.filter_config = Some(path.clone());
    }
    if let Some(host) = &args.host {
        config.proxy.listen_host = host.clone();
    }
    if let Some(port) = args.port {
        config.proxy.listen_port = port;
    }
    if let Some(upstream) = &args.upstream {
        config.proxy.upstream_proxy = Some(upstream.clone());
    }
    if let Some(cert) = &args.ssl_cert {
        config.proxy.ssl_cert = Some(cert.clone());
    }
    if let Some(key) = &args.ssl_key {
        config.proxy.ssl_key = Some(key.clone());
    }
    if let Some(level) = &args.log_level {
        config.proxy.log_level = level.clone();
    }
    if args.no_stealth {
        config.proxy.stealth_mode = false;
    }
    if args.no_cosmetic {
        config.proxy.inject_cosmetic_filters = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, config_error) = load_config(args.config.as_ref());
    apply_overrides(&mut config, &args);

    // Keep guard alive for the duration of the program
    let _log_guard = init_logging(&args, &config.proxy.log_level);

    if let Some(e) = config_error {
        tracing::error!("Failed to load config file: {}; using defaults", e);
    }

    tracing::info!("Starting Shroud...");

    let service = Arc::new(FilterService::from_config(&config));
    let proxy_config = ProxyConfig::from_settings(&config.proxy)?;
    let server = ProxyServer::new(proxy_config, Arc::clone(&service))?;
    let handle = server.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.stop().await;

    tracing::info!("Final stats: {}", serde_json::to_string(&service.stats())?);
    Ok(())
}
