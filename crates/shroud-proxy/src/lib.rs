//! Shroud Proxy - intercepting proxy that filters ads and trackers.
//!
//! This crate wires the rule engine, HTML rewriter, and traffic monitor from
//! `shroud-core` into a hudsucker MITM proxy.
//!
//! ## Architecture
//!
//! ```text
//! Client Request → Proxy → FilterPipeline::on_request → FilterEngine::decide
//!                                                          │
//!                         ┌────────────────────────────────┴──────┐
//!                         │ Block                                 │ Allow
//!                         ▼                                       ▼
//!                    403 text/plain                      Stealth headers → Upstream
//!                                                                 │
//!                                                                 ▼
//!                                              FilterPipeline::on_response
//!                                              (security headers, HTML rewrite,
//!                                               telemetry)
//! ```
//!
//! The [`FilterService`] is the shared state behind every handler clone and
//! also exposes the control operations: [`FilterService::stats`],
//! [`FilterService::update_filters`], [`FilterService::toggle_filtering`],
//! [`FilterService::whitelist_domain`] and [`FilterService::blacklist_domain`].

mod ca;
mod error;
mod handler;
pub mod headers;
pub mod pipeline;
mod proxy;
mod service;

pub use ca::CaFiles;
pub use error::{CaError, ProxyError, Result};
pub use handler::ProxyHandler;
pub use pipeline::{FilterPipeline, Flow, BLOCK_BODY};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use service::{FilterService, FilteringStats, ServiceStats};
