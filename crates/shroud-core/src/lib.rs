//! Shroud Core - Rule matching, content rewriting, and traffic telemetry.
//!
//! This crate holds everything the proxy needs to decide what to do with a
//! request, independent of how traffic is intercepted.
//!
//! ## Architecture
//!
//! ```text
//! Config ──► RuleStore ──► FilterEngine ◄── DecisionCache
//!                               │
//!          ContentRewriter      │       TrafficMonitor
//! ```
//!
//! - [`rule`]: the rule model and constraint matching
//! - [`rule_store`]: tiered indices plus whitelist/blacklist
//! - [`decision_cache`]: LRU verdict cache with TTL
//! - [`filter_engine`]: precedence-ordered block/allow decisions
//! - [`content_rewriter`]: HTML style/script injection
//! - [`traffic_monitor`]: per-request timing and aggregate stats

pub mod config;
pub mod content_rewriter;
pub mod decision_cache;
pub mod defaults;
pub mod error;
pub mod filter_engine;
pub mod rule;
pub mod rule_store;
pub mod traffic_monitor;

pub use config::{Config, ConfigFormat, FilterSettings, ProxySettings};
pub use content_rewriter::ContentRewriter;
pub use decision_cache::DecisionCache;
pub use error::{ConfigError, Result};
pub use filter_engine::{Decision, DecisionSource, FilterEngine, UrlParts};
pub use rule::{FilterRule, RequestInfo, RuleAction, RuleTier};
pub use rule_store::RuleStore;
pub use traffic_monitor::{NetworkStats, RecordStatus, TrafficMonitor, TrafficRecord};
