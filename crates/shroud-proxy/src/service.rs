//! The filtering service and its control operations.
//!
//! [`FilterService`] is constructed once at startup and shared as an `Arc`
//! between the proxy handler and whatever drives the control operations
//! (statistics, rule updates, the filtering switch, list edits).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use shroud_core::{
    Config, ContentRewriter, DecisionCache, FilterEngine, FilterRule, NetworkStats, RuleStore,
    TrafficMonitor,
};

/// Filtering totals reported by [`FilterService::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringStats {
    /// Requests seen by the pipeline.
    pub total_requests: u64,
    /// Requests answered with a block response.
    pub blocked_requests: u64,
    /// `blocked_requests / total_requests`, zero when nothing was seen.
    pub block_rate: f64,
    /// Whether filtering is currently on.
    pub enabled: bool,
    /// Number of rules loaded.
    pub rule_count: usize,
}

/// Combined statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Traffic telemetry.
    pub network: NetworkStats,
    /// Filtering totals.
    pub filtering: FilteringStats,
}

/// Shared filtering state: engine, rewriter, monitor, and switches.
#[derive(Debug)]
pub struct FilterService {
    engine: FilterEngine,
    rewriter: ContentRewriter,
    monitor: TrafficMonitor,
    filtering_enabled: AtomicBool,
    stealth_mode: bool,
    inject_cosmetic_filters: bool,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    next_request_id: AtomicU64,
}

impl FilterService {
    /// Creates a service around an engine with default rewriting content.
    pub fn new(engine: FilterEngine) -> Self {
        Self {
            engine,
            rewriter: ContentRewriter::default(),
            monitor: TrafficMonitor::new(),
            filtering_enabled: AtomicBool::new(true),
            stealth_mode: true,
            inject_cosmetic_filters: true,
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Builds the service from a full configuration.
    ///
    /// Rules, lists, and rewriter content come from one load of the filter
    /// settings; a failed load falls back to the built-in defaults.
    pub fn from_config(config: &Config) -> Self {
        let (store, settings) = RuleStore::load_from_config(config);

        Self::new(FilterEngine::new(store, DecisionCache::from_settings(&settings)))
        .with_rewriter(ContentRewriter::from_settings(&settings))
        .with_stealth_mode(config.proxy.stealth_mode)
        .with_cosmetic_filters(config.proxy.inject_cosmetic_filters)
    }

    /// Sets the content rewriter.
    pub fn with_rewriter(mut self, rewriter: ContentRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Sets whether request headers are disguised.
    pub fn with_stealth_mode(mut self, enabled: bool) -> Self {
        self.stealth_mode = enabled;
        self
    }

    /// Sets whether HTML responses are rewritten.
    pub fn with_cosmetic_filters(mut self, enabled: bool) -> Self {
        self.inject_cosmetic_filters = enabled;
        self
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> ServiceStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let blocked_requests = self.blocked_requests.load(Ordering::Relaxed);
        let block_rate = if total_requests > 0 {
            blocked_requests as f64 / total_requests as f64
        } else {
            0.0
        };

        ServiceStats {
            network: self.monitor.stats(),
            filtering: FilteringStats {
                total_requests,
                blocked_requests,
                block_rate,
                enabled: self.is_filtering_enabled(),
                rule_count: self.engine.rule_count(),
            },
        }
    }

    /// Replaces the rule set. Cached verdicts stay until they expire.
    pub fn update_filters(&self, rules: Vec<FilterRule>) {
        self.engine.replace_rules(rules);
    }

    /// Turns filtering on or off.
    pub fn toggle_filtering(&self, enabled: bool) {
        self.filtering_enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Filtering {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Adds a domain to the whitelist.
    pub fn whitelist_domain(&self, domain: &str) {
        self.engine.whitelist_domain(domain);
    }

    /// Adds a domain to the blacklist.
    pub fn blacklist_domain(&self, domain: &str) {
        self.engine.blacklist_domain(domain);
    }

    /// Returns true if filtering is on.
    pub fn is_filtering_enabled(&self) -> bool {
        self.filtering_enabled.load(Ordering::Relaxed)
    }

    /// Returns true if request headers are disguised.
    pub fn stealth_mode(&self) -> bool {
        self.stealth_mode
    }

    /// Returns true if HTML should currently be rewritten.
    pub fn rewrites_html(&self) -> bool {
        self.inject_cosmetic_filters && self.is_filtering_enabled()
    }

    /// The filter engine.
    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    /// The content rewriter.
    pub fn rewriter(&self) -> &ContentRewriter {
        &self.rewriter
    }

    /// The traffic monitor.
    pub fn monitor(&self) -> &TrafficMonitor {
        &self.monitor
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn count_request(&self, blocked: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if blocked {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> FilterService {
        FilterService::new(FilterEngine::new(
            RuleStore::new(),
            shroud_core::DecisionCache::new(16, std::time::Duration::from_secs(300)),
        ))
    }

    #[test]
    fn empty_stats_have_zero_block_rate() {
        let stats = service().stats();
        assert_eq!(stats.filtering.total_requests, 0);
        assert_eq!(stats.filtering.block_rate, 0.0);
        assert!(stats.filtering.enabled);
    }

    #[test]
    fn block_rate_is_ratio() {
        let service = service();
        service.count_request(true);
        service.count_request(false);
        service.count_request(false);
        service.count_request(true);
        let stats = service.stats().filtering;
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.blocked_requests, 2);
        assert!((stats.block_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn update_filters_replaces_rules() {
        let service = service();
        service.update_filters(vec![FilterRule::block("a"), FilterRule::block("b")]);
        assert_eq!(service.stats().filtering.rule_count, 2);
        service.update_filters(vec![FilterRule::block("c")]);
        assert_eq!(service.stats().filtering.rule_count, 1);
    }

    #[test]
    fn toggle_filtering_controls_rewriting() {
        let service = service();
        assert!(service.rewrites_html());
        service.toggle_filtering(false);
        assert!(!service.is_filtering_enabled());
        assert!(!service.rewrites_html());
        assert!(!service.stats().filtering.enabled);
    }

    #[test]
    fn cosmetic_switch_disables_rewriting() {
        let service = service().with_cosmetic_filters(false);
        assert!(!service.rewrites_html());
    }

    #[test]
    fn list_edits_reach_engine() {
        let service = service();
        service.blacklist_domain("evil.example");
        assert!(service.engine().should_block("http://evil.example/", "GET"));
        service.whitelist_domain("good.example");
        assert!(!service.engine().should_block("http://good.example/", "GET"));
    }

    #[test]
    fn request_ids_are_unique() {
        let service = service();
        let a = service.next_request_id();
        let b = service.next_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn from_config_applies_switches() {
        let mut config = Config::default();
        config.proxy.stealth_mode = false;
        config.proxy.inject_cosmetic_filters = false;
        config.proxy.block_malware = false;

        let service = FilterService::from_config(&config);
        assert!(!service.stealth_mode());
        assert!(!service.rewrites_html());
        assert_eq!(
            service.stats().filtering.rule_count,
            shroud_core::defaults::default_rules(false).len()
        );
    }

    #[test]
    fn from_config_falls_back_on_missing_filter_file() {
        let config = Config {
            filter_config: Some("/nonexistent/filters.yaml".into()),
            ..Config::default()
        };
        let service = FilterService::from_config(&config);
        assert_eq!(
            service.stats().filtering.rule_count,
            shroud_core::defaults::default_rules(true).len()
        );
        assert!(service
            .engine()
            .should_block("https://www.google-analytics.com/analytics.js", "GET"));
        assert!(service.rewrites_html());
    }

    #[test]
    fn from_config_reads_filter_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"decision_cache_capacity: 5\nrules:\n  - pattern: beacon\n    action: block\n",
        )
        .unwrap();
        let config = Config {
            filter_config: Some(file.path().to_path_buf()),
            ..Config::default()
        };

        let service = FilterService::from_config(&config);
        assert_eq!(service.stats().filtering.rule_count, 1);
        assert_eq!(service.engine().cache().capacity(), 5);
        assert!(service.engine().should_block("http://x.example/beacon", "GET"));
    }

    #[test]
    fn stats_serialize_shape() {
        let json = serde_json::to_value(service().stats()).unwrap();
        assert!(json["network"]["uptime"].is_number());
        assert!(json["filtering"]["block_rate"].is_number());
        assert_eq!(json["filtering"]["enabled"], true);
    }
}
