//! Block/allow decisions.
//!
//! [`FilterEngine`] answers "should this request be blocked?" by walking the
//! rule store in a fixed precedence order and caching every verdict it
//! computes.
//!
//! ## Precedence
//!
//! 1. Fresh cache entry for `method:url`
//! 2. Whitelisted authority (allow)
//! 3. Blacklisted authority (block)
//! 4. Rules indexed under the exact authority
//! 5. Rules indexed under the exact path
//! 6. Regex rules, searched anywhere in the URL
//! 7. Literal rules, as substrings of the URL
//! 8. Allow
//!
//! Within steps 4-7 the first rule (in insertion order) whose constraints
//! match decides, whatever its action. Rule changes do not invalidate the
//! cache, so a verdict may be up to one TTL stale.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::FilterSettings;
use crate::decision_cache::DecisionCache;
use crate::rule::{FilterRule, RequestInfo};
use crate::rule_store::RuleStore;

/// Which precedence step produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Served from the decision cache.
    Cache,
    /// Authority is whitelisted.
    Whitelist,
    /// Authority is blacklisted.
    Blacklist,
    /// A rule indexed under the authority matched.
    Domain,
    /// A rule indexed under the path matched.
    Path,
    /// A regex rule matched.
    Regex,
    /// A literal rule matched.
    Literal,
    /// Nothing matched.
    Default,
}

impl DecisionSource {
    /// Returns the source name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Cache => "cache",
            DecisionSource::Whitelist => "whitelist",
            DecisionSource::Blacklist => "blacklist",
            DecisionSource::Domain => "domain",
            DecisionSource::Path => "path",
            DecisionSource::Regex => "regex",
            DecisionSource::Literal => "literal",
            DecisionSource::Default => "default",
        }
    }
}

/// Outcome of [`FilterEngine::decide`].
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is blocked.
    pub blocked: bool,
    /// The rule that decided, if any. Always `None` for cache hits.
    pub matched_rule: Option<Arc<FilterRule>>,
    /// Which step decided.
    pub source: DecisionSource,
}

impl Decision {
    fn new(blocked: bool, source: DecisionSource) -> Self {
        Self {
            blocked,
            matched_rule: None,
            source,
        }
    }

    fn from_rule(rule: &Arc<FilterRule>, source: DecisionSource) -> Self {
        Self {
            blocked: rule.is_block(),
            matched_rule: Some(Arc::clone(rule)),
            source,
        }
    }
}

/// Authority and path of a request URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    /// Lower-cased `host[:port]` as written in the URL, empty if the URL has
    /// none.
    pub domain: String,
    /// URL path as written, `/` when empty.
    pub path: String,
}

impl UrlParts {
    /// Splits a URL, best effort.
    ///
    /// The URL must parse, but the authority and path are taken verbatim from
    /// the input, so explicit default ports and escapes survive. Userinfo is
    /// dropped. Unparseable input yields an empty domain. Origin-relative
    /// input such as `/ads/x?y` keeps its path.
    pub fn parse(url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) if parsed.has_host() => {
                let rest = url.split_once("://").map_or("", |(_, rest)| rest);
                let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
                let (authority, tail) = rest.split_at(end);
                let host = authority
                    .rsplit_once('@')
                    .map_or(authority, |(_, host)| host);
                Self {
                    domain: host.to_lowercase(),
                    path: raw_path(tail),
                }
            }
            Ok(_) => Self::default(),
            Err(_) if url.starts_with('/') => Self {
                domain: String::new(),
                path: raw_path(url),
            },
            Err(_) => Self::default(),
        }
    }
}

fn raw_path(tail: &str) -> String {
    match tail.split(['?', '#']).next().unwrap_or_default() {
        "" => "/".to_string(),
        path => path.to_string(),
    }
}

/// Rule-driven request filter with a verdict cache.
#[derive(Debug)]
pub struct FilterEngine {
    store: RwLock<RuleStore>,
    cache: DecisionCache,
}

impl FilterEngine {
    /// Creates an engine over an existing store and cache.
    pub fn new(store: RuleStore, cache: DecisionCache) -> Self {
        Self {
            store: RwLock::new(store),
            cache,
        }
    }

    /// Builds an engine from parsed filter settings.
    pub fn from_settings(settings: &FilterSettings, block_malware: bool) -> Self {
        Self::new(
            RuleStore::from_settings(settings, block_malware),
            DecisionCache::from_settings(settings),
        )
    }

    /// Decides whether a request should be blocked.
    pub fn decide(&self, req: &RequestInfo<'_>) -> Decision {
        self.decide_at(req, Instant::now())
    }

    /// Shorthand for a bare URL and method.
    pub fn should_block(&self, url: &str, method: &str) -> bool {
        self.decide(&RequestInfo::new(url, method)).blocked
    }

    pub(crate) fn decide_at(&self, req: &RequestInfo<'_>, now: Instant) -> Decision {
        let key = req.cache_key();

        if let Some(blocked) = self.cache.lookup_at(&key, now) {
            return Decision::new(blocked, DecisionSource::Cache);
        }

        let decision = self.evaluate(req);
        self.cache.store_at(&key, decision.blocked, now);

        tracing::debug!(
            "{} {} -> {} ({})",
            req.method,
            req.url,
            if decision.blocked { "block" } else { "allow" },
            decision.source.as_str()
        );

        decision
    }

    fn evaluate(&self, req: &RequestInfo<'_>) -> Decision {
        let parts = UrlParts::parse(req.url);
        let store = self.store.read();

        if store.is_whitelisted(&parts.domain) {
            return Decision::new(false, DecisionSource::Whitelist);
        }

        if store.is_blacklisted(&parts.domain) {
            return Decision::new(true, DecisionSource::Blacklist);
        }

        if let Some(rule) = store
            .domain_rules(&parts.domain)
            .iter()
            .find(|rule| rule.matches_request(req))
        {
            return Decision::from_rule(rule, DecisionSource::Domain);
        }

        if let Some(rule) = store
            .path_rules(&parts.path)
            .iter()
            .find(|rule| rule.matches_request(req))
        {
            return Decision::from_rule(rule, DecisionSource::Path);
        }

        if let Some((_, rule)) = store
            .regex_rules()
            .iter()
            .find(|(re, rule)| re.is_match(req.url) && rule.matches_request(req))
        {
            return Decision::from_rule(rule, DecisionSource::Regex);
        }

        if let Some(rule) = store
            .literal_rules()
            .iter()
            .find(|rule| req.url.contains(rule.pattern.as_str()) && rule.matches_request(req))
        {
            return Decision::from_rule(rule, DecisionSource::Literal);
        }

        Decision::new(false, DecisionSource::Default)
    }

    /// Appends a rule.
    pub fn add_rule(&self, rule: FilterRule) {
        self.store.write().add_rule(rule);
    }

    /// Replaces all rules, keeping the whitelist and blacklist.
    pub fn replace_rules(&self, rules: Vec<FilterRule>) {
        let count = rules.len();
        self.store.write().replace_rules(rules);
        tracing::info!("Replaced filter rules ({} rules)", count);
    }

    /// Adds a domain to the whitelist.
    pub fn whitelist_domain(&self, domain: &str) {
        self.store.write().whitelist_domain(domain);
        tracing::info!("Whitelisted domain: {}", domain);
    }

    /// Adds a domain to the blacklist.
    pub fn blacklist_domain(&self, domain: &str) {
        self.store.write().blacklist_domain(domain);
        tracing::info!("Blacklisted domain: {}", domain);
    }

    /// Number of rules held.
    pub fn rule_count(&self) -> usize {
        self.store.read().len()
    }

    /// The decision cache.
    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }
}
