//! Rule storage and lookup indices.
//!
//! The store owns every rule in insertion order plus one index per tier and
//! the whitelist/blacklist domain sets. Each rule lands in exactly one index
//! when it is added; a regex rule whose pattern fails to compile is kept in
//! the rule list but indexed nowhere, so it can never match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::config::{Config, FilterSettings};
use crate::rule::{FilterRule, RuleTier};

/// Indexed rule set with whitelist and blacklist.
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: Vec<Arc<FilterRule>>,
    domain_index: HashMap<String, Vec<Arc<FilterRule>>>,
    path_index: HashMap<String, Vec<Arc<FilterRule>>>,
    regex_rules: Vec<(Regex, Arc<FilterRule>)>,
    literal_rules: Vec<Arc<FilterRule>>,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

impl RuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from already-parsed filter settings.
    pub fn from_settings(settings: &FilterSettings, block_malware: bool) -> Self {
        let mut store = Self::new();
        store.add_rules(settings.rules_or_default(block_malware));
        for domain in &settings.whitelist_domains {
            store.whitelist_domain(domain);
        }
        for domain in &settings.blacklist_domains {
            store.blacklist_domain(domain);
        }
        tracing::info!(
            "Loaded {} filter rules ({} whitelisted, {} blacklisted domains)",
            store.len(),
            store.whitelist.len(),
            store.blacklist.len()
        );
        store
    }

    /// Loads the store a configuration describes.
    ///
    /// The filter settings come from `filter_config` when set, otherwise from
    /// the inline keys. Any read, parse, or validation failure is logged and
    /// the built-in rules are used instead. The settings the store was built
    /// from are returned alongside it.
    pub fn load_from_config(config: &Config) -> (Self, FilterSettings) {
        let block_malware = config.proxy.block_malware;
        let settings = config.load_filter_settings().unwrap_or_else(|e| {
            match &config.filter_config {
                Some(path) => tracing::error!(
                    "Failed to load filter config {}: {}; using built-in rules",
                    path.display(),
                    e
                ),
                None => tracing::error!("Invalid filter settings: {}; using built-in rules", e),
            }
            FilterSettings::default()
        });
        (Self::from_settings(&settings, block_malware), settings)
    }

    /// Classifies and indexes a rule.
    pub fn add_rule(&mut self, rule: FilterRule) {
        let rule = Arc::new(rule);

        match rule.tier() {
            RuleTier::Domain => {
                if let Some(domain) = &rule.domain {
                    self.domain_index
                        .entry(domain.clone())
                        .or_default()
                        .push(Arc::clone(&rule));
                }
            }
            RuleTier::Path => {
                if let Some(path) = &rule.path {
                    self.path_index
                        .entry(path.clone())
                        .or_default()
                        .push(Arc::clone(&rule));
                }
            }
            RuleTier::Regex => {
                match RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                {
                    Ok(re) => self.regex_rules.push((re, Arc::clone(&rule))),
                    Err(e) => {
                        tracing::warn!("Invalid regex pattern '{}': {}", rule.pattern, e);
                    }
                }
            }
            RuleTier::Literal => self.literal_rules.push(Arc::clone(&rule)),
        }

        self.rules.push(rule);
    }

    /// Adds several rules in order.
    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = FilterRule>) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    /// Replaces every rule, keeping the whitelist and blacklist.
    pub fn replace_rules(&mut self, rules: impl IntoIterator<Item = FilterRule>) {
        self.rules.clear();
        self.domain_index.clear();
        self.path_index.clear();
        self.regex_rules.clear();
        self.literal_rules.clear();
        self.add_rules(rules);
    }

    /// Adds a domain to the whitelist.
    pub fn whitelist_domain(&mut self, domain: &str) {
        let domain = normalize_domain(domain);
        if !domain.is_empty() {
            self.whitelist.insert(domain);
        }
    }

    /// Adds a domain to the blacklist.
    pub fn blacklist_domain(&mut self, domain: &str) {
        let domain = normalize_domain(domain);
        if !domain.is_empty() {
            self.blacklist.insert(domain);
        }
    }

    /// Returns true if the domain is whitelisted.
    pub fn is_whitelisted(&self, domain: &str) -> bool {
        self.whitelist.contains(domain)
    }

    /// Returns true if the domain is blacklisted.
    pub fn is_blacklisted(&self, domain: &str) -> bool {
        self.blacklist.contains(domain)
    }

    /// Rules indexed under an exact domain, in insertion order.
    pub fn domain_rules(&self, domain: &str) -> &[Arc<FilterRule>] {
        self.domain_index.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rules indexed under an exact path, in insertion order.
    pub fn path_rules(&self, path: &str) -> &[Arc<FilterRule>] {
        self.path_index.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Compiled regex rules in insertion order.
    pub fn regex_rules(&self) -> &[(Regex, Arc<FilterRule>)] {
        &self.regex_rules
    }

    /// Literal-fallback rules in insertion order.
    pub fn literal_rules(&self) -> &[Arc<FilterRule>] {
        &self.literal_rules
    }

    /// All rules in insertion order, including dead ones.
    pub fn rules(&self) -> &[Arc<FilterRule>] {
        &self.rules
    }

    /// Number of rules held.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are held.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules reachable through an index.
    pub fn indexed_len(&self) -> usize {
        self.domain_index.values().map(Vec::len).sum::<usize>()
            + self.path_index.values().map(Vec::len).sum::<usize>()
            + self.regex_rules.len()
            + self.literal_rules.len()
    }
}
