//! Filter rule model.
//!
//! A [`FilterRule`] is an immutable value describing what to match (a literal
//! substring, a domain, a path, or a regular expression) and what to do when
//! it matches. Rules arrive either from the built-in defaults or from a
//! configuration file; file-sourced rules are validated through [`RawRule`]
//! so loosely-typed input never reaches the matcher.
//!
//! ## Tiers
//!
//! Every rule belongs to exactly one lookup tier, fixed when it is created:
//!
//! | field set                   | tier      |
//! |-----------------------------|-----------|
//! | `domain`                    | `Domain`  |
//! | `path` (no domain)          | `Path`    |
//! | pattern has regex syntax    | `Regex`   |
//! | anything else               | `Literal` |

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Characters whose presence turns a pattern into a regular expression.
pub const REGEX_METACHARS: &[char] = &[
    '.', '*', '+', '?', '^', '$', '{', '}', '(', ')', '|', '[', ']', '\\',
];

/// Returns true if the pattern contains regex syntax.
pub fn has_regex_metachars(pattern: &str) -> bool {
    pattern.contains(REGEX_METACHARS)
}

/// Action attached to a rule.
///
/// Only [`RuleAction::Block`] changes the verdict; every other action means
/// "not blocked" when the rule is the first to match. `Redirect` and `Modify`
/// are carried through unchanged for consumers that understand them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Block the request.
    Block,
    /// Explicitly allow the request.
    Allow,
    /// Redirect the request (declared, not executed).
    Redirect,
    /// Modify the request (declared, not executed).
    Modify,
}

impl RuleAction {
    /// Returns the action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block => "block",
            RuleAction::Allow => "allow",
            RuleAction::Redirect => "redirect",
            RuleAction::Modify => "modify",
        }
    }

    /// Returns true if this action blocks the request.
    pub fn is_block(&self) -> bool {
        matches!(self, RuleAction::Block)
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup tier a rule is indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Indexed by exact request authority.
    Domain,
    /// Indexed by exact request path.
    Path,
    /// Compiled and searched anywhere in the URL.
    Regex,
    /// Plain substring of the URL.
    Literal,
}

/// The request attributes a rule's constraints are checked against.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// Full request URL.
    pub url: &'a str,
    /// HTTP method as sent by the client.
    pub method: &'a str,
    /// Request headers keyed by lower-case name, if the caller has them.
    pub headers: Option<&'a HashMap<String, String>>,
    /// Request content type, if the caller has one.
    pub content_type: Option<&'a str>,
}

impl<'a> RequestInfo<'a> {
    /// Creates request info with no headers and no content type.
    pub fn new(url: &'a str, method: &'a str) -> Self {
        Self {
            url,
            method,
            headers: None,
            content_type: None,
        }
    }

    /// Sets the request headers.
    pub fn with_headers(mut self, headers: &'a HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Sets the request content type. Empty strings count as absent.
    pub fn with_content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type).filter(|ct| !ct.is_empty());
        self
    }

    /// Returns the key this request is cached under.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.method, self.url)
    }
}

/// A single filtering rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct FilterRule {
    /// Literal substring, domain, or regular expression.
    pub pattern: String,
    /// What to do when the rule matches.
    pub action: RuleAction,
    /// Exact request authority this rule is indexed under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Exact request path this rule is indexed under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Required HTTP method (case-insensitive).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Substring the request content type must contain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Headers that must all be present with exactly these values. Names
    /// are stored lower-cased.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Stored for consumers; not used to order evaluation.
    pub priority: i32,
    /// Disabled rules stay indexed but never match.
    pub enabled: bool,
    /// Free text for diagnostics.
    pub description: String,
}

impl FilterRule {
    /// Creates an enabled rule with no constraints.
    pub fn new(pattern: impl Into<String>, action: RuleAction) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            domain: None,
            path: None,
            method: None,
            content_type: None,
            headers: None,
            priority: 0,
            enabled: true,
            description: String::new(),
        }
    }

    /// Creates a blocking rule.
    pub fn block(pattern: impl Into<String>) -> Self {
        Self::new(pattern, RuleAction::Block)
    }

    /// Creates an allowing rule.
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self::new(pattern, RuleAction::Allow)
    }

    /// Sets the domain constraint (stored lower-cased).
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into().to_lowercase());
        self
    }

    /// Sets the path constraint.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the method constraint.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the content type constraint.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Adds a required header. The name is stored lower-cased.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into().to_lowercase(), value.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets whether this rule is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the tier this rule is indexed under.
    pub fn tier(&self) -> RuleTier {
        if self.domain.is_some() {
            RuleTier::Domain
        } else if self.path.is_some() {
            RuleTier::Path
        } else if has_regex_metachars(&self.pattern) {
            RuleTier::Regex
        } else {
            RuleTier::Literal
        }
    }

    /// Returns true if the rule blocks when it matches.
    pub fn is_block(&self) -> bool {
        self.action.is_block()
    }

    /// Checks the rule's enabled flag and method/content-type/header
    /// constraints against a request. The pattern itself is checked by the
    /// caller, since how it applies depends on the tier.
    pub fn matches_request(&self, req: &RequestInfo<'_>) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(method) = &self.method {
            if !method.eq_ignore_ascii_case(req.method) {
                return false;
            }
        }

        if let (Some(expected), Some(actual)) = (&self.content_type, req.content_type) {
            if !actual.contains(expected.as_str()) {
                return false;
            }
        }

        match &self.headers {
            Some(required) if !required.is_empty() => {
                let Some(headers) = req.headers else {
                    return false;
                };
                required
                    .iter()
                    .all(|(name, value)| headers.get(name) == Some(value))
            }
            _ => true,
        }
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.pattern
        } else {
            &self.description
        }
    }
}

/// Wire schema for a rule in a configuration file.
///
/// `action` is required. Unknown fields are rejected. A rule must have a
/// non-empty pattern unless it is anchored by `domain` or `path`, since an
/// empty literal would match every URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    #[serde(default)]
    pattern: String,
    action: RuleAction,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    description: String,
}

fn default_enabled() -> bool {
    true
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<RawRule> for FilterRule {
    type Error = ConfigError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let domain = non_empty(raw.domain).map(|d| d.to_lowercase());
        let path = non_empty(raw.path);

        if raw.pattern.is_empty() && domain.is_none() && path.is_none() {
            return Err(ConfigError::InvalidRule(format!(
                "rule '{}' has no pattern, domain or path",
                raw.description
            )));
        }

        Ok(Self {
            pattern: raw.pattern,
            action: raw.action,
            domain,
            path,
            method: non_empty(raw.method),
            content_type: non_empty(raw.content_type),
            headers: raw.headers.map(|headers| {
                headers
                    .into_iter()
                    .map(|(name, value)| (name.to_lowercase(), value))
                    .collect()
            }),
            priority: raw.priority,
            enabled: raw.enabled,
            description: raw.description,
        })
    }
}
