//! Stealth request headers and security response headers.

use std::collections::HashMap;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};

/// Request headers that reveal a proxy hop.
pub const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "proxy-connection",
    "proxy-authorization",
    "x-forwarded-for",
    "x-real-ip",
    "via",
];

/// Browser-like request headers, set only when the client sent none.
pub const STEALTH_DEFAULTS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.5"),
    ("accept-encoding", "gzip, deflate"),
    ("dnt", "1"),
    ("connection", "keep-alive"),
    ("upgrade-insecure-requests", "1"),
];

/// Response headers always set, overwriting upstream values.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "permissions-policy",
        "geolocation=(), microphone=(), camera=()",
    ),
];

/// Strips proxy-revealing headers and fills missing browser headers.
pub fn apply_stealth_headers(headers: &mut HeaderMap) {
    for name in STRIPPED_REQUEST_HEADERS {
        headers.remove(*name);
    }

    for (name, value) in STEALTH_DEFAULTS {
        let name = HeaderName::from_static(name);
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
}

/// Sets the security headers on a response.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

/// Flattens headers into a map keyed by lower-case name.
///
/// Repeated headers keep their first value; values that are not visible
/// ASCII are skipped.
pub fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

/// Returns true if the content type names an HTML document.
pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}
