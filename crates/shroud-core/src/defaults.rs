//! Built-in rule set, cosmetic selectors, and scriptlets.
//!
//! Used whenever no filter configuration is supplied or the supplied one
//! cannot be loaded.

use crate::rule::FilterRule;

/// Ad and tracker hosts blocked out of the box, with descriptions.
const TRACKER_PATTERNS: &[(&str, &str)] = &[
    ("doubleclick.net", "Google DoubleClick"),
    ("googlesyndication.com", "Google AdSense"),
    ("googletagmanager.com", "Google Tag Manager"),
    ("google-analytics.com", "Google Analytics"),
    ("googleadservices.com", "Google Ad Services"),
    ("adsystem.com", "Amazon Ad System"),
    ("amazon-adsystem.com", "Amazon Ads"),
    ("facebook.com/tr", "Facebook Tracking"),
    ("facebook.com/plugins", "Facebook Plugins"),
    ("twitter.com/i/adsct", "Twitter Ads"),
    ("ads.yahoo.com", "Yahoo Ads"),
    ("bing.com/maps/traffic", "Bing Tracking"),
    ("connect.facebook.net", "Facebook Connect"),
    ("platform.twitter.com", "Twitter Platform"),
    ("platform.linkedin.com", "LinkedIn Platform"),
    ("apis.google.com/js/plusone", "Google+ Button"),
    ("hotjar.com", "Hotjar Analytics"),
    ("mixpanel.com", "Mixpanel Analytics"),
    ("segment.com", "Segment Analytics"),
    ("amplitude.com", "Amplitude Analytics"),
    ("fullstory.com", "FullStory Analytics"),
    ("loggly.com", "Loggly Logging"),
    ("newrelic.com", "New Relic Monitoring"),
    ("cdn.ampproject.org", "AMP Project CDN"),
    ("pagead2.googlesyndication.com", "Google PageAd"),
    ("tpc.googlesyndication.com", "Google TPC"),
    ("stats.wp.com", "WordPress Stats"),
    ("scorecardresearch.com", "Scorecard Research"),
    ("quantserve.com", "Quantcast"),
    ("outbrain.com", "Outbrain Content"),
    ("taboola.com", "Taboola Content"),
];

/// Free top-level domains commonly abused for malware hosting.
const MALWARE_TLD_PATTERNS: &[(&str, &str)] = &[
    (r".*\.tk$", "Suspicious .tk domains"),
    (r".*\.ml$", "Suspicious .ml domains"),
    (r".*\.ga$", "Suspicious .ga domains"),
    (r".*\.cf$", "Suspicious .cf domains"),
];

/// Elements hidden on every rewritten page.
pub const COSMETIC_SELECTORS: &[&str] = &[
    ".advertisement",
    ".ad-banner",
    ".ad-container",
    "[id*='ad']",
    "[class*='ad']",
    "#ads",
    ".ads",
    ".adsystem",
    ".googlesyndication",
    ".doubleclick",
    ".googletagmanager",
    ".facebook-tracking",
    ".twitter-tracking",
    ".analytics",
];

/// Statements that stub out common tracking globals.
pub const SCRIPTLETS: &[&str] = &[
    "window.google_tag_manager = undefined;",
    "window.ga = function(){};",
    "window.gtag = function(){};",
    "window._gaq = [];",
    "window.GoogleAnalyticsObject = undefined;",
    "window.fbq = function(){};",
    "window._fbq = function(){};",
    "window.twq = function(){};",
    "console.log('[Shroud] Blocked tracking script');",
];

/// Returns the built-in blocking rules.
///
/// With `block_malware` off the suspicious-TLD regexes are left out.
pub fn default_rules(block_malware: bool) -> Vec<FilterRule> {
    let tlds: &[(&str, &str)] = if block_malware {
        MALWARE_TLD_PATTERNS
    } else {
        &[]
    };

    TRACKER_PATTERNS
        .iter()
        .chain(tlds)
        .map(|(pattern, description)| FilterRule::block(*pattern).with_description(*description))
        .collect()
}

/// Returns the built-in cosmetic selectors as owned strings.
pub fn default_selectors() -> Vec<String> {
    COSMETIC_SELECTORS.iter().map(|s| s.to_string()).collect()
}

/// Returns the built-in scriptlets as owned strings.
pub fn default_scriptlets() -> Vec<String> {
    SCRIPTLETS.iter().map(|s| s.to_string()).collect()
}
