//! HTML rewriting: cosmetic CSS and tracker-stubbing scriptlets.
//!
//! The rewriter does plain string insertion on the decoded document, with no
//! HTML parsing. It is not idempotent, so each body must pass through it
//! exactly once.

use std::borrow::Cow;

use crate::config::FilterSettings;
use crate::defaults;

/// Injects a hiding stylesheet and a scriptlet block into HTML bodies.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    style_tag: Option<String>,
    script_tag: Option<String>,
}

impl Default for ContentRewriter {
    fn default() -> Self {
        Self::new(&defaults::default_selectors(), &defaults::default_scriptlets())
    }
}

impl ContentRewriter {
    /// Creates a rewriter. An empty list produces no block of that kind.
    pub fn new(selectors: &[String], scriptlets: &[String]) -> Self {
        let style_tag = (!selectors.is_empty()).then(|| {
            let css = selectors
                .iter()
                .map(|sel| format!("{} {{ display: none !important; }}", sel))
                .collect::<Vec<_>>()
                .join("\n");
            format!("<style type=\"text/css\">{}</style>", css)
        });

        let script_tag = (!scriptlets.is_empty())
            .then(|| format!("<script type=\"text/javascript\">{}</script>", scriptlets.join("\n")));

        Self {
            style_tag,
            script_tag,
        }
    }

    /// Creates a rewriter from filter settings, falling back to built-ins.
    pub fn from_settings(settings: &FilterSettings) -> Self {
        Self::new(
            &settings.selectors_or_default(),
            &settings.scriptlets_or_default(),
        )
    }

    /// Rewrites an HTML body.
    ///
    /// The style block goes before the first `</head>`, else before the first
    /// `<body`, else nowhere. The script block goes before the first
    /// `</body>`, else at the end. Bodies that are not valid UTF-8 are
    /// returned unchanged.
    pub fn rewrite_html<'a>(&self, body: &'a [u8], url: &str) -> Cow<'a, [u8]> {
        let Ok(html) = std::str::from_utf8(body) else {
            tracing::debug!("Skipping rewrite of non-UTF-8 body from {}", url);
            return Cow::Borrowed(body);
        };

        let mut html = html.to_string();

        if let Some(style) = &self.style_tag {
            if let Some(pos) = html.find("</head>").or_else(|| html.find("<body")) {
                html.insert_str(pos, style);
            }
        }

        if let Some(script) = &self.script_tag {
            match html.find("</body>") {
                Some(pos) => html.insert_str(pos, script),
                None => html.push_str(script),
            }
        }

        Cow::Owned(html.into_bytes())
    }
}
