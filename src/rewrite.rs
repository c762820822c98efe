//! Relative-URL-to-absolute-path rewriting with webroot-boundary protection.
//!
//! Compiled stylesheets get served from a cache location, not from the
//! directory they were authored in, so every relative `url(...)` reference
//! has to be rebased to a site-rooted absolute path. A reference with more
//! `../` steps than there are directories between the source file and the
//! webroot would resolve outside the site root and aborts the whole rewrite.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::error::StyleError;

/// Any `url(...)` reference; the inner text still carries its original
/// whitespace and quoting.
static URL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"url\s*\(([^)]*)\)").expect("Error compiling the url() regex")
});

/// Rewrites relative resource references inside stylesheet text into
/// site-rooted absolute paths.
#[derive(Debug, Clone, Default)]
pub struct UrlRewriter {
    /// Filesystem directory served as the site root.
    pub webroot: Utf8PathBuf,
    /// Site-relative prefix when the site is served from a subdirectory.
    pub sub_folder: String,
}

impl UrlRewriter {
    /// Creates a rewriter for a site rooted at `webroot`.
    pub fn new(webroot: impl Into<Utf8PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
            sub_folder: String::new(),
        }
    }

    /// Rewrites every relative `url(...)` reference in `content`, where the
    /// text originates from the stylesheet at `file`. References that are
    /// data URIs, absolute, or carry a protocol are left unchanged; a pass
    /// with no matches returns the input as-is.
    pub fn rewrite(&self, content: &str, file: &Utf8Path) -> Result<String, StyleError> {
        let mut out = String::with_capacity(content.len());
        let mut last = 0;

        for caps in URL_REF.captures_iter(content) {
            let inner = caps.get(1).expect("url() capture group");
            let (quote, path) = strip_quotes(inner.as_str().trim());

            out.push_str(&content[last..inner.start()]);
            last = inner.end();

            if path.starts_with("data:") || path.starts_with('/') || path.contains("://") {
                out.push_str(inner.as_str());
                continue;
            }

            out.push_str(quote);
            out.push_str(&self.resolve(path, file)?);
            out.push_str(quote);
        }

        out.push_str(&content[last..]);
        Ok(out)
    }

    /// Rebases one relative reference against the site-relative directory of
    /// the source file.
    fn resolve(&self, path: &str, file: &Utf8Path) -> Result<String, StyleError> {
        let dir = file.parent().unwrap_or(Utf8Path::new("")).as_str();
        let site_dir = dir.strip_prefix(self.webroot.as_str()).unwrap_or(dir);
        let base = format!("{}{}", self.sub_folder, site_dir);

        let parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).rev().collect();
        let ups = path.matches("../").count();

        if ups > parts.len() {
            return Err(StyleError::PathEscape {
                file: file.to_owned(),
                reference: path.to_owned(),
            });
        }

        let mut base = parts[ups..]
            .iter()
            .rev()
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        if !base.is_empty() && !base.starts_with('/') {
            base.insert(0, '/');
        }

        // Literal token removal, not full path normalization.
        let joined = format!("{base}/{path}");
        Ok(joined.replace("../", "").replace("./", ""))
    }
}

/// Splits one level of surrounding quotes off a reference, keeping the quote
/// so the substitution can preserve the original style.
fn strip_quotes(s: &str) -> (&str, &str) {
    let bytes = s.as_bytes();

    if s.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[s.len() - 1] == bytes[0] {
        (&s[..1], s[1..s.len() - 1].trim())
    } else {
        ("", s)
    }
}
