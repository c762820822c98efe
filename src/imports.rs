//! Recursive textual `@import` inlining for the plain-CSS path.
//!
//! Each recognized `@import [url(...)] "path" [media];` directive is
//! replaced with the content of the referenced file, resolved relative to
//! the importing file's directory. Imports of imported files are expanded
//! recursively against their own directories. A media-qualified import gets
//! its substituted content wrapped in an `@media` block:
//!
//! ```css
//! @import url(reset.css) screen, projection;
//! ```
//!
//! becomes
//!
//! ```css
//! @media screen, projection { ... }
//! ```
//!
//! Directives pointing at files that don't exist, and directives that don't
//! match the recognized shape, pass through as literal text.

use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;

use crate::error::StyleError;

/// Bound on recursive expansion. Mutually importing files would otherwise
/// recurse forever; hitting the bound is a reported error.
const MAX_DEPTH: usize = 64;

/// Matches any shape of import rule: optional `url()` wrapper, optional
/// quoting, optional trailing media-query list.
static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s*(?:url)?\(?['"]?([^'"()]*)['"]?\)?\s?([^;]*);"#)
        .expect("Error compiling the @import regex")
});

/// Matches the opening of a `url(...)` reference, up to and including the
/// optional quote.
static URL_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\burl\(["']?"#).expect("Error compiling the url() regex")
});

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+:").expect("Error compiling the scheme regex"));

/// Recursively expands `@import` directives in `content`, resolving paths
/// relative to `file`'s directory.
pub fn inline(content: &str, file: &Utf8Path) -> Result<String, StyleError> {
    inline_at(content, file, 0)
}

fn inline_at(content: &str, file: &Utf8Path, depth: usize) -> Result<String, StyleError> {
    if depth > MAX_DEPTH {
        return Err(StyleError::ImportDepth {
            file: file.to_owned(),
            limit: MAX_DEPTH,
        });
    }

    let dir = file.parent().unwrap_or(Utf8Path::new(""));
    let mut content = content.to_owned();

    // Operate on the first pass's match list; substituted content is not
    // rescanned at this level.
    let directives: Vec<(String, String, String)> = IMPORT
        .captures_iter(&content)
        .map(|c| (c[0].to_owned(), c[1].to_owned(), c[2].to_owned()))
        .collect();

    for (matched, target, media) in directives {
        let path = dir.join(&target);

        // A missing file is not an error; the directive stays verbatim.
        if !path.is_file() {
            continue;
        }

        let text = fs::read_to_string(&path)?;
        let mut text = inline_at(&text, &path, depth + 1)?;

        let new_dir = path.parent().unwrap_or(Utf8Path::new(""));
        if new_dir != dir {
            // Only a strict subdirectory of the importer gets its bare
            // url() references prefixed; anything else is left as-is.
            let prefix = format!("{dir}/");
            if let Some(rel) = new_dir.as_str().strip_prefix(&prefix) {
                text = prefix_relative_urls(&text, rel);
            }
        }

        let media = media.trim();
        if !media.is_empty() {
            text = format!("@media {media} {{{text}}}");
        }

        content = content.replace(&matched, &text);
    }

    Ok(content)
}

/// Prefixes every relative `url(...)` reference with `prefix/`. References
/// that are absolute, scheme-carrying, or otherwise not bare relative paths
/// are skipped.
fn prefix_relative_urls(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for m in URL_OPEN.find_iter(text) {
        let rest = &text[m.end()..];
        let bare = rest
            .chars()
            .next()
            .is_some_and(|c| c == '.' || c == '_' || c.is_ascii_alphanumeric())
            && !SCHEME.is_match(rest);

        out.push_str(&text[last..m.end()]);
        if bare {
            out.push_str(prefix);
            out.push('/');
        }
        last = m.end();
    }

    out.push_str(&text[last..]);
    out
}
