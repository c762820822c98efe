//! On-disk cache payload for a single compiled stylesheet.
//!
//! A compiled asset is persisted in one of two shapes. Plain CSS is written
//! as literal text, directly servable. Output of the LESS/SCSS backends is
//! written as a CBOR-encoded [`CacheEnvelope::Structured`] record which
//! carries, next to the compiled text, the modification time of every file
//! that participated in compilation. The stored timestamps act as the
//! validity witness: the envelope is trusted only while no dependency has
//! been modified since it was written.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Ordered set of `(file path, last modified at)` pairs gating the validity
/// of a cached artifact. Timestamps are Unix seconds.
pub type DependencyMap = BTreeMap<Utf8PathBuf, u64>;

/// The persisted artifact for one source file's compiled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEnvelope {
    /// Literal stylesheet text with no tracked dependencies. Only the
    /// top-level file's own mtime matters, which the baseline cache check
    /// covers.
    RawText(String),
    /// Compiled output together with its dependency set. The set always
    /// includes the originating source file itself.
    Structured {
        /// The compiled, URL-rewritten stylesheet text.
        compiled: String,
        /// Files whose modification times gate this envelope.
        dependencies: DependencyMap,
    },
}

impl CacheEnvelope {
    /// Builds a `Structured` envelope from compiled text and the set of
    /// files the backend read, recording their live modification times.
    /// The originating source file is always part of the dependency set.
    pub fn structured(
        compiled: String,
        files: impl IntoIterator<Item = Utf8PathBuf>,
        source: &Utf8Path,
    ) -> io::Result<Self> {
        let mut dependencies = DependencyMap::new();

        for file in files {
            let modified = mtime(&file)?;
            dependencies.insert(file, modified);
        }

        dependencies.insert(source.to_owned(), mtime(source)?);

        Ok(Self::Structured {
            compiled,
            dependencies,
        })
    }

    /// Serializes the envelope to its on-disk form. Raw text is written
    /// verbatim so the cache file stays directly servable; structured
    /// envelopes are CBOR-encoded, which carries the discriminant.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        match self {
            Self::RawText(text) => Ok(text.clone().into_bytes()),
            Self::Structured { .. } => {
                let mut buffer = Vec::new();
                ciborium::into_writer(self, &mut buffer).map_err(io::Error::other)?;
                Ok(buffer)
            }
        }
    }

    /// Interprets cache file content. Attempts a CBOR decode first; content
    /// that is not a structured envelope is raw text by definition, so the
    /// fallback is not an error.
    pub fn decode(bytes: &[u8]) -> Self {
        match ciborium::from_reader(bytes) {
            Ok(envelope @ Self::Structured { .. }) => envelope,
            _ => Self::RawText(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Checks the dependency set against the live filesystem. A `Structured`
    /// envelope is stale the instant any dependency's live mtime exceeds the
    /// stored one, or a dependency can no longer be read; the whole envelope
    /// is then discarded, never partially trusted.
    pub fn is_stale(&self) -> bool {
        match self {
            Self::RawText(_) => false,
            Self::Structured { dependencies, .. } => {
                dependencies.iter().any(|(file, &stored)| {
                    match mtime(file) {
                        Ok(live) => live > stored,
                        Err(_) => true,
                    }
                })
            }
        }
    }

    /// Returns the web-servable stylesheet body.
    pub fn servable(&self) -> &str {
        match self {
            Self::RawText(text) => text,
            Self::Structured { compiled, .. } => compiled,
        }
    }
}

/// Last modification time of a file as Unix seconds.
pub(crate) fn mtime(path: &Utf8Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}
