use camino::Utf8PathBuf;
use thiserror::Error;

use crate::compiler::Dialect;

/// Errors that can occur while preprocessing stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An external compiler backend failed. The original backend error is
    /// retained as the cause for diagnostics.
    #[error("Error in {dialect} compiler for '{file}'")]
    Compilation {
        /// Dialect whose backend raised the error.
        dialect: Dialect,
        /// Source file being compiled.
        file: Utf8PathBuf,
        /// Opaque backend error.
        #[source]
        source: anyhow::Error,
    },

    /// A relative resource reference resolves above the site root.
    #[error("Error in stylesheet '{file}'. The following URL goes above webroot: '{reference}'")]
    PathEscape {
        /// Stylesheet containing the offending reference.
        file: Utf8PathBuf,
        /// The reference as written in the stylesheet.
        reference: String,
    },

    /// Recursive import inlining exceeded the safety bound, which usually
    /// means two files import each other.
    #[error("Import depth limit of {limit} exceeded while inlining '{file}'")]
    ImportDepth {
        /// File at which the bound was hit.
        file: Utf8PathBuf,
        /// The configured recursion bound.
        limit: usize,
    },

    /// Couldn't load data from file.
    #[error("Couldn't load data from file.\n{0}")]
    FileSystem(#[from] std::io::Error),
}
