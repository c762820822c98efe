#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
pub mod compiler;
mod envelope;
mod error;
pub mod imports;
mod rewrite;

pub use crate::cache::{CachePipeline, Content};
#[cfg(feature = "grass")]
pub use crate::compiler::GrassScss;
pub use crate::compiler::{Compiled, Dialect, LessBackend, LesscProcess, ScssBackend};
pub use crate::envelope::{CacheEnvelope, DependencyMap};
pub use crate::error::StyleError;
pub use crate::rewrite::UrlRewriter;

/// Per-request compilation options. Passed explicitly into dialect
/// dispatch; there is no ambient state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Treat every stylesheet as LESS regardless of its extension.
    pub lessify_all_css: bool,
    /// Treat every stylesheet as SCSS regardless of its extension. The
    /// LESS check takes precedence when both are set.
    pub scssify_all_css: bool,
}
