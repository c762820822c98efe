//! Dialect detection and external compiler backends.
//!
//! The pipeline itself never understands LESS or SCSS semantics. Backends
//! are opaque: they take source input, may read further files, and return
//! compiled text plus the list of files they touched. Errors they raise are
//! equally opaque and get wrapped at the dispatch layer.

use std::fmt::{self, Display};
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use crate::Options;

/// One of the three stylesheet source syntaxes handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// LESS-like dialect, compiled by a [`LessBackend`].
    Less,
    /// SCSS-like dialect, compiled by a [`ScssBackend`].
    Scss,
    /// Plain CSS, handled by textual import inlining.
    Plain,
}

impl Dialect {
    /// Selects the dialect for a source file. Extension wins, but the
    /// forced-mode options route even bare `.css` files through a compiler.
    /// The LESS check takes precedence over the SCSS check.
    pub fn detect(path: &Utf8Path, options: &Options) -> Self {
        if path.extension() == Some("less") || options.lessify_all_css {
            Self::Less
        } else if path.extension() == Some("scss") || options.scssify_all_css {
            Self::Scss
        } else {
            Self::Plain
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Less => write!(f, "LESS"),
            Self::Scss => write!(f, "SCSS"),
            Self::Plain => write!(f, "CSS"),
        }
    }
}

/// Output of an external compiler backend.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// The compiled stylesheet text.
    pub text: String,
    /// Every file the backend read during compilation. Used to build the
    /// cache envelope's dependency set.
    pub files: Vec<Utf8PathBuf>,
}

/// External LESS-like compiler. Reads the source file itself and tracks its
/// own imports.
pub trait LessBackend: Send + Sync {
    /// Compiles the file at `path`.
    fn compile(&self, path: &Utf8Path) -> anyhow::Result<Compiled>;
}

/// External SCSS-like compiler. Receives the source text up front; imports
/// are resolved against `import_paths`.
pub trait ScssBackend: Send + Sync {
    /// Compiles `source`, resolving imports against `import_paths`.
    fn compile(&self, source: &str, import_paths: &[&Utf8Path]) -> anyhow::Result<Compiled>;
}

/// LESS backend spawning the `lessc` executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LesscProcess;

impl LessBackend for LesscProcess {
    fn compile(&self, path: &Utf8Path) -> anyhow::Result<Compiled> {
        let output = Command::new("lessc")
            .arg(path.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            anyhow::bail!(
                "lessc exited with {}\n{}",
                output.status,
                String::from_utf8_lossy(&output.stderr),
            );
        }

        Ok(Compiled {
            text: String::from_utf8(output.stdout)?,
            // lessc doesn't report the imports it followed.
            files: vec![path.to_owned()],
        })
    }
}

/// SCSS backend built on the `grass` crate.
///
/// `grass` doesn't expose the list of files it parsed, so the reported file
/// set is empty and dependency tracking degrades to the source file itself.
/// A richer backend can report the full set through [`ScssBackend`].
#[cfg(feature = "grass")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GrassScss;

#[cfg(feature = "grass")]
impl ScssBackend for GrassScss {
    fn compile(&self, source: &str, import_paths: &[&Utf8Path]) -> anyhow::Result<Compiled> {
        let mut opts = grass::Options::default();

        for path in import_paths {
            opts = opts.load_path(path.as_std_path());
        }

        let text = grass::from_string(source.to_owned(), &opts).map_err(anyhow::Error::from)?;

        Ok(Compiled {
            text,
            files: Vec::new(),
        })
    }
}

/// Placeholder used when the crate is built without the `grass` feature and
/// no backend was supplied.
#[cfg(not(feature = "grass"))]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NoScss;

#[cfg(not(feature = "grass"))]
impl ScssBackend for NoScss {
    fn compile(&self, _: &str, _: &[&Utf8Path]) -> anyhow::Result<Compiled> {
        anyhow::bail!("no SCSS backend configured; enable the `grass` feature or supply one")
    }
}
