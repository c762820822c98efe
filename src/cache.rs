//! Cache-validity orchestration for stylesheet requests.
//!
//! One cache file per logical compiled asset, named by the blake3 hash of
//! the source path. A request runs check-or-compile for each source in
//! order and concatenates the servable bodies. There is no locking around
//! cache files; concurrent requests for the same stale source may race and
//! redundantly recompile, with the last writer winning. The recomputed
//! content is deterministic given identical inputs, so this is an accepted
//! inefficiency rather than a correctness hazard.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

#[cfg(not(feature = "grass"))]
use crate::compiler::NoScss;
#[cfg(feature = "grass")]
use crate::compiler::GrassScss;
use crate::compiler::{Dialect, LessBackend, LesscProcess, ScssBackend};
use crate::envelope::{CacheEnvelope, mtime};
use crate::error::StyleError;
use crate::rewrite::UrlRewriter;
use crate::{Options, imports};

/// A servable response body together with its content type.
#[derive(Debug, Clone)]
pub struct Content {
    /// Always the stylesheet content type.
    pub content_type: &'static str,
    /// Final compiled, concatenated stylesheet text.
    pub body: String,
}

/// Orchestrates cache checks, compiler dispatch, URL rewriting, and cache
/// persistence for stylesheet assets.
pub struct CachePipeline {
    cache_dir: Utf8PathBuf,
    rewriter: UrlRewriter,
    options: Options,
    less: Box<dyn LessBackend>,
    scss: Box<dyn ScssBackend>,
}

impl CachePipeline {
    /// Creates a pipeline persisting cache files under `cache_dir`, for a
    /// site rooted at `webroot`. Backends default to `lessc` and, with the
    /// `grass` feature, the grass compiler.
    pub fn new(cache_dir: impl Into<Utf8PathBuf>, webroot: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            rewriter: UrlRewriter::new(webroot),
            options: Options::default(),
            less: Box::new(LesscProcess),
            #[cfg(feature = "grass")]
            scss: Box::new(GrassScss),
            #[cfg(not(feature = "grass"))]
            scss: Box::new(NoScss),
        }
    }

    /// Sets the per-request compilation options.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Sets the site-relative prefix for sites served from a subdirectory.
    pub fn sub_folder(mut self, prefix: impl Into<String>) -> Self {
        self.rewriter.sub_folder = prefix.into();
        self
    }

    /// Replaces the LESS backend.
    pub fn less_backend(mut self, backend: impl LessBackend + 'static) -> Self {
        self.less = Box::new(backend);
        self
    }

    /// Replaces the SCSS backend.
    pub fn scss_backend(mut self, backend: impl ScssBackend + 'static) -> Self {
        self.scss = Box::new(backend);
        self
    }

    /// Produces the servable body for an ordered list of source files,
    /// sequentially running check-or-compile for each.
    pub fn serve(&self, sources: &[Utf8PathBuf]) -> Result<Content, StyleError> {
        let mut body = String::new();

        for source in sources {
            let cache_file = self.cache_path(source);

            let envelope = match self.check_cache(source, &cache_file)? {
                Some(envelope) => {
                    tracing::debug!("Cache hit for {source}");
                    envelope
                }
                None => {
                    tracing::debug!("Cache miss for {source}, compiling");
                    self.compile(source, &cache_file)?
                }
            };

            body.push_str(envelope.servable());
        }

        Ok(Content {
            content_type: "text/css",
            body,
        })
    }

    /// Checks whether a valid cached envelope exists for `source`.
    ///
    /// The baseline check compares the source's own mtime against the cache
    /// file. Content that passes it is decoded; a structured envelope is
    /// then additionally validated against every tracked dependency, and
    /// discarded whole if any of them changed.
    pub fn check_cache(
        &self,
        source: &Utf8Path,
        cache_file: &Utf8Path,
    ) -> Result<Option<CacheEnvelope>, StyleError> {
        let Some(bytes) = baseline(source, cache_file)? else {
            return Ok(None);
        };

        let envelope = CacheEnvelope::decode(&bytes);

        if envelope.is_stale() {
            tracing::debug!("Cached envelope for {source} has a stale dependency");
            return Ok(None);
        }

        Ok(Some(envelope))
    }

    /// Compiles `source` according to its dialect, rewrites resource URLs,
    /// persists the result to `cache_file`, and returns the fresh envelope.
    pub fn compile(
        &self,
        source: &Utf8Path,
        cache_file: &Utf8Path,
    ) -> Result<CacheEnvelope, StyleError> {
        let dialect = Dialect::detect(source, &self.options);

        let envelope = match dialect {
            Dialect::Less => {
                let compiled = self.less.compile(source).map_err(|e| wrap(dialect, source, e))?;
                let text = self.rewriter.rewrite(&compiled.text, source)?;

                CacheEnvelope::structured(text, compiled.files, source)?
            }
            Dialect::Scss => {
                let input = fs::read_to_string(source)?;
                let dir = source.parent().unwrap_or(Utf8Path::new(""));

                let compiled = self
                    .scss
                    .compile(&input, &[dir])
                    .map_err(|e| wrap(dialect, source, e))?;
                let text = self.rewriter.rewrite(&compiled.text, source)?;

                CacheEnvelope::structured(text, compiled.files, source)?
            }
            Dialect::Plain => {
                let input = fs::read_to_string(source)?;
                let inlined = imports::inline(&input, source)?;

                CacheEnvelope::RawText(self.rewriter.rewrite(&inlined, source)?)
            }
        };

        if let Some(dir) = cache_file.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(cache_file, envelope.encode()?)?;

        Ok(envelope)
    }

    /// Cache file for a source asset, addressed by the hash of its path.
    pub fn cache_path(&self, source: &Utf8Path) -> Utf8PathBuf {
        let hash = blake3::hash(source.as_str().as_bytes());
        self.cache_dir.join(format!("{}.css", hash.to_hex()))
    }
}

/// Baseline existence and mtime comparison between a source file and its
/// cache file. Returns the cached bytes only when the cache is at least as
/// new as the source.
fn baseline(source: &Utf8Path, cache_file: &Utf8Path) -> io::Result<Option<Vec<u8>>> {
    if !cache_file.exists() {
        return Ok(None);
    }

    if mtime(source)? > mtime(cache_file)? {
        return Ok(None);
    }

    Ok(Some(fs::read(cache_file)?))
}

fn wrap(dialect: Dialect, file: &Utf8Path, source: anyhow::Error) -> StyleError {
    StyleError::Compilation {
        dialect,
        file: file.to_owned(),
        source,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::compiler::Compiled;
    use crate::envelope::DependencyMap;

    fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    /// LESS backend stub reporting a fixed output and dependency list while
    /// counting invocations.
    struct FakeLess {
        calls: Arc<AtomicUsize>,
        text: &'static str,
        files: Vec<Utf8PathBuf>,
    }

    impl LessBackend for FakeLess {
        fn compile(&self, _: &Utf8Path) -> anyhow::Result<Compiled> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Compiled {
                text: self.text.to_owned(),
                files: self.files.clone(),
            })
        }
    }

    struct FailingLess;

    impl LessBackend for FailingLess {
        fn compile(&self, _: &Utf8Path) -> anyhow::Result<Compiled> {
            anyhow::bail!("parse error at line 3")
        }
    }

    #[test]
    fn test_plain_css_served_and_cached() {
        let (_guard, dir) = utf8_tempdir();
        let webroot = dir.join("www");
        fs::create_dir_all(webroot.join("css")).unwrap();

        let source = webroot.join("css/theme.css");
        fs::write(&source, "div{background:url(../img/bg.png)}").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &webroot);
        let content = pipeline.serve(&[source.clone()]).unwrap();

        assert_eq!(content.content_type, "text/css");
        assert_eq!(content.body, "div{background:url(/img/bg.png)}");

        // The cache file holds the rewritten text verbatim.
        let cached = fs::read_to_string(pipeline.cache_path(&source)).unwrap();
        assert_eq!(cached, content.body);
    }

    #[test]
    fn test_cache_hit_skips_recompilation() {
        let (_guard, dir) = utf8_tempdir();
        let source = dir.join("main.less");
        fs::write(&source, ".a { .b }").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = CachePipeline::new(dir.join("cache"), &dir).less_backend(FakeLess {
            calls: calls.clone(),
            text: "body{color:red}",
            files: vec![source.clone()],
        });

        let first = pipeline.serve(&[source.clone()]).unwrap();
        let second = pipeline.serve(&[source.clone()]).unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_dependency_invalidates_cache() {
        let (_guard, dir) = utf8_tempdir();
        let a = dir.join("a.less");
        let b = dir.join("b.less");
        fs::write(&a, "@import 'b';").unwrap();
        fs::write(&b, ".b { color: red }").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &dir);
        let cache_file = pipeline.cache_path(&a);
        fs::create_dir_all(cache_file.parent().unwrap()).unwrap();

        // Envelope recorded with b's timestamp one second before its live
        // mtime, as if b changed right after compilation.
        let mut dependencies = DependencyMap::new();
        dependencies.insert(a.clone(), mtime(&a).unwrap());
        dependencies.insert(b.clone(), mtime(&b).unwrap() - 1);

        let envelope = CacheEnvelope::Structured {
            compiled: "body{color:red}".into(),
            dependencies,
        };
        fs::write(&cache_file, envelope.encode().unwrap()).unwrap();

        assert!(pipeline.check_cache(&a, &cache_file).unwrap().is_none());
    }

    #[test]
    fn test_valid_structured_cache_is_returned() {
        let (_guard, dir) = utf8_tempdir();
        let a = dir.join("a.less");
        let b = dir.join("b.less");
        fs::write(&a, "@import 'b';").unwrap();
        fs::write(&b, ".b { color: red }").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &dir);
        let cache_file = pipeline.cache_path(&a);
        fs::create_dir_all(cache_file.parent().unwrap()).unwrap();

        let envelope =
            CacheEnvelope::structured("body{color:red}".into(), [b.clone()], &a).unwrap();
        fs::write(&cache_file, envelope.encode().unwrap()).unwrap();

        let cached = pipeline.check_cache(&a, &cache_file).unwrap().unwrap();
        assert_eq!(cached.servable(), "body{color:red}");
    }

    #[test]
    fn test_less_envelope_tracks_source_and_reported_files() {
        let (_guard, dir) = utf8_tempdir();
        let source = dir.join("main.less");
        let import = dir.join("vars.less");
        fs::write(&source, "@import 'vars';").unwrap();
        fs::write(&import, "@red: #f00;").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &dir).less_backend(FakeLess {
            calls: Arc::new(AtomicUsize::new(0)),
            text: "body{color:red}",
            files: vec![import.clone()],
        });

        let envelope = pipeline
            .compile(&source, &pipeline.cache_path(&source))
            .unwrap();
        let CacheEnvelope::Structured { dependencies, .. } = envelope else {
            panic!("expected a structured envelope");
        };

        assert!(dependencies.contains_key(&source));
        assert!(dependencies.contains_key(&import));
    }

    #[test]
    fn test_backend_error_is_wrapped() {
        let (_guard, dir) = utf8_tempdir();
        let source = dir.join("main.less");
        fs::write(&source, "nonsense").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &dir).less_backend(FailingLess);
        let err = pipeline.serve(&[source]).unwrap_err();

        let StyleError::Compilation { dialect, source, .. } = err else {
            panic!("expected a compilation error");
        };
        assert_eq!(dialect, Dialect::Less);
        assert!(source.to_string().contains("parse error"));
    }

    #[test]
    fn test_lessify_option_routes_css_through_less() {
        let (_guard, dir) = utf8_tempdir();
        let source = dir.join("main.css");
        fs::write(&source, "body{margin:0}").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = CachePipeline::new(dir.join("cache"), &dir)
            .options(Options {
                lessify_all_css: true,
                ..Default::default()
            })
            .less_backend(FakeLess {
                calls: calls.clone(),
                text: "body{margin:0}",
                files: vec![source.clone()],
            });

        pipeline.serve(&[source]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_sources_concatenated_in_order() {
        let (_guard, dir) = utf8_tempdir();
        let a = dir.join("a.css");
        let b = dir.join("b.css");
        fs::write(&a, "a{color:red}").unwrap();
        fs::write(&b, "b{color:blue}").unwrap();

        let pipeline = CachePipeline::new(dir.join("cache"), &dir);
        let content = pipeline.serve(&[a, b]).unwrap();

        assert_eq!(content.body, "a{color:red}b{color:blue}");
    }
}
