//! Engine configuration.

use core::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use crate::{Error, Value};

/// A host function callable from templates.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

/// Where templates live, where artifacts go, and which functions templates
/// may call. Immutable once handed to an [`Engine`](crate::Engine).
#[derive(Clone)]
pub struct Env {
    root: Utf8PathBuf,
    source_dir: Utf8PathBuf,
    target_dir: Utf8PathBuf,
    extensions: Vec<String>,
    debug: bool,
    strict_mode: bool,
    functions: IndexMap<String, Function>,
}

impl Default for Env {
    fn default() -> Self {
        Self::new(".")
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("root", &self.root)
            .field("source_dir", &self.source_dir)
            .field("target_dir", &self.target_dir)
            .field("extensions", &self.extensions)
            .field("debug", &self.debug)
            .field("strict_mode", &self.strict_mode)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Env {
    /// Defaults rooted at `root`: sources in `views/`, artifacts in
    /// `.quill/`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            source_dir: "views".into(),
            target_dir: ".quill".into(),
            extensions: vec![".quill.html".into(), ".quill".into(), ".html".into()],
            debug: false,
            strict_mode: false,
            functions: IndexMap::new(),
        }
    }

    /// Template source directory, relative to the root.
    pub fn with_source_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    /// Artifact directory, relative to the root.
    pub fn with_target_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    /// Source extensions, tried in order.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Recompile on every request instead of trusting cached artifacts.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Make reading an unbound variable an error.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Expose `f` to templates as `name`. Replaces a built-in of the same
    /// name.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    /// Check that the configuration can work at all.
    pub fn validate(&self) -> Result<(), Error> {
        if self.extensions.is_empty() {
            return Err(Error::Config("at least one template extension is required".into()));
        }
        if let Some(ext) = self.extensions.iter().find(|e| !e.starts_with('.') || e.len() < 2) {
            return Err(Error::Config(format!(
                "extension `{ext}` must start with a `.`"
            )));
        }
        if self.source_root() == self.target_root() {
            return Err(Error::Config(format!(
                "source and artifact directories are both `{}`",
                self.source_root()
            )));
        }
        Ok(())
    }

    /// Base directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory template names are resolved in.
    pub fn source_root(&self) -> Utf8PathBuf {
        self.root.join(&self.source_dir)
    }

    /// Directory artifacts are written to.
    pub fn target_root(&self) -> Utf8PathBuf {
        self.root.join(&self.target_dir)
    }

    /// Recognized source extensions, in lookup order.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether cached artifacts are ignored.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether unbound variables are errors.
    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    /// A user-registered function.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Canonical template name: `/`-separated, rooted, `.` and `..`
    /// resolved, and without a recognized extension.
    pub fn normalize(&self, name: &str) -> String {
        let path = quill_syntax::path::normalize(name);
        for ext in &self.extensions {
            if let Some(stem) = path.strip_suffix(ext.as_str()) {
                if !stem.ends_with('/') {
                    return stem.to_owned();
                }
            }
        }
        path
    }
}
