#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

use std::fs;
use std::sync::LazyLock;
use std::time::{Duration, Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

struct Uptime;

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> core::fmt::Result {
        let elapsed = START_TIME.elapsed();
        write!(w, "{:4}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
    }
}

static SUBSCRIBER_INIT: LazyLock<()> = LazyLock::new(|| {
    let _ = *START_TIME;

    let filter = std::env::var("QUILL_LOG")
        .ok()
        .and_then(|s| s.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(tracing::Level::WARN));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_timer(Uptime)
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .with(filter)
        .try_init()
        .ok();
});

/// Install the test tracing subscriber. Safe to call from every test.
pub fn setup() {
    #[allow(clippy::let_unit_value)]
    let _ = *SUBSCRIBER_INIT;
}

/// A temporary directory holding a `views/` source tree and a `.quill/`
/// artifact directory. Removed on drop.
pub struct TemplateDir {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl TemplateDir {
    /// Create an empty tree.
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("quill-test-")
            .tempdir()
            .expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("temp dir path is not UTF-8");
        fs::create_dir_all(root.join("views")).expect("create views dir");
        Self { _dir: dir, root }
    }

    /// Root of the tree.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory template sources are written to.
    pub fn views(&self) -> Utf8PathBuf {
        self.root.join("views")
    }

    /// Directory compiled artifacts are expected in.
    pub fn cache(&self) -> Utf8PathBuf {
        self.root.join(".quill")
    }

    /// Write `source` to `views/<name>`, creating parent directories.
    pub fn write(&self, name: &str, source: &str) -> Utf8PathBuf {
        let path = self.views().join(name.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create template parent dir");
        }
        fs::write(&path, source).expect("write template");
        path
    }

    /// Set the modification time of `views/<name>` to `secs` seconds after
    /// the Unix epoch.
    pub fn set_mtime(&self, name: &str, secs: u64) {
        let path = self.views().join(name.trim_start_matches('/'));
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .expect("open template");
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .expect("set template mtime");
    }
}

impl Default for TemplateDir {
    fn default() -> Self {
        Self::new()
    }
}
