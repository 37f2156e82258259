//! Source to artifact, with the on-disk cache.

use std::hash::Hasher;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use quill_il::Reader;
use rapidhash::fast::RapidHasher;
use tempfile::NamedTempFile;

use crate::{Env, Error};

/// Result of [`Engine::compile`](crate::Engine::compile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    /// Canonical template name.
    pub name: String,
    /// Where the artifact lives.
    pub path: Utf8PathBuf,
    /// Whether the artifact was rebuilt rather than reused.
    pub recompiled: bool,
}

/// Artifact file name for a canonical template name.
pub fn artifact_name(name: &str) -> String {
    let mut hasher = RapidHasher::default();
    hasher.write(name.as_bytes());
    format!("{:016x}.qil", hasher.finish())
}

/// Find the source file for `name` and its modification time in
/// milliseconds.
async fn resolve(env: &Env, name: &str) -> Result<(Utf8PathBuf, i64), Error> {
    let root = env.source_root();
    let relative = name.trim_start_matches('/');
    let mut candidates: Vec<Utf8PathBuf> = env
        .extensions()
        .iter()
        .map(|ext| root.join(format!("{relative}{ext}")))
        .collect();
    let has_extension = relative
        .rsplit('/')
        .next()
        .is_some_and(|file| file.contains('.'));
    if has_extension {
        candidates.push(root.join(relative));
    }

    for path in candidates {
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().map_err(|e| Error::io(&path, e))?;
        let mtime = DateTime::<Utc>::from(modified).timestamp_millis();
        return Ok((path, mtime));
    }
    Err(Error::Resolution {
        name: name.to_owned(),
        searched: root,
    })
}

/// The mtime stored in an existing artifact, with its bytes.
async fn cached(path: &Utf8Path) -> Option<(i64, Vec<u8>)> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match Reader::new(&bytes).read_header() {
        Ok(header) => Some((header.mtime, bytes)),
        Err(err) => {
            tracing::debug!(%path, %err, "discarding unreadable artifact");
            None
        }
    }
}

/// Write `bytes` to `path` so that readers see either the old file or the
/// complete new one.
async fn persist(path: &Utf8Path, bytes: Vec<u8>) -> Result<(), Error> {
    let dir = path
        .parent()
        .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::io(&dir, e))?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::io(&dir, e))?;
        tmp.write_all(&bytes).map_err(|e| Error::io(&target, e))?;
        tmp.persist(&target).map_err(|e| Error::io(&target, e.error))?;
        Ok::<_, Error>(())
    })
    .await
    .map_err(|e| Error::io(path, std::io::Error::other(e)))?
}

/// Compile `name` unless a current artifact exists. Returns the artifact
/// bytes alongside, so callers need not read it back.
pub(crate) async fn compile(env: &Env, name: &str) -> Result<(Compiled, Vec<u8>), Error> {
    let name = env.normalize(name);
    let (source, mtime) = resolve(env, &name).await?;
    let path = env.target_root().join(artifact_name(&name));

    if !env.debug() {
        if let Some((stored, bytes)) = cached(&path).await {
            if stored == mtime {
                tracing::debug!(%name, %path, "artifact is current");
                let compiled = Compiled {
                    name,
                    path,
                    recompiled: false,
                };
                return Ok((compiled, bytes));
            }
        }
    }

    tracing::debug!(%name, %source, "compiling template");
    let raw = tokio::fs::read(&source)
        .await
        .map_err(|e| Error::io(&source, e))?;
    let text = String::from_utf8(raw).map_err(|e| {
        Error::io(
            &source,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let code = quill_syntax::compile(text, &name, mtime).map_err(|err| Error::Syntax {
        template: name.clone(),
        source: err,
    })?;
    let bytes = quill_il::encode(&code)?;
    persist(&path, bytes.clone()).await?;
    tracing::debug!(%name, %path, bytes = bytes.len(), "wrote artifact");

    let compiled = Compiled {
        name,
        path,
        recompiled: true,
    };
    Ok((compiled, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_stable_hex() {
        let a = artifact_name("/pages/index");
        assert_eq!(a.len(), 16 + 4);
        assert!(a.ends_with(".qil"));
        assert!(a[..16].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, artifact_name("/pages/index"));
        assert_ne!(a, artifact_name("/pages/other"));
    }
}
