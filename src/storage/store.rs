//! Filesystem access scoped to the storage root.
//!
//! ```text
//! {root}/
//! ├── .tmp/              staging area for in-flight uploads (never listed)
//! ├── docs/
//! │   └── guide.pdf
//! └── notes.txt
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use super::path_security::PathSecurity;
use crate::{DockError, Result};

/// One node of a directory listing.
///
/// Built fresh on every listing and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Base name.
    pub name: String,
    /// Slash-joined path relative to the storage root.
    pub path: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
    /// Child entries, present only for directories.
    pub children: Option<Vec<FileEntry>>,
}

/// Result of [`FileStore::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

impl From<&fs::Metadata> for EntryStat {
    fn from(meta: &fs::Metadata) -> Self {
        Self {
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// Directories first, then newest first.
fn compare_entries(a: &FileEntry, b: &FileEntry) -> std::cmp::Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| b.modified.cmp(&a.modified))
}

fn not_found(path: &Path, e: io::Error) -> DockError {
    if matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    ) {
        DockError::NotFound(format!("File or directory {}", path.display()))
    } else {
        DockError::FileSystem(e)
    }
}

/// Owner of the storage root and its staging area.
#[derive(Debug, Clone)]
pub struct FileStore {
    security: PathSecurity,
    temp_name: String,
}

impl FileStore {
    /// Create the root and staging directories and check the root is writable.
    ///
    /// Idempotent. Any failure here means the service cannot start.
    pub fn initialize(root: impl AsRef<Path>, temp_name: &str) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        fs::create_dir_all(root.join(temp_name))?;

        let security = PathSecurity::new(root, temp_name)?;

        let probe = security.temp_dir().join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"").map_err(|e| {
            DockError::Config(format!(
                "storage root {} is not writable: {e}",
                security.root().display()
            ))
        })?;
        fs::remove_file(&probe)?;

        tracing::info!(root = %security.root().display(), "File store initialized");

        Ok(Self {
            security,
            temp_name: temp_name.to_string(),
        })
    }

    /// Canonical storage root.
    pub fn root(&self) -> &Path {
        self.security.root()
    }

    /// Absolute staging directory for uploads.
    pub fn temp_dir(&self) -> &Path {
        self.security.temp_dir()
    }

    /// Path checker bound to this store's root.
    pub fn security(&self) -> &PathSecurity {
        &self.security
    }

    /// Fresh, unused path in the staging area for an incoming upload.
    pub fn new_temp_path(&self) -> PathBuf {
        self.temp_dir().join(format!("{}.upload", Uuid::new_v4()))
    }

    /// Recursively list `dir`.
    ///
    /// Best effort: entries that vanish or cannot be stat'ed mid-walk are
    /// logged and skipped. Symlinks are never followed. Only a failure to read
    /// `dir` itself is returned as an error.
    pub async fn build_tree(&self, dir: &Path) -> Result<Vec<FileEntry>> {
        self.walk(dir.to_path_buf(), String::new()).await
    }

    fn walk(&self, dir: PathBuf, base: String) -> BoxFuture<'_, Result<Vec<FileEntry>>> {
        Box::pin(async move {
            let mut reader = tokio::fs::read_dir(&dir).await?;
            let mut items = Vec::new();

            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "Directory read interrupted");
                        break;
                    }
                };

                let name = entry.file_name().to_string_lossy().into_owned();
                if name == "." || name == ".." || (base.is_empty() && name == self.temp_name) {
                    continue;
                }

                let path = entry.path();
                let relative = if base.is_empty() {
                    name.clone()
                } else {
                    format!("{base}/{name}")
                };

                let meta = match tokio::fs::symlink_metadata(&path).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        tracing::warn!(path = %relative, error = %e, "Skipping entry, stat failed");
                        continue;
                    }
                };

                if meta.file_type().is_symlink() {
                    tracing::debug!(path = %relative, "Skipping symlink");
                    continue;
                }

                let stat = EntryStat::from(&meta);
                let children = if stat.is_dir {
                    match self.walk(path, relative.clone()).await {
                        Ok(children) => Some(children),
                        Err(e) => {
                            tracing::warn!(path = %relative, error = %e, "Skipping directory, listing failed");
                            continue;
                        }
                    }
                } else {
                    None
                };

                items.push(FileEntry {
                    name,
                    path: relative,
                    is_dir: stat.is_dir,
                    size: stat.size,
                    modified: stat.modified,
                    children,
                });
            }

            items.sort_by(compare_entries);
            Ok(items)
        })
    }

    /// Ensure `destination`'s parent exists, then rename `source` onto it.
    ///
    /// The rename is the only atomic step. There is no copy fallback, so a
    /// cross-device rename surfaces as [`DockError::FileSystem`].
    pub async fn move_into_place(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            self.ensure_dir(parent).await?;
        }
        tokio::fs::rename(source, destination).await?;
        Ok(())
    }

    /// Create a directory and its parents if missing.
    pub async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    /// Remove a file or a whole directory tree.
    ///
    /// Removing a missing path is an error, not a no-op.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| not_found(path, e))?;

        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// Whether anything exists at `path`. A symlink counts even when dangling.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }

    /// Type, size and modification time of `path`.
    pub async fn stat(&self, path: &Path) -> Result<EntryStat> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| not_found(path, e))?;
        Ok(EntryStat::from(&meta))
    }
}
