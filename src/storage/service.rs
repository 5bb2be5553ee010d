//! Request-level file operations on top of [`FileStore`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use super::archive::ArchiveItem;
use super::path_security::PathInput;
use super::store::{EntryStat, FileEntry, FileStore};
use super::upload::{UploadCoordinator, UploadHints, UploadedFile};
use crate::{DockError, Result};

/// Outcome of deleting one path in a batch.
#[derive(Debug)]
pub struct DeleteOutcome {
    /// The path as the client sent it.
    pub path: String,
    /// `None` on success.
    pub error: Option<DockError>,
}

impl DeleteOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A validated, existing download source.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub full_path: PathBuf,
    /// Slash-joined path relative to the storage root.
    pub relative_path: String,
    /// Base name, used for the attachment filename.
    pub name: String,
    pub stat: EntryStat,
}

impl DownloadTarget {
    pub fn is_dir(&self) -> bool {
        self.stat.is_dir
    }
}

/// Upload, listing, delete and download orchestration.
#[derive(Debug, Clone)]
pub struct FileService {
    store: Arc<FileStore>,
}

impl FileService {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Full tree under the storage root. Never fails; read errors yield an empty list.
    pub async fn list(&self) -> Vec<FileEntry> {
        match self.store.build_tree(self.store.root()).await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list storage root");
                Vec::new()
            }
        }
    }

    /// Move staged uploads into place, removing leftovers if anything fails.
    pub async fn upload(&self, files: &[UploadedFile], hints: &UploadHints) -> Result<usize> {
        let coordinator = UploadCoordinator::new(&self.store);
        match coordinator.process(files, hints).await {
            Ok(count) => {
                tracing::info!(count, "Upload completed");
                Ok(count)
            }
            Err(e) => {
                log_failure("Upload failed", &e);
                coordinator.cleanup(files).await;
                Err(e)
            }
        }
    }

    /// Delete one file or directory tree.
    pub async fn delete(&self, input: PathInput) -> Result<()> {
        let relative = input.normalize()?;
        self.delete_path(&relative).await
    }

    async fn delete_path(&self, relative: &str) -> Result<()> {
        let full_path = self.store.security().resolve_entry(relative)?;
        if !self.store.exists(&full_path).await {
            return Err(DockError::NotFound(format!("File or directory {relative}")));
        }
        self.store.remove(&full_path).await?;
        tracing::info!(path = %relative, "Deleted");
        Ok(())
    }

    /// Delete every path independently, reporting one outcome per input in order.
    pub async fn batch_delete(&self, paths: &[String]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            let error = match self.delete_path(path).await {
                Ok(()) => None,
                Err(e) => {
                    log_failure("Batch delete item failed", &e);
                    Some(e)
                }
            };
            outcomes.push(DeleteOutcome {
                path: path.clone(),
                error,
            });
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(total = outcomes.len(), failed, "Batch delete finished");
        outcomes
    }

    /// Validate a single download request.
    pub async fn resolve_download(&self, input: PathInput) -> Result<DownloadTarget> {
        let relative = input.normalize()?;
        self.resolve_existing(&relative).await
    }

    async fn resolve_existing(&self, relative: &str) -> Result<DownloadTarget> {
        let security = self.store.security();
        let full_path = security.resolve_entry(relative)?;
        let stat = self
            .store
            .stat(&full_path)
            .await
            .map_err(|e| match e {
                DockError::NotFound(_) => {
                    DockError::NotFound(format!("File or directory {relative}"))
                }
                other => other,
            })?;

        let relative_path = security.relative_of(&full_path).unwrap_or_default();
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative_path.clone());

        Ok(DownloadTarget {
            full_path,
            relative_path,
            name,
            stat,
        })
    }

    /// Resolve every batch download path. The first invalid or missing path fails the batch.
    ///
    /// Repeated paths and paths inside another selected directory are dropped,
    /// since the archive already carries them.
    pub async fn resolve_batch(&self, paths: &[String]) -> Result<Vec<ArchiveItem>> {
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let target = self.resolve_existing(path).await?;
            items.push(ArchiveItem {
                full_path: target.full_path,
                relative_path: target.relative_path,
                is_dir: target.stat.is_dir,
            });
        }
        Ok(prune_overlaps(items))
    }
}

fn prune_overlaps(items: Vec<ArchiveItem>) -> Vec<ArchiveItem> {
    let dirs: Vec<PathBuf> = items
        .iter()
        .filter(|item| item.is_dir)
        .map(|item| item.full_path.clone())
        .collect();
    let mut seen = HashSet::new();

    items
        .into_iter()
        .filter(|item| {
            let nested = dirs
                .iter()
                .any(|dir| *dir != item.full_path && item.full_path.starts_with(dir));
            let keep = !nested && seen.insert(item.full_path.clone());
            if !keep {
                tracing::debug!(
                    path = %item.relative_path,
                    "Already covered by the batch, skipping"
                );
            }
            keep
        })
        .collect()
}

fn log_failure(message: &str, e: &DockError) {
    if e.is_client_error() {
        tracing::warn!(error = %e, "{message}");
    } else {
        tracing::error!(error = ?e, "{message}");
    }
}
