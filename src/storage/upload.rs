//! Moving uploaded temp files to their final destinations.
//!
//! Each uploaded file is addressed in one of three ways, tried in order:
//! an explicit `relativePath` (full path including the filename), a
//! `targetDir` plus the file's own base name, or the base name alone at the
//! storage root.

use std::path::{Path, PathBuf};

use super::path_security::{base_name, sanitize_file_path, validate_segment};
use super::store::FileStore;
use crate::{DockError, Result};

/// A file already written to the staging area by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Filename as sent by the client, possibly mis-encoded.
    pub original_name: String,
    /// Location of the staged bytes inside the staging area.
    pub temp_path: PathBuf,
}

/// A request-level addressing hint: one value for the whole batch, or one
/// value per uploaded file aligned by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathHint {
    Single(String),
    Many(Vec<String>),
}

impl PathHint {
    /// Build a hint from every value submitted under one form field name.
    ///
    /// `array_form` is set when the client used the `name[]` spelling; such
    /// values stay aligned by index even when only one was sent.
    pub fn from_values(mut values: Vec<String>, array_form: bool) -> Option<Self> {
        match values.len() {
            0 => None,
            1 if !array_form => values.pop().map(PathHint::Single),
            _ => Some(PathHint::Many(values)),
        }
    }

    /// Hint for the file at `index`. Empty strings count as absent.
    pub fn for_index(&self, index: usize) -> Option<&str> {
        let value = match self {
            PathHint::Single(value) => Some(value.as_str()),
            PathHint::Many(values) => values.get(index).map(String::as_str),
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Addressing hints that came with an upload request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadHints {
    pub relative_path: Option<PathHint>,
    pub target_dir: Option<PathHint>,
}

/// Repair a filename that a multipart client sent mis-encoded.
///
/// Percent-escapes are decoded first. If every remaining character fits in
/// one byte, those bytes are then re-read as UTF-8, which undoes the common
/// "UTF-8 bytes decoded as Latin-1" corruption. This is a heuristic: a name
/// that is genuinely Latin-1 and happens to form valid UTF-8 is changed.
pub fn decode_filename(raw: &str) -> String {
    let decoded = if raw.contains('%') {
        urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    };

    reinterpret_latin1(&decoded).unwrap_or(decoded)
}

fn reinterpret_latin1(s: &str) -> Option<String> {
    if s.is_ascii() || s.chars().any(|c| u32::from(c) > 0xFF) {
        return None;
    }
    let bytes: Vec<u8> = s.chars().map(|c| u32::from(c) as u8).collect();
    String::from_utf8(bytes).ok()
}

/// Resolves destinations for staged uploads and moves them into place.
pub struct UploadCoordinator<'a> {
    store: &'a FileStore,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(store: &'a FileStore) -> Self {
        Self { store }
    }

    /// Validated absolute destination for one upload.
    pub fn resolve_target(
        &self,
        original_name: &str,
        relative_path: Option<&str>,
        target_dir: Option<&str>,
    ) -> Result<PathBuf> {
        let security = self.store.security();

        let target = if let Some(rel) = relative_path {
            let rel = sanitize_file_path(rel);
            validate_segment(&rel)?;
            tracing::debug!(relative_path = %rel, "Using explicit relative path");
            security.root().join(rel)
        } else if let Some(dir) = target_dir {
            let dir = sanitize_file_path(dir);
            let name = base_name(original_name);
            validate_segment(&dir)?;
            validate_segment(name)?;
            tracing::debug!(target_dir = %dir, file = %name, "Using target directory");
            security.root().join(dir).join(name)
        } else {
            let name = base_name(original_name);
            validate_segment(name)?;
            tracing::debug!(file = %name, "Root upload");
            security.root().join(name)
        };

        let target = security.contain(&target)?;
        security.check_entry(&target)?;
        Ok(target)
    }

    /// Move every staged file to its destination, in submission order.
    ///
    /// Stops at the first failure without undoing earlier moves. Files left in
    /// the staging area must then be removed with [`Self::cleanup`].
    pub async fn process(&self, files: &[UploadedFile], hints: &UploadHints) -> Result<usize> {
        tracing::info!(count = files.len(), "Processing uploaded files");

        for (index, file) in files.iter().enumerate() {
            let name = decode_filename(&file.original_name);
            let relative_path = hints.relative_path.as_ref().and_then(|h| h.for_index(index));
            let target_dir = hints.target_dir.as_ref().and_then(|h| h.for_index(index));

            let target = self.resolve_target(&name, relative_path, target_dir)?;
            self.check_staged(&file.temp_path)?;

            self.store.move_into_place(&file.temp_path, &target).await?;
            tracing::info!(
                index,
                path = %self.store.security().relative_of(&target).unwrap_or_default(),
                "File moved into place"
            );
        }

        Ok(files.len())
    }

    /// Remove whichever staged files are still on disk.
    ///
    /// Failures are logged and skipped so they never mask the upload error
    /// that triggered the cleanup.
    pub async fn cleanup(&self, files: &[UploadedFile]) {
        for file in files {
            if self.check_staged(&file.temp_path).is_err() {
                continue;
            }
            if !self.store.exists(&file.temp_path).await {
                continue;
            }
            match self.store.remove(&file.temp_path).await {
                Ok(()) => {
                    tracing::info!(temp = %file.temp_path.display(), "Cleaned up temp file")
                }
                Err(e) => {
                    tracing::error!(temp = %file.temp_path.display(), error = %e, "Failed to clean up temp file")
                }
            }
        }
    }

    fn check_staged(&self, temp_path: &Path) -> Result<()> {
        if temp_path.parent() == Some(self.store.temp_dir()) {
            Ok(())
        } else {
            Err(DockError::Internal(format!(
                "staged file {} is outside the staging area",
                temp_path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::initialize(temp_dir.path(), ".tmp").unwrap();
        (temp_dir, store)
    }

    fn stage(store: &FileStore, name: &str, content: &[u8]) -> UploadedFile {
        let temp_path = store.new_temp_path();
        fs::write(&temp_path, content).unwrap();
        UploadedFile {
            original_name: name.to_string(),
            temp_path,
        }
    }

    #[test]
    fn test_decode_filename_plain() {
        assert_eq!(decode_filename("report.pdf"), "report.pdf");
        assert_eq!(decode_filename("日本語.txt"), "日本語.txt");
        assert_eq!(decode_filename("100%.txt"), "100%.txt");
    }

    #[test]
    fn test_decode_filename_latin1_mojibake() {
        let mojibake: String = "中文.txt".bytes().map(char::from).collect();
        assert_ne!(mojibake, "中文.txt");
        assert_eq!(decode_filename(&mojibake), "中文.txt");
    }

    #[test]
    fn test_decode_filename_genuine_latin1_is_kept() {
        // A lone 0xE9 is not valid UTF-8, so the name is left alone.
        assert_eq!(decode_filename("café.txt"), "café.txt");
    }

    #[test]
    fn test_decode_filename_percent_encoded() {
        assert_eq!(decode_filename("%E4%B8%AD%E6%96%87.txt"), "中文.txt");
        assert_eq!(decode_filename("a%20b.txt"), "a b.txt");
    }

    #[test]
    fn test_path_hint_from_values() {
        assert_eq!(PathHint::from_values(vec![], false), None);
        assert_eq!(PathHint::from_values(vec![], true), None);
        assert_eq!(
            PathHint::from_values(vec!["a".into()], false),
            Some(PathHint::Single("a".into()))
        );
        assert_eq!(
            PathHint::from_values(vec!["a".into()], true),
            Some(PathHint::Many(vec!["a".into()]))
        );
        assert_eq!(
            PathHint::from_values(vec!["a".into(), "b".into()], false),
            Some(PathHint::Many(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_path_hint_for_index() {
        let single = PathHint::Single("docs".into());
        assert_eq!(single.for_index(0), Some("docs"));
        assert_eq!(single.for_index(7), Some("docs"));

        let many = PathHint::Many(vec!["a/x.txt".into(), String::new()]);
        assert_eq!(many.for_index(0), Some("a/x.txt"));
        assert_eq!(many.for_index(1), None);
        assert_eq!(many.for_index(2), None);
    }

    #[test]
    fn test_resolve_target_modes() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let root = store.root().to_path_buf();

        assert_eq!(
            coordinator
                .resolve_target("ignored.txt", Some("a/b/c.txt"), Some("zzz"))
                .unwrap(),
            root.join("a/b/c.txt")
        );
        assert_eq!(
            coordinator
                .resolve_target("sub/photo.jpg", None, Some("pics"))
                .unwrap(),
            root.join("pics/photo.jpg")
        );
        assert_eq!(
            coordinator
                .resolve_target("C:\\fakepath\\photo.jpg", None, None)
                .unwrap(),
            root.join("photo.jpg")
        );
    }

    #[test]
    fn test_resolve_target_traversal_stays_contained() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let root = store.root().to_path_buf();

        let cases: [(&str, Option<&str>, Option<&str>); 6] = [
            ("x.txt", Some("../../etc/passwd"), None),
            ("x.txt", Some("/etc/passwd"), None),
            ("x.txt", Some(".../.../x"), None),
            ("../../evil.sh", None, Some("../..")),
            ("../../evil.sh", None, None),
            ("x.txt", Some("a\0/../../b"), None),
        ];
        for (name, rel, dir) in cases {
            match coordinator.resolve_target(name, rel, dir) {
                Ok(path) => assert!(path.starts_with(&root), "{rel:?}/{dir:?} escaped: {path:?}"),
                Err(DockError::InvalidPath(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_resolve_target_rejects_empty_and_staging() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);

        assert!(matches!(
            coordinator.resolve_target("x.txt", Some("...."), None),
            Err(DockError::InvalidPath(_))
        ));
        assert!(matches!(
            coordinator.resolve_target("dir/", None, None),
            Err(DockError::InvalidPath(_))
        ));
        assert!(matches!(
            coordinator.resolve_target("x.txt", Some(".tmp/x.txt"), None),
            Err(DockError::InvalidPath(_))
        ));
        assert!(matches!(
            coordinator.resolve_target("x.txt", Some("."), None),
            Err(DockError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_process_moves_files() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let files = vec![
            stage(&store, "one.txt", b"1"),
            stage(&store, "two.txt", b"2"),
        ];
        let hints = UploadHints {
            relative_path: Some(PathHint::Many(vec![
                "folder/one.txt".into(),
                "folder/nested/two.txt".into(),
            ])),
            target_dir: None,
        };

        let moved = coordinator.process(&files, &hints).await.unwrap();

        assert_eq!(moved, 2);
        assert_eq!(fs::read(store.root().join("folder/one.txt")).unwrap(), b"1");
        assert_eq!(
            fs::read(store.root().join("folder/nested/two.txt")).unwrap(),
            b"2"
        );
        assert!(files.iter().all(|f| !f.temp_path.exists()));
    }

    #[tokio::test]
    async fn test_process_scalar_target_dir_applies_to_all() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let files = vec![stage(&store, "a.txt", b"a"), stage(&store, "b.txt", b"b")];
        let hints = UploadHints {
            relative_path: None,
            target_dir: Some(PathHint::Single("inbox".into())),
        };

        coordinator.process(&files, &hints).await.unwrap();

        assert!(store.root().join("inbox/a.txt").is_file());
        assert!(store.root().join("inbox/b.txt").is_file());
    }

    #[tokio::test]
    async fn test_process_stops_at_first_failure_and_cleanup() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let files = vec![
            stage(&store, "ok.txt", b"ok"),
            stage(&store, "bad.txt", b"bad"),
            stage(&store, "later.txt", b"later"),
        ];
        let hints = UploadHints {
            relative_path: Some(PathHint::Many(vec![
                "ok.txt".into(),
                "....".into(),
                "later.txt".into(),
            ])),
            target_dir: None,
        };

        let result = coordinator.process(&files, &hints).await;
        assert!(matches!(result, Err(DockError::InvalidPath(_))));

        // Earlier moves are kept, later files are untouched.
        assert!(store.root().join("ok.txt").is_file());
        assert!(!store.root().join("later.txt").exists());
        assert!(files[1].temp_path.exists());
        assert!(files[2].temp_path.exists());

        coordinator.cleanup(&files).await;

        assert!(!files[1].temp_path.exists());
        assert!(!files[2].temp_path.exists());
        assert!(store.root().join("ok.txt").is_file());
    }

    #[tokio::test]
    async fn test_cleanup_ignores_paths_outside_staging() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let keep = store.root().join("keep.txt");
        fs::write(&keep, b"keep").unwrap();

        coordinator
            .cleanup(&[UploadedFile {
                original_name: "keep.txt".into(),
                temp_path: keep.clone(),
            }])
            .await;

        assert!(keep.exists());
    }

    #[tokio::test]
    async fn test_process_decodes_mojibake_names() {
        let (_dir, store) = setup_store();
        let coordinator = UploadCoordinator::new(&store);
        let mojibake: String = "报告.txt".bytes().map(char::from).collect();
        let files = vec![stage(&store, &mojibake, b"r")];

        coordinator
            .process(&files, &UploadHints::default())
            .await
            .unwrap();

        assert!(store.root().join("报告.txt").is_file());
    }
}
