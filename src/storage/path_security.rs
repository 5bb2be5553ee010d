//! Path validation and containment.
//!
//! Every client-supplied path fragment passes through this module before it
//! touches the filesystem. Textual sanitization ([`sanitize_file_path`]) is a
//! first pass only; [`PathSecurity::contain`] is the authoritative gate and
//! runs immediately before every move, remove or read.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::{DockError, Result};

/// Strip traversal sequences and NUL bytes, then collapse separators.
///
/// Removes every literal `..` and `\0`, splits on runs of `/` or `\`, drops
/// empty segments and rejoins with `/`. The result may still be unsafe once
/// resolved, so it must always be followed by a containment check.
pub fn sanitize_file_path(raw: &str) -> String {
    let stripped = raw.replace("..", "").replace('\0', "");
    stripped
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject empty segments and segments containing `..` or a NUL byte.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(DockError::InvalidPath("empty path".to_string()));
    }
    if segment.contains("..") || segment.contains('\0') {
        return Err(DockError::InvalidPath(format!(
            "path segment {segment:?} is not allowed"
        )));
    }
    Ok(())
}

/// Last component of a client filename, splitting on both `/` and `\`.
pub fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// A client path parameter as it arrives from the transport layer.
///
/// Some routers hand over a wildcard path already split into segments. Each
/// segment is validated on its own so a bare `..` segment cannot slip through
/// a check on the joined string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathInput {
    /// A single slash-separated string.
    Single(String),
    /// Pre-split path segments.
    Segments(Vec<String>),
}

impl PathInput {
    /// Collapse the input into one sanitized relative path.
    pub fn normalize(self) -> Result<String> {
        let joined = match self {
            PathInput::Single(path) => path,
            PathInput::Segments(segments) => {
                for segment in &segments {
                    if segment.contains("..") || segment.contains('\0') {
                        return Err(DockError::InvalidPath(format!(
                            "path segment {segment:?} is not allowed"
                        )));
                    }
                }
                segments.join("/")
            }
        };
        Ok(sanitize_file_path(&joined))
    }
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Containment checks scoped to one storage root.
///
/// The root is canonicalized once at construction, so every joined path is
/// compared against its real location.
#[derive(Debug, Clone)]
pub struct PathSecurity {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl PathSecurity {
    /// Create a checker for `root`, treating `temp_dir` as off-limits for entries.
    ///
    /// `root` must already exist.
    pub fn new(root: &Path, temp_dir_name: &str) -> io::Result<Self> {
        let root = fs::canonicalize(root)?;
        let temp_dir = root.join(temp_dir_name);
        Ok(Self { root, temp_dir })
    }

    /// Canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the staging area.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Fail unless `candidate` is the root or lies beneath it.
    ///
    /// The candidate is normalized lexically first, then the deepest existing
    /// ancestor is canonicalized so that a symlink inside the root cannot lead
    /// outside of it. Returns the normalized path.
    pub fn contain(&self, candidate: &Path) -> Result<PathBuf> {
        let normalized = normalize_lexically(candidate);
        if !self.is_within_root(&normalized) {
            return Err(DockError::InvalidPath(
                "path escapes the storage root".to_string(),
            ));
        }

        let mut probe = normalized.as_path();
        loop {
            match fs::canonicalize(probe) {
                Ok(real) => {
                    if !self.is_within_root(&real) {
                        return Err(DockError::InvalidPath(
                            "path resolves outside the storage root".to_string(),
                        ));
                    }
                    break;
                }
                Err(_) => match probe.parent() {
                    Some(parent) if parent.starts_with(&self.root) => probe = parent,
                    _ => break,
                },
            }
        }

        Ok(normalized)
    }

    /// Resolve a client-relative path against the root and check containment.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if relative.contains('\0') {
            return Err(DockError::InvalidPath("path contains a NUL byte".to_string()));
        }
        self.contain(&self.root.join(relative))
    }

    /// Resolve a path that must name an entry strictly inside the root and
    /// outside the staging area.
    pub fn resolve_entry(&self, relative: &str) -> Result<PathBuf> {
        let resolved = self.resolve(relative)?;
        self.check_entry(&resolved)?;
        Ok(resolved)
    }

    /// Fail if an already-contained path is the root itself or inside the staging area.
    pub fn check_entry(&self, resolved: &Path) -> Result<()> {
        if resolved == self.root {
            return Err(DockError::InvalidPath(
                "the storage root itself cannot be targeted".to_string(),
            ));
        }
        if resolved.starts_with(&self.temp_dir) {
            return Err(DockError::InvalidPath(
                "the upload staging area cannot be targeted".to_string(),
            ));
        }
        Ok(())
    }

    /// Slash-joined path of `path` relative to the root.
    pub fn relative_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn is_within_root(&self, path: &Path) -> bool {
        // Component-wise, so `/data/uploads-evil` does not match `/data/uploads`.
        path == self.root || path.starts_with(&self.root)
    }
}
