use std::io;
use std::path::{Component, Path, PathBuf};

use super::ExecutionError;

const DEFAULT_READ_MAX_BYTES: u64 = 200 * 1024;

/// Canonical project root that every capability path must stay inside.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    read_max_bytes: u64,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ExecutionError> {
        let root = root.into();
        let canonical_root = root
            .canonicalize()
            .map_err(|source| ExecutionError::io("resolve workspace root", &root, source))?;

        if !canonical_root.is_dir() {
            return Err(ExecutionError::NotADirectory {
                path: canonical_root,
            });
        }

        Ok(Self {
            root: canonical_root,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
        })
    }

    #[must_use]
    pub fn with_read_limit(mut self, max_bytes: u64) -> Self {
        self.read_max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn read_max_bytes(&self) -> u64 {
        self.read_max_bytes
    }

    /// Resolves a path that must already exist.
    pub fn resolve_existing(&self, path: &str) -> Result<PathBuf, ExecutionError> {
        if path.trim().is_empty() {
            return Err(ExecutionError::EmptyPath);
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate.canonicalize().map_err(|source| {
            if source.kind() != io::ErrorKind::NotFound {
                return ExecutionError::io("resolve path", &candidate, source);
            }
            let normalized = normalize_lexically(&candidate);
            if normalized.starts_with(&self.root) {
                ExecutionError::Missing {
                    path: PathBuf::from(self.display(&normalized)),
                }
            } else {
                ExecutionError::PathEscape { path: normalized }
            }
        })?;

        self.ensure_inside(&canonical)?;
        Ok(canonical)
    }

    /// Resolves a path that may not exist yet. The lexically normalized path
    /// and its nearest existing ancestor must both lie inside the workspace.
    pub fn resolve_write(&self, path: &str) -> Result<PathBuf, ExecutionError> {
        if path.trim().is_empty() {
            return Err(ExecutionError::EmptyPath);
        }

        let candidate = normalize_lexically(&self.absolute_candidate(path));
        self.ensure_inside(&candidate)?;
        let parent = candidate.parent().ok_or_else(|| ExecutionError::PathEscape {
            path: candidate.clone(),
        })?;

        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside(&anchor)?;

        Ok(candidate)
    }

    /// Workspace-relative rendering used in tool payloads.
    #[must_use]
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    pub(crate) fn ensure_inside(&self, canonical_path: &Path) -> Result<(), ExecutionError> {
        if canonical_path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ExecutionError::PathEscape {
                path: canonical_path.to_path_buf(),
            })
        }
    }

    fn absolute_candidate(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Folds `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, ExecutionError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor
                .canonicalize()
                .map_err(|source| ExecutionError::io("resolve path", ancestor, source));
        }
    }

    Err(ExecutionError::Missing {
        path: path.to_path_buf(),
    })
}
