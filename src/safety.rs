use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Keeps every file a session reads or writes inside its root directory.
#[derive(Debug, Clone)]
pub struct RootGuard {
    /// Canonical root directory
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl RootGuard {
    /// Create a guard for `root`.
    ///
    /// The root is canonicalized so that symlinked roots compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    /// Check an existing file.
    ///
    /// Returns the canonical absolute path if it lies under the root.
    /// Relative paths are taken relative to the root.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let canonical = self.absolute(path.as_ref()).canonicalize()?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Check a file that may not exist yet.
    ///
    /// The nearest existing ancestor is canonicalized and checked; the
    /// missing components are appended to it unchanged.
    pub fn validate_new_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let absolute = normalize(&self.absolute(path.as_ref()));
        if absolute.exists() {
            return self.validate_path(&absolute);
        }

        let mut missing = Vec::new();
        let mut existing = absolute.as_path();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut resolved = existing.canonicalize()?;
        for name in missing.iter().rev() {
            resolved.push(name);
        }
        self.check_canonical(&resolved)?;
        Ok(resolved)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideRoot {
                path: canonical.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(())
    }

    /// Get the root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
