//! Transforms: which files get loaded, and with which lens.
//!
//! A transform binds a lens to include and exclude globs. Globs are written
//! as absolute paths inside the session root (`/etc/hosts`,
//! `/etc/sysctl.d/*.conf`). An exclude without a `/` is matched against the
//! file name only.

pub mod loader;
pub mod saver;

pub use loader::{LoadOutcome, Loader};
pub use saver::{atomic_write, PendingChange, SaveAction, SaveMode, SaveReport, SavedFile, Saver};

use crate::lens::Skeleton;
use crate::tree::NodeId;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::fmt;

/// Excludes applied to every transform, so that backups and shadow
/// copies written by `save` are never loaded.
pub const DEFAULT_EXCLUDES: &[&str] = &["*.orig", "*.new", "*~"];

pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    pub name: String,
    /// Lens as given by the caller: `Module.lens` or `@Module`.
    pub lens: String,
    pub incl: Vec<String>,
    pub excl: Vec<String>,
}

impl Transform {
    /// Build a transform; without an explicit `name` the module part of
    /// the lens name is used.
    pub fn new(lens: &str, name: Option<&str>, incl: Vec<String>, excl: Vec<String>) -> Self {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => Self::default_name(lens),
        };
        Self {
            name,
            lens: lens.to_string(),
            incl,
            excl,
        }
    }

    /// `@Hosts` and `Hosts.lns` are both named `Hosts`.
    pub fn default_name(lens: &str) -> String {
        let lens = lens.strip_prefix('@').unwrap_or(lens);
        match lens.split_once('.') {
            Some((module, _)) => module.to_string(),
            None => lens.to_string(),
        }
    }

    /// Does this transform apply to `path` (absolute inside the root)?
    pub fn matches(&self, path: &str) -> bool {
        let included = self
            .incl
            .iter()
            .any(|glob| glob_matches(glob, path, false));
        included
            && !self
                .excl
                .iter()
                .map(String::as_str)
                .chain(DEFAULT_EXCLUDES.iter().copied())
                .any(|glob| glob_matches(glob, path, true))
    }

    /// Glob errors, one message per bad pattern.
    pub fn check_globs(&self) -> Vec<String> {
        self.incl
            .iter()
            .chain(self.excl.iter())
            .filter_map(|glob| Pattern::new(glob).err().map(|err| format!("{glob}: {err}")))
            .collect()
    }
}

fn glob_matches(glob: &str, path: &str, basename_fallback: bool) -> bool {
    let Ok(pattern) = Pattern::new(glob) else {
        return false;
    };
    if basename_fallback && !glob.contains('/') {
        let name = path.rsplit('/').next().unwrap_or(path);
        return pattern.matches_with(name, MATCH_OPTIONS);
    }
    pattern.matches_with(path, MATCH_OPTIONS)
}

/// Transforms of a session, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TransformTable {
    transforms: BTreeMap<String, Transform>,
}

impl TransformTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `transform`. A transform of the same name and lens gains the
    /// new globs; one with a different lens is replaced.
    pub fn add(&mut self, transform: Transform) {
        match self.transforms.get_mut(&transform.name) {
            Some(existing) if existing.lens == transform.lens => {
                for glob in transform.incl {
                    if !existing.incl.contains(&glob) {
                        existing.incl.push(glob);
                    }
                }
                for glob in transform.excl {
                    if !existing.excl.contains(&glob) {
                        existing.excl.push(glob);
                    }
                }
            }
            _ => {
                self.transforms.insert(transform.name.clone(), transform);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Transform> {
        self.transforms.remove(name)
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
    }

    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.transforms.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.values()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Transforms that apply to `path`.
    pub fn matching(&self, path: &str) -> Vec<&Transform> {
        self.transforms.values().filter(|t| t.matches(path)).collect()
    }
}

/// A file that was parsed into the tree.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path inside the root, e.g. `/etc/hosts`.
    pub path: String,
    /// Qualified lens name.
    pub lens: String,
    pub transform: String,
    /// The `/files/...` node holding the parsed content.
    pub node: NodeId,
    pub skeleton: Skeleton,
    /// xxh3 of the text on disk as last read or written.
    pub hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    ReadFailed,
    ParseFailed,
    PutFailed,
    WriteFailed,
    NoLens,
    MultipleTransforms,
    OutsideRoot,
}

impl FileErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileErrorKind::ReadFailed => "read_failed",
            FileErrorKind::ParseFailed => "parse_failed",
            FileErrorKind::PutFailed => "put_failed",
            FileErrorKind::WriteFailed => "write_failed",
            FileErrorKind::NoLens => "no_lens",
            FileErrorKind::MultipleTransforms => "multiple_transforms",
            FileErrorKind::OutsideRoot => "outside_root",
        }
    }
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line and column of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPosition {
    pub pos: usize,
    pub line: usize,
    pub col: usize,
}

/// Why a file could not be loaded or saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: String,
    pub kind: FileErrorKind,
    pub message: String,
    pub lens: Option<String>,
    pub position: Option<ErrorPosition>,
}

impl FileError {
    pub fn new(path: &str, kind: FileErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            kind,
            message: message.into(),
            lens: None,
            position: None,
        }
    }

    pub fn with_lens(mut self, lens: &str) -> Self {
        self.lens = Some(lens.to_string());
        self
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path, self.kind, self.message)?;
        if let Some(pos) = &self.position {
            write!(f, " at line {}, column {}", pos.line, pos.col)?;
        }
        Ok(())
    }
}

/// Path of a file below `/files`: `/etc/hosts` -> `["etc", "hosts"]`.
pub fn path_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_name_is_module() {
        assert_eq!(Transform::default_name("@Hosts"), "Hosts");
        assert_eq!(Transform::default_name("Hosts.lns"), "Hosts");
        assert_eq!(Transform::new("Hosts.lns", Some("mine"), vec![], vec![]).name, "mine");
    }

    #[test]
    fn include_and_exclude() {
        let t = Transform::new(
            "Simplevars.lns",
            None,
            strings(&["/etc/conf.d/*"]),
            strings(&["/etc/conf.d/skip", "*.bak"]),
        );
        assert!(t.matches("/etc/conf.d/a"));
        assert!(!t.matches("/etc/conf.d/skip"));
        assert!(!t.matches("/etc/conf.d/x.bak"));
        assert!(!t.matches("/etc/conf.d/sub/a"));
        assert!(!t.matches("/etc/conf.d/a.orig"));
        assert!(!t.matches("/etc/conf.d/a~"));
    }

    #[test]
    fn table_merges_same_lens() {
        let mut table = TransformTable::new();
        table.add(Transform::new("@Hosts", None, strings(&["/etc/hosts"]), vec![]));
        table.add(Transform::new("@Hosts", None, strings(&["/etc/hosts2"]), vec![]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Hosts").unwrap().incl.len(), 2);

        table.add(Transform::new("Simplelines.lns", Some("Hosts"), strings(&["/x"]), vec![]));
        assert_eq!(table.get("Hosts").unwrap().lens, "Simplelines.lns");
        assert_eq!(table.matching("/x").len(), 1);
    }

    #[test]
    fn bad_globs_are_reported() {
        let t = Transform::new("@Hosts", None, strings(&["/etc/[hosts"]), vec![]);
        assert_eq!(t.check_globs().len(), 1);
    }
}
