use crate::lens::{self, LensError, LensLibrary};
use crate::safety::{RootGuard, SafetyError};
use crate::transform::{
    path_components, ErrorPosition, FileEntry, FileError, FileErrorKind, Transform,
    TransformTable, MATCH_OPTIONS,
};
use crate::tree::{NodePath, Tree};
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Result of a load: the files now in the tree and the ones that failed.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub files: BTreeMap<String, FileEntry>,
    pub errors: Vec<FileError>,
}

/// Reads files selected by the transform table into `/files`.
pub struct Loader<'a> {
    guard: &'a RootGuard,
    table: &'a TransformTable,
    library: &'a LensLibrary,
    spans: bool,
}

impl<'a> Loader<'a> {
    pub fn new(guard: &'a RootGuard, table: &'a TransformTable, library: &'a LensLibrary) -> Self {
        Self {
            guard,
            table,
            library,
            spans: false,
        }
    }

    /// Record source spans on every parsed node.
    pub fn with_spans(mut self, spans: bool) -> Self {
        self.spans = spans;
        self
    }

    /// Replace the content of `/files` with freshly parsed files.
    ///
    /// A file that cannot be read or parsed is reported in the outcome and
    /// left out of the tree; the remaining files still load.
    pub fn load(&self, tree: &mut Tree) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();
        let Some(files_at) = tree.ensure_path(&NodePath::root(), &["files"]) else {
            return outcome;
        };
        if let Some(files) = tree.node_mut(&files_at) {
            files.children.clear();
            files.value = None;
        }

        for (path, transforms) in self.candidates() {
            let result = match transforms.as_slice() {
                [transform] => self.load_file(&path, transform, tree, &files_at),
                many => {
                    let names: Vec<&str> = many.iter().map(|t| t.name.as_str()).collect();
                    Err(FileError::new(
                        &path,
                        FileErrorKind::MultipleTransforms,
                        format!("file is matched by transforms {}", names.join(", ")),
                    ))
                }
            };
            match result {
                Ok(entry) => {
                    info!(file = %path, lens = %entry.lens, "loaded");
                    outcome.files.insert(path, entry);
                }
                Err(err) => {
                    warn!(file = %path, error = %err, "failed to load");
                    outcome.errors.push(err);
                }
            }
        }

        tree.clear_dirty(&files_at);
        outcome
    }

    /// Files under the root matched by some transform, with every
    /// transform that accepts them.
    pub fn candidates(&self) -> BTreeMap<String, Vec<&'a Transform>> {
        let root = self.guard.root();
        let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
        let base = escaped_root.trim_end_matches('/');
        let mut found: BTreeMap<String, Vec<&'a Transform>> = BTreeMap::new();

        for transform in self.table.iter() {
            for incl in &transform.incl {
                let pattern = format!("{base}/{}", incl.trim_start_matches('/'));
                let paths = match glob::glob_with(&pattern, MATCH_OPTIONS) {
                    Ok(paths) => paths,
                    Err(err) => {
                        warn!(transform = %transform.name, glob = %incl, error = %err, "bad include glob");
                        continue;
                    }
                };
                for file in paths.flatten() {
                    if !file.is_file() {
                        continue;
                    }
                    let Ok(rel) = file.strip_prefix(root) else {
                        continue;
                    };
                    let path = format!("/{}", rel.to_string_lossy());
                    if !transform.matches(&path) {
                        debug!(file = %path, transform = %transform.name, "excluded");
                        continue;
                    }
                    let accepted = found.entry(path).or_default();
                    if !accepted.iter().any(|t| t.name == transform.name) {
                        accepted.push(transform);
                    }
                }
            }
        }
        found
    }

    fn load_file(
        &self,
        path: &str,
        transform: &Transform,
        tree: &mut Tree,
        files_at: &NodePath,
    ) -> Result<FileEntry, FileError> {
        let no_lens = |err: LensError| FileError::new(path, FileErrorKind::NoLens, err.to_string());
        let lens_name = self.library.qualify(&transform.lens).map_err(no_lens)?;
        let lens = self.library.resolve(&lens_name).map_err(no_lens)?;

        let real = self
            .guard
            .validate_path(path.trim_start_matches('/'))
            .map_err(|err| safety_error(path, err).with_lens(&lens_name))?;
        let text = fs::read_to_string(&real).map_err(|err| {
            FileError::new(path, FileErrorKind::ReadFailed, err.to_string()).with_lens(&lens_name)
        })?;

        let filename = real.to_string_lossy();
        let parsed = lens::get(&lens, &text, &filename, self.spans)
            .map_err(|err| parse_error(path, err).with_lens(&lens_name))?;

        let at = tree
            .ensure_path(files_at, &path_components(path))
            .ok_or_else(|| FileError::new(path, FileErrorKind::ReadFailed, "cannot place file in tree"))?;
        let placement = || FileError::new(path, FileErrorKind::ReadFailed, "cannot place file in tree");
        let ids = tree.graft(&at, parsed.nodes).ok_or_else(placement)?;
        let mut skeleton = parsed.skeleton;
        skeleton.renumber(&ids);
        let node = tree.node_mut(&at).ok_or_else(placement)?;
        node.value = None;

        Ok(FileEntry {
            path: path.to_string(),
            lens: lens_name,
            transform: transform.name.clone(),
            node: node.id(),
            skeleton,
            hash: xxh3_64(text.as_bytes()),
        })
    }
}

pub(crate) fn safety_error(path: &str, err: SafetyError) -> FileError {
    match err {
        SafetyError::OutsideRoot { .. } => {
            FileError::new(path, FileErrorKind::OutsideRoot, err.to_string())
        }
        SafetyError::Canonicalize(io) => {
            FileError::new(path, FileErrorKind::ReadFailed, io.to_string())
        }
    }
}

fn parse_error(path: &str, err: LensError) -> FileError {
    match err {
        LensError::Parse {
            pos,
            line,
            col,
            message,
            ..
        } => {
            let mut error = FileError::new(path, FileErrorKind::ParseFailed, message);
            error.position = Some(ErrorPosition { pos, line, col });
            error
        }
        other => FileError::new(path, FileErrorKind::ParseFailed, other.to_string()),
    }
}
