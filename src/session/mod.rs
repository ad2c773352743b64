//! The session handle: one tree, one transform table, one set of variable
//! bindings, and the error surface that reports on the last call.

pub mod flags;
pub mod meta;
pub mod status;

pub use flags::{SessionFlags, SessionOptions};
pub use status::Status;

use crate::error::{Error, ErrorInfo, Result};
use crate::lens::{LensError, LensLibrary};
use crate::safety::RootGuard;
use crate::store::Store;
use crate::transform::{
    FileEntry, FileError, FileErrorKind, Loader, SaveMode, SaveReport, Saver, Transform,
    TransformTable,
};
use crate::tree::{NodePath, Span};
use std::collections::BTreeMap;
use std::io;
use tracing::{debug, info, warn};

/// An open editing session over the files below one root directory.
///
/// Every operation runs to completion before it returns. A session is not
/// shared between threads; separate sessions are independent.
pub struct Session {
    inner: Option<Inner>,
    status: Status,
}

struct Inner {
    store: Store,
    guard: RootGuard,
    library: LensLibrary,
    transforms: TransformTable,
    files: BTreeMap<String, FileEntry>,
    file_errors: Vec<FileError>,
    flags: SessionFlags,
}

impl Session {
    /// Open a session: register lens modules, add their autoload
    /// transforms and, unless `no_load` is set, load the files.
    pub fn open(options: SessionOptions) -> Result<Self> {
        let SessionOptions {
            root,
            load_paths,
            flags,
        } = options;
        let guard = RootGuard::new(&root).map_err(|err| Error::Io {
            path: root.display().to_string(),
            source: io::Error::other(err.to_string()),
        })?;

        let mut library = if flags.no_stdinc {
            LensLibrary::new()
        } else {
            LensLibrary::with_builtins()?
        };
        for err in library.load_dirs(&load_paths) {
            warn!(error = %err, "lens module not loaded");
        }
        if flags.type_check {
            library.typecheck()?;
        }

        let mut transforms = TransformTable::new();
        if !flags.no_module_autoload {
            for (module, lens, autoload) in library.autoloads() {
                transforms.add(Transform::new(
                    &lens,
                    Some(module.as_str()),
                    autoload.incl,
                    autoload.excl,
                ));
            }
        }

        let mut store = Store::new();
        let tree = store.tree_mut();
        tree.ensure_path(&NodePath::root(), &["files"]);
        meta::publish_session(
            tree,
            &guard.root().to_string_lossy(),
            flags.save_mode(),
            flags.enable_span,
        );
        meta::publish_transforms(tree, &transforms);
        info!(
            root = %guard.root().display(),
            modules = library.modules().count(),
            transforms = transforms.len(),
            "session opened"
        );

        let mut inner = Inner {
            store,
            guard,
            library,
            transforms,
            files: BTreeMap::new(),
            file_errors: Vec::new(),
            flags,
        };
        if !flags.no_load {
            inner.load()?;
        }
        Ok(Self {
            inner: Some(inner),
            status: Status::default(),
        })
    }

    /// Release the session. Every later call fails with `SessionClosed`.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("session closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Status of the last operation.
    pub fn last_error(&self) -> &ErrorInfo {
        self.status.last()
    }

    pub fn raise_errors(&self) -> bool {
        self.status.raise_errors()
    }

    /// With `false`, failing calls return a default value and the failure
    /// is only visible through [`Session::last_error`].
    pub fn set_raise_errors(&mut self, raise: bool) {
        self.status.set_raise_errors(raise);
    }

    pub fn flags(&self) -> Result<SessionFlags> {
        self.inner
            .as_ref()
            .map(|inner| inner.flags)
            .ok_or(Error::SessionClosed)
    }

    fn run<T: Default>(&mut self, op: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let result = match self.inner.as_mut() {
            Some(inner) => op(inner),
            None => Err(Error::SessionClosed),
        };
        self.status.settle(result)
    }

    pub fn get(&mut self, path: &str) -> Result<Option<String>> {
        self.run(|inner| inner.store.get(path))
    }

    pub fn exists(&mut self, path: &str) -> Result<bool> {
        self.run(|inner| inner.store.exists(path))
    }

    pub fn set(&mut self, path: &str, value: Option<&str>) -> Result<()> {
        self.run(|inner| inner.store.set(path, value).map(|_| ()))
    }

    pub fn clear(&mut self, path: &str) -> Result<()> {
        self.run(|inner| inner.store.clear(path).map(|_| ()))
    }

    pub fn set_many(&mut self, base: &str, sub: Option<&str>, value: Option<&str>) -> Result<usize> {
        self.run(|inner| inner.store.set_many(base, sub, value))
    }

    pub fn insert(&mut self, path: &str, label: &str, before: bool) -> Result<()> {
        self.run(|inner| inner.store.insert(path, label, before).map(|_| ()))
    }

    pub fn mv(&mut self, src: &str, dest: &str) -> Result<()> {
        self.run(|inner| inner.store.mv(src, dest).map(|_| ()))
    }

    pub fn rm(&mut self, path: &str) -> Result<usize> {
        self.run(|inner| inner.store.rm(path))
    }

    pub fn rename(&mut self, path: &str, label: &str) -> Result<usize> {
        self.run(|inner| inner.store.rename(path, label))
    }

    pub fn matches(&mut self, path: &str) -> Result<Vec<String>> {
        self.run(|inner| inner.store.matches(path))
    }

    pub fn define_variable(&mut self, name: &str, expr: Option<&str>) -> Result<usize> {
        self.run(|inner| inner.store.define_variable(name, expr))
    }

    pub fn define_node(&mut self, name: &str, expr: &str, value: Option<&str>) -> Result<(usize, bool)> {
        self.run(|inner| inner.store.define_node(name, expr, value))
    }

    pub fn clear_variable(&mut self, name: &str) -> Result<bool> {
        self.run(|inner| Ok(inner.store.clear_variable(name)))
    }

    pub fn span(&mut self, path: &str) -> Result<Span> {
        self.run(|inner| inner.store.span(path))
    }

    pub fn print(&mut self, path: &str) -> Result<String> {
        self.run(|inner| inner.store.print(path))
    }

    /// Reload every file selected by `/augeas/load`. Unsaved edits under
    /// `/files` are discarded. Files that fail to load are reported through
    /// [`Session::file_errors`]; the call itself succeeds.
    pub fn load(&mut self) -> Result<()> {
        self.run(Inner::load)
    }

    /// Write every modified file. All files are attempted; the first
    /// per-file failure is returned afterwards.
    pub fn save(&mut self) -> Result<SaveReport> {
        self.run(Inner::save)
    }

    /// Remove every transform. Returns how many were removed.
    pub fn clear_transforms(&mut self) -> Result<usize> {
        self.run(|inner| {
            let removed = inner.store.select("/augeas/load/*")?.len();
            inner.store.rm("/augeas/load/*")?;
            inner.transforms.clear();
            info!(removed, "transforms cleared");
            Ok(removed)
        })
    }

    pub fn add_transform(
        &mut self,
        lens: &str,
        name: Option<&str>,
        incl: &[&str],
        excl: &[&str],
    ) -> Result<()> {
        self.run(|inner| {
            let transform = Transform::new(
                lens,
                name,
                incl.iter().map(|s| s.to_string()).collect(),
                excl.iter().map(|s| s.to_string()).collect(),
            );
            if transform.incl.is_empty() {
                return Err(Error::BadArgument(format!(
                    "transform {} has no include glob",
                    transform.name
                )));
            }
            if let Some(problem) = transform.check_globs().into_iter().next() {
                return Err(Error::BadArgument(problem));
            }
            let qualified = inner.library.qualify(lens)?;
            inner.library.resolve(&qualified)?;

            inner.transforms = meta::read_transforms(inner.store.tree());
            info!(name = %transform.name, lens, "transform added");
            inner.transforms.add(transform);
            meta::publish_transforms(inner.store.tree_mut(), &inner.transforms);
            Ok(())
        })
    }

    /// Transforms as they will be used by the next load.
    pub fn transforms(&mut self) -> Result<Vec<Transform>> {
        self.run(|inner| Ok(meta::read_transforms(inner.store.tree()).iter().cloned().collect()))
    }

    /// Load and save failures from the last load and save.
    pub fn file_errors(&mut self) -> Result<Vec<FileError>> {
        self.run(|inner| Ok(inner.file_errors.clone()))
    }

    /// Paths of the files currently loaded, e.g. `/etc/hosts`.
    pub fn loaded_files(&mut self) -> Result<Vec<String>> {
        self.run(|inner| Ok(inner.files.keys().cloned().collect()))
    }

    /// Qualified names of every registered lens.
    pub fn lenses(&mut self) -> Result<Vec<String>> {
        self.run(|inner| Ok(inner.library.names()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn load(&mut self) -> Result<()> {
        let tree = self.store.tree();
        self.transforms = meta::read_transforms(tree);
        let spans = meta::read_span(tree).unwrap_or(self.flags.enable_span);

        let outcome = Loader::new(&self.guard, &self.transforms, &self.library)
            .with_spans(spans)
            .load(self.store.tree_mut());
        info!(
            files = outcome.files.len(),
            errors = outcome.errors.len(),
            "load finished"
        );
        meta::publish_files(self.store.tree_mut(), &outcome.files, &outcome.errors);
        self.files = outcome.files;
        self.file_errors = outcome.errors;
        Ok(())
    }

    fn save(&mut self) -> Result<SaveReport> {
        let mode = meta::read_save_mode(self.store.tree())
            .map_err(Error::BadArgument)?
            .unwrap_or_else(|| self.flags.save_mode());
        self.transforms = meta::read_transforms(self.store.tree());

        let report = Saver::new(&self.guard, &self.transforms, &self.library)
            .with_mode(mode)
            .save(self.store.tree_mut(), &mut self.files);
        info!(
            mode = mode.as_str(),
            saved = report.saved.len(),
            pending = report.pending.len(),
            errors = report.errors.len(),
            "save finished"
        );

        let tree = self.store.tree_mut();
        if mode != SaveMode::Noop {
            meta::publish_saved(tree, &report.saved);
        }
        meta::publish_errors(tree, &report.errors);
        self.file_errors
            .retain(|err| !matches!(err.kind, FileErrorKind::PutFailed | FileErrorKind::WriteFailed));
        self.file_errors.extend(report.errors.iter().cloned());

        match report.errors.first() {
            Some(err) => Err(file_error(err)),
            None => Ok(report),
        }
    }
}

/// The crate error for a per-file failure.
fn file_error(err: &FileError) -> Error {
    match err.kind {
        FileErrorKind::PutFailed => Error::LensPut(LensError::Put {
            path: format!("/files{}", err.path),
            message: err.message.clone(),
        }),
        FileErrorKind::ParseFailed => Error::LensParse(LensError::Parse {
            file: err.path.clone(),
            pos: err.position.map(|p| p.pos).unwrap_or_default(),
            line: err.position.map(|p| p.line).unwrap_or_default(),
            col: err.position.map(|p| p.col).unwrap_or_default(),
            message: err.message.clone(),
        }),
        FileErrorKind::NoLens => Error::NoLens(LensError::NoLens {
            name: err.lens.clone().unwrap_or_default(),
            suggestion: None,
        }),
        FileErrorKind::MultipleTransforms => Error::BadArgument(err.to_string()),
        FileErrorKind::ReadFailed | FileErrorKind::WriteFailed | FileErrorKind::OutsideRoot => {
            Error::Io {
                path: err.path.clone(),
                source: io::Error::other(err.message.clone()),
            }
        }
    }
}
