use crate::lens::{self, LensLibrary, Skeleton};
use crate::safety::RootGuard;
use crate::transform::loader::safety_error;
use crate::transform::{FileEntry, FileError, FileErrorKind, TransformTable};
use crate::tree::{NodePath, Tree};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// What `save` does with the text it prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Replace the file in place.
    #[default]
    Overwrite,
    /// Copy the original to `<file>.orig` first.
    Backup,
    /// Write `<file>.new` and leave the original alone.
    NewFile,
    /// Write nothing; only report what would change.
    Noop,
}

impl SaveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::Overwrite => "overwrite",
            SaveMode::Backup => "backup",
            SaveMode::NewFile => "newfile",
            SaveMode::Noop => "noop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "overwrite" => Some(SaveMode::Overwrite),
            "backup" => Some(SaveMode::Backup),
            "newfile" => Some(SaveMode::NewFile),
            "noop" => Some(SaveMode::Noop),
            _ => None,
        }
    }
}

pub const BACKUP_SUFFIX: &str = ".orig";
pub const NEWFILE_SUFFIX: &str = ".new";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Updated,
    Created,
    Deleted,
}

/// A file that was written (or removed) by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Path inside the root, e.g. `/etc/hosts`.
    pub path: String,
    /// File actually touched on disk.
    pub target: PathBuf,
    pub action: SaveAction,
}

/// A change a noop save would have made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub path: String,
    pub target: PathBuf,
    /// Text on disk, `None` for a file that does not exist yet.
    pub before: Option<String>,
    /// Text that would be written, `None` when the file would be deleted.
    pub after: Option<String>,
}

#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: Vec<SavedFile>,
    pub pending: Vec<PendingChange>,
    pub errors: Vec<FileError>,
    /// Files that were modified in the tree but printed to the same text.
    pub unchanged: Vec<String>,
}

impl SaveReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Prints modified files back to disk.
pub struct Saver<'a> {
    guard: &'a RootGuard,
    table: &'a TransformTable,
    library: &'a LensLibrary,
    mode: SaveMode,
}

impl<'a> Saver<'a> {
    pub fn new(guard: &'a RootGuard, table: &'a TransformTable, library: &'a LensLibrary) -> Self {
        Self {
            guard,
            table,
            library,
            mode: SaveMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: SaveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Save every file whose subtree changed since it was loaded or last
    /// saved. Files are independent: one failure never stops the others.
    pub fn save(&self, tree: &mut Tree, files: &mut BTreeMap<String, FileEntry>) -> SaveReport {
        let mut report = SaveReport::default();
        let Some(files_at) = tree.child_by_label(&NodePath::root(), "files") else {
            for path in files.keys().cloned().collect::<Vec<_>>() {
                self.delete(&path, files, &mut report);
            }
            return report;
        };

        let known: Vec<String> = files.keys().cloned().collect();
        for path in known {
            let Some(entry) = files.get(&path) else {
                continue;
            };
            let at = tree
                .locate(entry.node)
                .filter(|at| file_path(tree, &files_at, at).as_deref() == Some(path.as_str()));
            match at {
                None => match file_node(tree, &files_at, &path) {
                    // Removed and then set again: print the new subtree over
                    // the old file.
                    Some(at) => {
                        if let (Some(entry), Some(node)) = (files.get_mut(&path), tree.node(&at)) {
                            entry.node = node.id();
                            entry.skeleton = Skeleton::default();
                        }
                        self.update(tree, &at, &path, files, &mut report);
                    }
                    None => self.delete(&path, files, &mut report),
                },
                Some(at) => {
                    let dirty = tree.node(&at).is_some_and(|n| n.is_dirty());
                    if dirty {
                        self.update(tree, &at, &path, files, &mut report);
                    }
                }
            }
        }

        for (path, at) in self.new_files(tree, &files_at, files) {
            self.create(tree, &at, &path, files, &mut report);
        }

        report
    }

    fn update(
        &self,
        tree: &mut Tree,
        at: &NodePath,
        path: &str,
        files: &mut BTreeMap<String, FileEntry>,
        report: &mut SaveReport,
    ) {
        let Some(entry) = files.get(path) else {
            return;
        };
        let text = match self.print(tree, at, &entry.lens, &entry.skeleton, path) {
            Ok(text) => text,
            Err(err) => {
                warn!(file = %path, error = %err, "cannot print file");
                report.errors.push(err);
                return;
            }
        };
        let hash = xxh3_64(text.as_bytes());
        if hash == entry.hash {
            debug!(file = %path, "unchanged");
            report.unchanged.push(path.to_string());
            tree.clear_dirty(at);
            return;
        }

        let real = match self.guard.validate_path(path.trim_start_matches('/')) {
            Ok(real) => real,
            Err(err) => {
                report.errors.push(safety_error(path, err));
                return;
            }
        };
        match self.write(&real, &text, true) {
            Ok(Some(target)) => {
                info!(file = %path, target = %target.display(), mode = self.mode.as_str(), "saved");
                if let Some(entry) = files.get_mut(path) {
                    if self.mode != SaveMode::NewFile {
                        entry.hash = hash;
                    }
                }
                tree.clear_dirty(at);
                report.saved.push(SavedFile {
                    path: path.to_string(),
                    target,
                    action: SaveAction::Updated,
                });
            }
            Ok(None) => report.pending.push(PendingChange {
                path: path.to_string(),
                target: real.clone(),
                before: fs::read_to_string(&real).ok(),
                after: Some(text),
            }),
            Err(err) => {
                warn!(file = %path, error = %err, "write failed");
                report
                    .errors
                    .push(FileError::new(path, FileErrorKind::WriteFailed, err.to_string()));
            }
        }
    }

    fn create(
        &self,
        tree: &mut Tree,
        at: &NodePath,
        path: &str,
        files: &mut BTreeMap<String, FileEntry>,
        report: &mut SaveReport,
    ) {
        let matching = self.table.matching(path);
        let [transform] = matching.as_slice() else {
            return;
        };
        let lens_name = match self.library.qualify(&transform.lens) {
            Ok(name) => name,
            Err(err) => {
                report
                    .errors
                    .push(FileError::new(path, FileErrorKind::NoLens, err.to_string()));
                return;
            }
        };
        let skeleton = Skeleton::default();
        let text = match self.print(tree, at, &lens_name, &skeleton, path) {
            Ok(text) => text,
            Err(err) => {
                warn!(file = %path, error = %err, "cannot print new file");
                report.errors.push(err);
                return;
            }
        };
        let real = match self.guard.validate_new_path(path.trim_start_matches('/')) {
            Ok(real) => real,
            Err(err) => {
                report.errors.push(safety_error(path, err));
                return;
            }
        };

        match self.write(&real, &text, false) {
            Ok(Some(target)) => {
                info!(file = %path, target = %target.display(), "created");
                let Some(node) = tree.node(at).map(|n| n.id()) else {
                    return;
                };
                files.insert(
                    path.to_string(),
                    FileEntry {
                        path: path.to_string(),
                        lens: lens_name,
                        transform: transform.name.clone(),
                        node,
                        skeleton,
                        hash: xxh3_64(text.as_bytes()),
                    },
                );
                tree.clear_dirty(at);
                report.saved.push(SavedFile {
                    path: path.to_string(),
                    target,
                    action: SaveAction::Created,
                });
            }
            Ok(None) => report.pending.push(PendingChange {
                path: path.to_string(),
                target: real,
                before: None,
                after: Some(text),
            }),
            Err(err) => report
                .errors
                .push(FileError::new(path, FileErrorKind::WriteFailed, err.to_string())),
        }
    }

    fn delete(&self, path: &str, files: &mut BTreeMap<String, FileEntry>, report: &mut SaveReport) {
        let real = match self.guard.validate_path(path.trim_start_matches('/')) {
            Ok(real) => real,
            Err(_) => {
                // Already gone from disk.
                files.remove(path);
                return;
            }
        };
        let result = match self.mode {
            SaveMode::Overwrite => fs::remove_file(&real).map(|_| Some(real.clone())),
            SaveMode::Backup => {
                let backup = with_suffix(&real, BACKUP_SUFFIX);
                fs::rename(&real, &backup).map(|_| Some(backup))
            }
            SaveMode::NewFile => Ok(None),
            SaveMode::Noop => {
                report.pending.push(PendingChange {
                    path: path.to_string(),
                    target: real.clone(),
                    before: fs::read_to_string(&real).ok(),
                    after: None,
                });
                return;
            }
        };
        match result {
            Ok(target) => {
                info!(file = %path, mode = self.mode.as_str(), "deleted");
                files.remove(path);
                if let Some(target) = target {
                    report.saved.push(SavedFile {
                        path: path.to_string(),
                        target,
                        action: SaveAction::Deleted,
                    });
                }
            }
            Err(err) => report
                .errors
                .push(FileError::new(path, FileErrorKind::WriteFailed, err.to_string())),
        }
    }

    fn print(
        &self,
        tree: &Tree,
        at: &NodePath,
        lens_name: &str,
        skeleton: &Skeleton,
        path: &str,
    ) -> Result<String, FileError> {
        let lens = self
            .library
            .resolve(lens_name)
            .map_err(|err| FileError::new(path, FileErrorKind::NoLens, err.to_string()))?;
        let node = tree
            .node(at)
            .ok_or_else(|| FileError::new(path, FileErrorKind::PutFailed, "file node vanished"))?;
        lens::put(&lens, skeleton, node, &tree.path_string(at)).map_err(|err| {
            FileError::new(path, FileErrorKind::PutFailed, err.to_string()).with_lens(lens_name)
        })
    }

    /// Write `text` for the file at `real` according to the mode. Returns
    /// the file written, or `None` when nothing was written.
    fn write(&self, real: &Path, text: &str, exists: bool) -> io::Result<Option<PathBuf>> {
        match self.mode {
            SaveMode::Noop => Ok(None),
            SaveMode::NewFile => {
                let target = with_suffix(real, NEWFILE_SUFFIX);
                atomic_write(&target, text.as_bytes())?;
                Ok(Some(target))
            }
            SaveMode::Backup if exists => {
                backup(real)?;
                atomic_write(real, text.as_bytes())?;
                Ok(Some(real.to_path_buf()))
            }
            SaveMode::Backup | SaveMode::Overwrite => {
                atomic_write(real, text.as_bytes())?;
                Ok(Some(real.to_path_buf()))
            }
        }
    }

    /// Dirty nodes below `/files` that sit at a path some transform accepts
    /// and that were not loaded from disk.
    fn new_files(
        &self,
        tree: &Tree,
        files_at: &NodePath,
        files: &BTreeMap<String, FileEntry>,
    ) -> Vec<(String, NodePath)> {
        let mut found = Vec::new();
        let mut stack = vec![files_at.clone()];
        while let Some(at) = stack.pop() {
            let Some(node) = tree.node(&at) else {
                continue;
            };
            if !node.is_dirty() {
                continue;
            }
            if at != *files_at {
                let Some(path) = file_path(tree, files_at, &at) else {
                    continue;
                };
                if files.contains_key(&path) {
                    continue;
                }
                if self.table.matching(&path).len() == 1 {
                    found.push((path, at));
                    continue;
                }
            }
            for idx in (0..node.children.len()).rev() {
                stack.push(at.child(idx));
            }
        }
        found
    }
}

/// `/etc/hosts` for the node at `/files/etc/hosts`; `None` outside
/// `/files` or through an unlabeled node.
fn file_path(tree: &Tree, files_at: &NodePath, at: &NodePath) -> Option<String> {
    if !files_at.contains(at) || files_at == at {
        return None;
    }
    let mut node = tree.node(files_at)?;
    let mut out = String::new();
    for &idx in &at.indices()[files_at.depth()..] {
        node = node.children.get(idx)?;
        out.push('/');
        out.push_str(node.label()?);
    }
    Some(out)
}

/// The node at `path` below `/files`, looked up by label.
fn file_node(tree: &Tree, files_at: &NodePath, path: &str) -> Option<NodePath> {
    path.split('/')
        .filter(|label| !label.is_empty())
        .try_fold(files_at.clone(), |at, label| tree.child_by_label(&at, label))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `path` to `<path>.orig`, keeping its modification time.
fn backup(path: &Path) -> io::Result<()> {
    let target = with_suffix(path, BACKUP_SUFFIX);
    let meta = fs::metadata(path)?;
    fs::copy(path, &target)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(&target, mtime)?;
    Ok(())
}

/// Write through a temporary file in the same directory, fsync it, then
/// rename it over `path`. Missing parent directories are created.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Loader, Transform};
    use crate::tree::Node;

    const HOSTS: &str = "# local\n127.0.0.1 localhost\n::1\tip6-localhost ip6-loopback\n";

    struct Fixture {
        dir: tempfile::TempDir,
        guard: RootGuard,
        table: TransformTable,
        library: LensLibrary,
        tree: Tree,
        files: BTreeMap<String, FileEntry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("etc")).unwrap();
            fs::write(dir.path().join("etc/hosts"), HOSTS).unwrap();
            let guard = RootGuard::new(dir.path()).unwrap();
            let mut table = TransformTable::new();
            table.add(Transform::new("@Hosts", None, vec!["/etc/hosts".into()], vec![]));
            table.add(Transform::new(
                "Simplevars.lns",
                None,
                vec!["/etc/conf.d/*".into()],
                vec![],
            ));
            let library = LensLibrary::with_builtins().unwrap();
            let mut tree = Tree::new();
            let files = Loader::new(&guard, &table, &library).load(&mut tree).files;
            Self {
                dir,
                guard,
                table,
                library,
                tree,
                files,
            }
        }

        fn save(&mut self, mode: SaveMode) -> SaveReport {
            Saver::new(&self.guard, &self.table, &self.library)
                .with_mode(mode)
                .save(&mut self.tree, &mut self.files)
        }

        fn hosts(&self) -> NodePath {
            let files = self.tree.child_by_label(&NodePath::root(), "files").unwrap();
            let etc = self.tree.child_by_label(&files, "etc").unwrap();
            self.tree.child_by_label(&etc, "hosts").unwrap()
        }

        /// `/files/etc/hosts/1/canonical`
        fn first_canonical(&self) -> NodePath {
            let record = self.tree.child_by_label(&self.hosts(), "1").unwrap();
            self.tree.child_by_label(&record, "canonical").unwrap()
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.dir.path().join(rel)).unwrap()
        }
    }

    #[test]
    fn unmodified_tree_writes_nothing() {
        let mut fx = Fixture::new();
        let report = fx.save(SaveMode::Overwrite);
        assert!(report.saved.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn overwrite_then_second_save_is_idempotent() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("myhost".into()));

        let report = fx.save(SaveMode::Overwrite);
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].action, SaveAction::Updated);
        assert_eq!(
            fx.read("etc/hosts"),
            "# local\n127.0.0.1 myhost\n::1\tip6-localhost ip6-loopback\n"
        );

        let again = fx.save(SaveMode::Overwrite);
        assert!(again.saved.is_empty());
    }

    #[test]
    fn edit_back_to_original_is_unchanged() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("other".into()));
        fx.tree.set_value(&at, Some("localhost".into()));
        let report = fx.save(SaveMode::Overwrite);
        assert!(report.saved.is_empty());
        assert_eq!(report.unchanged, vec!["/etc/hosts"]);
    }

    #[test]
    fn backup_keeps_original_text() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("myhost".into()));
        fx.save(SaveMode::Backup);
        assert_eq!(fx.read("etc/hosts.orig"), HOSTS);
        assert!(fx.read("etc/hosts").contains("myhost"));
    }

    #[test]
    fn newfile_leaves_original_alone() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("myhost".into()));
        let report = fx.save(SaveMode::NewFile);
        assert!(report.saved[0].target.ends_with("etc/hosts.new"));
        assert_eq!(fx.read("etc/hosts"), HOSTS);
        assert!(fx.read("etc/hosts.new").contains("myhost"));
    }

    #[test]
    fn noop_reports_pending_change() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("myhost".into()));
        let report = fx.save(SaveMode::Noop);
        assert!(report.saved.is_empty());
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].before.as_deref(), Some(HOSTS));
        assert!(report.pending[0].after.as_deref().unwrap().contains("myhost"));
        assert_eq!(fx.read("etc/hosts"), HOSTS);
    }

    #[test]
    fn invalid_value_fails_only_that_file() {
        let mut fx = Fixture::new();
        let at = fx.first_canonical();
        fx.tree.set_value(&at, Some("two words".into()));
        let report = fx.save(SaveMode::Overwrite);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FileErrorKind::PutFailed);
        assert_eq!(fx.read("etc/hosts"), HOSTS);
    }

    #[test]
    fn removed_file_is_deleted() {
        let mut fx = Fixture::new();
        let hosts = fx.hosts();
        fx.tree.detach(&hosts);
        let report = fx.save(SaveMode::Backup);
        assert_eq!(report.saved[0].action, SaveAction::Deleted);
        assert!(!fx.dir.path().join("etc/hosts").exists());
        assert_eq!(fx.read("etc/hosts.orig"), HOSTS);
        assert!(fx.files.is_empty());
    }

    fn replace_hosts(fx: &mut Fixture) {
        let hosts = fx.hosts();
        fx.tree.detach(&hosts);
        let files = fx.tree.child_by_label(&NodePath::root(), "files").unwrap();
        let etc = fx.tree.child_by_label(&files, "etc").unwrap();
        fx.tree
            .append_child(
                &etc,
                Node::labeled("hosts").with_children(vec![Node::labeled("1").with_children(vec![
                    Node::labeled("ipaddr").with_value("127.0.0.2"),
                    Node::labeled("canonical").with_value("fresh"),
                ])]),
            )
            .unwrap();
    }

    #[test]
    fn recreated_file_is_one_pending_update() {
        let mut fx = Fixture::new();
        replace_hosts(&mut fx);

        let report = fx.save(SaveMode::Noop);
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].path, "/etc/hosts");
        assert_eq!(report.pending[0].before.as_deref(), Some(HOSTS));
        assert_eq!(report.pending[0].after.as_deref(), Some("127.0.0.2\tfresh\n"));
        assert_eq!(fx.read("etc/hosts"), HOSTS);

        let report = fx.save(SaveMode::Overwrite);
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].action, SaveAction::Updated);
        assert_eq!(fx.read("etc/hosts"), "127.0.0.2\tfresh\n");
        assert!(fx.save(SaveMode::Overwrite).saved.is_empty());
    }

    #[test]
    fn new_file_is_created_from_tree() {
        let mut fx = Fixture::new();
        let files = fx.tree.child_by_label(&NodePath::root(), "files").unwrap();
        let etc = fx.tree.child_by_label(&files, "etc").unwrap();
        let confd = fx.tree.append_child(&etc, Node::labeled("conf.d")).unwrap();
        let file = fx.tree.append_child(&confd, Node::labeled("app")).unwrap();
        fx.tree
            .append_child(&file, Node::labeled("name").with_value("demo"))
            .unwrap();

        let report = fx.save(SaveMode::Overwrite);
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.saved[0].action, SaveAction::Created);
        assert_eq!(fx.read("etc/conf.d/app"), "name = demo\n");
        assert!(fx.files.contains_key("/etc/conf.d/app"));

        assert!(fx.save(SaveMode::Overwrite).saved.is_empty());
    }

    #[test]
    fn save_mode_names() {
        for mode in [
            SaveMode::Overwrite,
            SaveMode::Backup,
            SaveMode::NewFile,
            SaveMode::Noop,
        ] {
            assert_eq!(SaveMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SaveMode::parse("sideways"), None);
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c.conf");
        atomic_write(&target, b"x = 1\n").unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "x = 1\n");
    }
}
