use crate::transform::SaveMode;
use serde::Deserialize;
use std::path::PathBuf;

/// Options that change how a session loads and saves.
///
/// On the wire these are a bitmask; inside the crate they are named fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionFlags {
    /// Keep the original of every saved file as `<file>.orig`.
    pub save_backup: bool,
    /// Write `<file>.new` instead of replacing the file.
    pub save_newfile: bool,
    /// Type check every lens when the session opens.
    pub type_check: bool,
    /// Do not register the built-in lens modules.
    pub no_stdinc: bool,
    /// Save writes nothing and only reports what would change.
    pub save_noop: bool,
    /// Do not load files when the session opens.
    pub no_load: bool,
    /// Do not add the transforms that lens modules declare.
    pub no_module_autoload: bool,
    /// Record source spans while loading.
    pub enable_span: bool,
}

pub const SAVE_BACKUP: u32 = 1 << 0;
pub const SAVE_NEWFILE: u32 = 1 << 1;
pub const TYPE_CHECK: u32 = 1 << 2;
pub const NO_STDINC: u32 = 1 << 3;
pub const SAVE_NOOP: u32 = 1 << 4;
pub const NO_LOAD: u32 = 1 << 5;
pub const NO_MODULE_AUTOLOAD: u32 = 1 << 6;
pub const ENABLE_SPAN: u32 = 1 << 7;

impl SessionFlags {
    /// Decode a wire bitmask. Unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            save_backup: bits & SAVE_BACKUP != 0,
            save_newfile: bits & SAVE_NEWFILE != 0,
            type_check: bits & TYPE_CHECK != 0,
            no_stdinc: bits & NO_STDINC != 0,
            save_noop: bits & SAVE_NOOP != 0,
            no_load: bits & NO_LOAD != 0,
            no_module_autoload: bits & NO_MODULE_AUTOLOAD != 0,
            enable_span: bits & ENABLE_SPAN != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        [
            (self.save_backup, SAVE_BACKUP),
            (self.save_newfile, SAVE_NEWFILE),
            (self.type_check, TYPE_CHECK),
            (self.no_stdinc, NO_STDINC),
            (self.save_noop, SAVE_NOOP),
            (self.no_load, NO_LOAD),
            (self.no_module_autoload, NO_MODULE_AUTOLOAD),
            (self.enable_span, ENABLE_SPAN),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    /// Save mode implied by the flags. A noop save wins over everything,
    /// then newfile, then backup.
    pub fn save_mode(&self) -> SaveMode {
        if self.save_noop {
            SaveMode::Noop
        } else if self.save_newfile {
            SaveMode::NewFile
        } else if self.save_backup {
            SaveMode::Backup
        } else {
            SaveMode::Overwrite
        }
    }
}

/// Everything [`Session::open`](crate::session::Session::open) needs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory that `/files` mirrors.
    pub root: PathBuf,
    /// Extra directories searched for lens modules.
    pub load_paths: Vec<PathBuf>,
    pub flags: SessionFlags,
}

impl SessionOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            load_paths: Vec::new(),
            flags: SessionFlags::default(),
        }
    }

    pub fn with_load_paths(mut self, load_paths: Vec<PathBuf>) -> Self {
        self.load_paths = load_paths;
        self
    }

    pub fn with_flags(mut self, flags: SessionFlags) -> Self {
        self.flags = flags;
        self
    }
}
