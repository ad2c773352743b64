//! lenstree: edit configuration files as a tree
//!
//! Files below a root directory are parsed by bidirectional lenses into a
//! single tree mounted at `/files`. The tree is queried and modified with
//! path expressions, and `save` writes every modified file back, keeping
//! the formatting and comments the edit did not touch.
//!
//! # Architecture
//!
//! - [`lens`]: lens combinators, the `get` and `put` directions, and the
//!   module library that names lenses (`Hosts.lns`, `@Hosts`).
//! - [`tree`]: the node store with dirty tracking and source spans.
//! - [`path`]: the path expression language used by every tree operation.
//! - [`transform`]: which lens applies to which file, and the loader and
//!   saver that move text between disk and tree.
//! - [`session`]: the handle tying these together, with the `/augeas`
//!   metadata subtree and the last-error surface.
//!
//! # Safety
//!
//! - Files are only read and written below the session root
//! - Writes are atomic (tempfile + fsync + rename)
//! - A file whose text would not change is never rewritten
//! - A file that fails to print is left untouched on disk
//!
//! # Example
//!
//! ```no_run
//! use lenstree::{Session, SessionOptions};
//!
//! let mut aug = Session::open(SessionOptions::new("/")).unwrap();
//! aug.set("/files/etc/hosts/1/alias[last()+1]", Some("web")).unwrap();
//! let report = aug.save().unwrap();
//! for saved in &report.saved {
//!     println!("wrote {}", saved.target.display());
//! }
//! ```

pub mod config;
pub mod error;
pub mod lens;
pub mod path;
pub mod safety;
pub mod session;
pub mod store;
pub mod transform;
pub mod tree;

// Re-exports
pub use config::{load_from_path, load_from_str, ConfigError, SessionConfig};
pub use error::{Error, ErrorCode, ErrorInfo, Result};
pub use lens::{LensError, LensLibrary};
pub use path::PathError;
pub use safety::{RootGuard, SafetyError};
pub use session::{Session, SessionFlags, SessionOptions};
pub use store::Store;
pub use transform::{FileError, FileErrorKind, SaveMode, SaveReport, Transform};
pub use tree::{NodePath, Span, Tree};
