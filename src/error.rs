//! Crate-wide errors and the status codes reported through a session's
//! error surface.

use crate::lens::LensError;
use crate::path::PathError;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid path expression: {0}")]
    PathSyntax(PathError),

    #[error("undefined variable ${name}")]
    UndefinedVariable { name: String },

    #[error("'{path}' does not evaluate to a node set")]
    NotANodeSet { path: String },

    #[error("'{path}' matches {count} nodes")]
    AmbiguousPath { path: String, count: usize },

    #[error("no match for '{path}'")]
    NoMatch { path: String },

    #[error("cannot create a node for '{path}': {reason}")]
    CannotCreate { path: String, reason: String },

    #[error("invalid label '{label}'")]
    InvalidLabel { label: String },

    #[error("cannot move '{src}' into its own descendant '{dest}'")]
    InvalidMove { src: String, dest: String },

    #[error("destination '{dest}' already exists")]
    DestinationExists { dest: String },

    #[error(transparent)]
    LensParse(LensError),

    #[error(transparent)]
    LensPut(LensError),

    #[error(transparent)]
    NoLens(LensError),

    #[error("node '{path}' has no span information")]
    NoSpanInfo { path: String },

    #[error("invalid argument: {0}")]
    BadArgument(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<PathError> for Error {
    fn from(err: PathError) -> Self {
        match err {
            PathError::UndefinedVariable { name } => Error::UndefinedVariable { name },
            PathError::NotANodeSet { input } => Error::NotANodeSet { path: input },
            other => Error::PathSyntax(other),
        }
    }
}

impl From<LensError> for Error {
    fn from(err: LensError) -> Self {
        match err {
            LensError::Put { .. } => Error::LensPut(err),
            LensError::NoLens { .. } => Error::NoLens(err),
            other => Error::LensParse(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status of the last operation on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    NoError,
    PathExpr,
    NoMatch,
    MultipleMatches,
    Syntax,
    NoLens,
    MultipleTransforms,
    NoSpan,
    MoveIntoDescendant,
    DestinationExists,
    BadArgument,
    BadLabel,
    FileAccess,
    SessionClosed,
    Internal,
}

impl ErrorCode {
    /// Fixed message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "No error",
            ErrorCode::PathExpr => "Invalid path expression",
            ErrorCode::NoMatch => "No match for path expression",
            ErrorCode::MultipleMatches => "Too many matches for path expression",
            ErrorCode::Syntax => "Syntax error in lens definition",
            ErrorCode::NoLens => "Lens not found",
            ErrorCode::MultipleTransforms => "Multiple transforms",
            ErrorCode::NoSpan => "Node has no span info",
            ErrorCode::MoveIntoDescendant => "Cannot move node into its descendant",
            ErrorCode::DestinationExists => "Destination already exists",
            ErrorCode::BadArgument => "Invalid argument in function call",
            ErrorCode::BadLabel => "Invalid label",
            ErrorCode::FileAccess => "Cannot open or read a file",
            ErrorCode::SessionClosed => "Session closed",
            ErrorCode::Internal => "Internal error",
        }
    }

    /// Wire value, stable across releases.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Everything the error surface reports about a failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub minor: Option<String>,
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn ok() -> Self {
        Self {
            code: ErrorCode::NoError,
            message: ErrorCode::NoError.message().to_string(),
            minor: None,
            details: None,
        }
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::PathSyntax(_) | Error::UndefinedVariable { .. } | Error::NotANodeSet { .. } => {
                ErrorCode::PathExpr
            }
            Error::AmbiguousPath { .. } => ErrorCode::MultipleMatches,
            Error::NoMatch { .. } => ErrorCode::NoMatch,
            Error::CannotCreate { .. } => ErrorCode::PathExpr,
            Error::InvalidLabel { .. } => ErrorCode::BadLabel,
            Error::InvalidMove { .. } => ErrorCode::MoveIntoDescendant,
            Error::DestinationExists { .. } => ErrorCode::DestinationExists,
            Error::LensParse(_) | Error::LensPut(_) => ErrorCode::Syntax,
            Error::NoLens(_) => ErrorCode::NoLens,
            Error::NoSpanInfo { .. } => ErrorCode::NoSpan,
            Error::BadArgument(_) => ErrorCode::BadArgument,
            Error::SessionClosed => ErrorCode::SessionClosed,
            Error::Io { .. } => ErrorCode::FileAccess,
        }
    }

    /// Build the error-surface record for this error.
    pub fn info(&self) -> ErrorInfo {
        let code = self.code();
        let (minor, details) = match self {
            Error::PathSyntax(err) => (Some(err.minor()), err.details()),
            Error::UndefinedVariable { name } => {
                (Some("undefined variable".to_string()), Some(format!("${name}")))
            }
            Error::NotANodeSet { path } => {
                (Some("expression is not a node set".to_string()), Some(path.clone()))
            }
            Error::AmbiguousPath { path, count } => {
                (Some(format!("{count} matches")), Some(path.clone()))
            }
            Error::NoMatch { path } => (None, Some(path.clone())),
            Error::CannotCreate { path, reason } => (Some(reason.clone()), Some(path.clone())),
            Error::InvalidLabel { label } => (None, Some(label.clone())),
            Error::InvalidMove { src, dest } => (None, Some(format!("{src} -> {dest}"))),
            Error::DestinationExists { dest } => (None, Some(dest.clone())),
            Error::LensParse(err) | Error::LensPut(err) | Error::NoLens(err) => {
                (Some(err.minor()), Some(err.to_string()))
            }
            Error::NoSpanInfo { path } => (None, Some(path.clone())),
            Error::BadArgument(message) => (Some(message.clone()), None),
            Error::SessionClosed => (None, None),
            Error::Io { path, source } => (Some(source.to_string()), Some(path.clone())),
        };
        ErrorInfo {
            code,
            message: code.message().to_string(),
            minor,
            details,
        }
    }
}
