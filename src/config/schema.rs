use crate::session::{SessionFlags, SessionOptions};
use crate::transform::Transform;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// A `lenstree.toml` session file.
///
/// ```toml
/// root = "/srv/chroot"
/// load_paths = ["lenses"]
///
/// [flags]
/// save_backup = true
/// enable_span = true
///
/// [[transforms]]
/// lens = "@Hosts"
/// incl = ["/etc/hosts"]
/// ```
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub load_paths: Vec<PathBuf>,
    #[serde(default)]
    pub flags: SessionFlags,
    #[serde(default)]
    pub transforms: Vec<TransformDefinition>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TransformDefinition {
    pub lens: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub incl: Vec<String>,
    #[serde(default)]
    pub excl: Vec<String>,
}

impl TransformDefinition {
    pub fn to_transform(&self) -> Transform {
        Transform::new(
            &self.lens,
            self.name.as_deref(),
            self.incl.clone(),
            self.excl.clone(),
        )
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        let save_modes = [
            self.flags.save_backup,
            self.flags.save_newfile,
            self.flags.save_noop,
        ];
        if save_modes.iter().filter(|set| **set).count() > 1 {
            issues.push(ValidationIssue::InvalidCombo {
                transform: None,
                message: "only one of save_backup, save_newfile and save_noop may be set"
                    .to_string(),
            });
        }

        for def in &self.transforms {
            let transform = def.to_transform();
            if def.lens.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    transform: def.name.clone(),
                    field: "lens",
                });
                continue;
            }
            if def.incl.is_empty() {
                issues.push(ValidationIssue::EmptyIncludes {
                    transform: transform.name.clone(),
                });
            }
            for problem in transform.check_globs() {
                issues.push(ValidationIssue::InvalidCombo {
                    transform: Some(transform.name.clone()),
                    message: format!("bad glob {problem}"),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Session options described by this file; the root defaults to `/`.
    pub fn options(&self) -> SessionOptions {
        SessionOptions::new(self.root.clone().unwrap_or_else(|| PathBuf::from("/")))
            .with_load_paths(self.load_paths.clone())
            .with_flags(self.flags)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        transform: Option<String>,
        field: &'static str,
    },
    EmptyIncludes {
        transform: String,
    },
    InvalidCombo {
        transform: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { transform, field } => match transform {
                Some(name) => write!(f, "transform '{name}' missing required field '{field}'"),
                None => write!(f, "transform missing required field '{field}'"),
            },
            ValidationIssue::EmptyIncludes { transform } => {
                write!(f, "transform '{transform}' has no include globs")
            }
            ValidationIssue::InvalidCombo { transform, message } => match transform {
                Some(name) => write!(f, "transform '{name}' has invalid configuration: {message}"),
                None => write!(f, "invalid session configuration: {message}"),
            },
        }
    }
}
