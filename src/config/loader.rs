use crate::config::schema::{SessionConfig, ValidationError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A session file that could not be read, parsed or accepted. Parse and
/// validation errors carry the file once it is known.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("{}: {source}", origin(.path))]
    Syntax {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },

    #[error("{}: {source}", origin(.path))]
    Invalid {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn in_file(mut self, file: &Path) -> Self {
        if let ConfigError::Syntax { path, .. } | ConfigError::Invalid { path, .. } = &mut self {
            path.get_or_insert_with(|| file.to_path_buf());
        }
        self
    }
}

fn origin(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "session config".to_string(),
    }
}

pub fn load_from_str(input: &str) -> Result<SessionConfig, ConfigError> {
    let config: SessionConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Syntax { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Invalid { path: None, source })?;
    Ok(config)
}

/// Load a session file. A relative `root` or load path is taken relative
/// to the directory holding the file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<SessionConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = load_from_str(&contents).map_err(|error| error.in_file(path))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    if let Some(root) = config.root.take() {
        config.root = Some(relative_to(base, root));
    }
    config.load_paths = config
        .load_paths
        .into_iter()
        .map(|dir| relative_to(base, dir))
        .collect();
    Ok(config)
}

fn relative_to(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_session_file() {
        let config = load_from_str(
            r#"
root = "/srv/root"
load_paths = ["/usr/share/lenstree"]

[flags]
save_backup = true
enable_span = true

[[transforms]]
lens = "@Hosts"
incl = ["/etc/hosts"]

[[transforms]]
lens = "Simplevars.lns"
name = "sysctl"
incl = ["/etc/sysctl.d/*.conf"]
excl = ["*.rpmsave"]
"#,
        )
        .unwrap();
        assert!(config.flags.save_backup && config.flags.enable_span);
        assert_eq!(config.transforms.len(), 2);
        assert_eq!(config.transforms[1].to_transform().name, "sysctl");
        assert_eq!(config.options().root, PathBuf::from("/srv/root"));
    }

    #[test]
    fn collects_every_issue() {
        let err = load_from_str(
            r#"
[flags]
save_backup = true
save_noop = true

[[transforms]]
lens = ""

[[transforms]]
lens = "@Hosts"
"#,
        )
        .unwrap_err();
        let ConfigError::Invalid { source, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(source.issues.len(), 3);
    }

    #[test]
    fn unknown_flag_is_a_toml_error() {
        let err = load_from_str("[flags]\nsave_sideways = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { path: None, .. }));
        assert!(err.to_string().starts_with("session config: "));
    }

    #[test]
    fn relative_paths_follow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lenstree.toml");
        fs::write(&file, "root = \"sandbox\"\nload_paths = [\"lenses\"]\n").unwrap();
        let config = load_from_path(&file).unwrap();
        assert_eq!(config.root, Some(dir.path().join("sandbox")));
        assert_eq!(config.load_paths, vec![dir.path().join("lenses")]);

        let missing = load_from_path(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
        assert!(missing.to_string().starts_with("cannot read "));
    }
}
