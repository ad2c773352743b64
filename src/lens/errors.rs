use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LensError {
    #[error("invalid regular expression '{pattern}': {message}")]
    BadRegex { pattern: String, message: String },

    #[error("{file}:{line}:{col}: {message}")]
    Parse {
        file: String,
        pos: usize,
        line: usize,
        col: usize,
        message: String,
    },

    #[error("cannot print {path}: {message}")]
    Put { path: String, message: String },

    #[error("lens '{name}' not found{}", suggestion_suffix(.suggestion))]
    NoLens {
        name: String,
        suggestion: Option<String>,
    },

    #[error("lens {name} failed type check: {message}")]
    Type { name: String, message: String },

    #[error("lens module {module}: {message}")]
    Module { module: String, message: String },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean '{name}'?)"),
        None => String::new(),
    }
}

impl LensError {
    /// Short reason, without the location prefix.
    pub fn minor(&self) -> String {
        match self {
            LensError::BadRegex { message, .. } => message.clone(),
            LensError::Parse { message, .. } => message.clone(),
            LensError::Put { message, .. } => message.clone(),
            LensError::NoLens { name, .. } => format!("no lens named {name}"),
            LensError::Type { message, .. } => message.clone(),
            LensError::Module { message, .. } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_lens_mentions_suggestion() {
        let err = LensError::NoLens {
            name: "Host.lns".into(),
            suggestion: Some("Hosts.lns".into()),
        };
        assert_eq!(
            err.to_string(),
            "lens 'Host.lns' not found (did you mean 'Hosts.lns'?)"
        );
    }

    #[test]
    fn parse_error_renders_location() {
        let err = LensError::Parse {
            file: "/etc/hosts".into(),
            pos: 12,
            line: 2,
            col: 3,
            message: "syntax error".into(),
        };
        assert_eq!(err.to_string(), "/etc/hosts:2:3: syntax error");
    }
}
