use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("{message} at position {position} in '{input}'")]
    Syntax {
        input: String,
        position: usize,
        message: String,
    },

    #[error("undefined variable ${name}")]
    UndefinedVariable { name: String },

    #[error("'{input}' does not evaluate to a node set")]
    NotANodeSet { input: String },

    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

impl PathError {
    pub(crate) fn syntax(input: &str, position: usize, message: impl Into<String>) -> Self {
        PathError::Syntax {
            input: input.to_string(),
            position,
            message: message.into(),
        }
    }

    /// Short reason, without the expression text.
    pub fn minor(&self) -> String {
        match self {
            PathError::Syntax { message, .. } => message.clone(),
            PathError::UndefinedVariable { name } => format!("undefined variable ${name}"),
            PathError::NotANodeSet { .. } => "expression is not a node set".to_string(),
            PathError::InvalidRegex { message, .. } => message.clone(),
        }
    }

    /// The offending expression with a `|=|` marker at the failure point.
    pub fn details(&self) -> Option<String> {
        match self {
            PathError::Syntax {
                input, position, ..
            } => {
                let split = clamp_to_boundary(input, *position);
                Some(format!("{}|=|{}", &input[..split], &input[split..]))
            }
            PathError::UndefinedVariable { name } => Some(format!("${name}")),
            PathError::NotANodeSet { input } => Some(input.clone()),
            PathError::InvalidRegex { pattern, .. } => Some(pattern.clone()),
        }
    }
}

fn clamp_to_boundary(input: &str, position: usize) -> usize {
    let mut split = position.min(input.len());
    while !input.is_char_boundary(split) {
        split -= 1;
    }
    split
}
