//! Bidirectional lenses.
//!
//! A [`Lens`] is a small grammar that runs in two directions. `get` turns
//! text into tree nodes and keeps a [`Skel`] of everything that did not end
//! up in the tree; `put` walks an edited tree together with that skeleton and
//! prints text that is byte-identical wherever nothing changed.

pub mod errors;
pub mod get;
pub mod library;
pub mod module;
pub mod put;
pub mod skeleton;
pub mod typecheck;

pub use errors::LensError;
pub use get::get;
pub use library::{Autoload, LensLibrary};
pub use put::{create, put};
pub use skeleton::{Parsed, Skel, Skeleton};

use regex::Regex;
use std::fmt;

/// Regular expression used by lens primitives.
///
/// Matching is always anchored at the current input position; `matches`
/// checks a whole string, as needed to validate values on `put`.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    prefix: Regex,
    whole: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, LensError> {
        let compile = |anchored: String| {
            Regex::new(&anchored).map_err(|err| LensError::BadRegex {
                pattern: source.to_string(),
                message: err.to_string(),
            })
        };
        Ok(Self {
            source: source.to_string(),
            prefix: compile(format!("^(?:{source})"))?,
            whole: compile(format!("^(?:{source})$"))?,
        })
    }

    /// Pattern matching exactly `text`.
    pub fn literal(text: &str) -> Result<Self, LensError> {
        Self::new(&regex::escape(text))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Length of the match at the start of `text`, if any.
    pub fn match_prefix(&self, text: &str) -> Option<usize> {
        self.prefix.find(text).map(|m| m.end())
    }

    pub fn matches(&self, text: &str) -> bool {
        self.whole.is_match(text)
    }

    pub fn matches_empty(&self) -> bool {
        self.whole.is_match("")
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

#[derive(Debug, Clone)]
pub enum Lens {
    /// Consume matching text without putting it in the tree. `default` is
    /// printed for nodes that have no skeleton yet.
    Del { pattern: Pattern, default: String },
    /// Matching text becomes the value of the enclosing node.
    Store(Pattern),
    /// Matching text becomes the label of the enclosing node.
    Key(Pattern),
    /// Fixed label for the enclosing node.
    Label(String),
    /// Label the enclosing node with the next number of counter `name`.
    Seq(String),
    Concat(Vec<Lens>),
    /// Ordered choice: the first alternative that matches wins.
    Union(Vec<Lens>),
    Star(Box<Lens>),
    Plus(Box<Lens>),
    Maybe(Box<Lens>),
    /// Everything the body captures goes into one new child node.
    Subtree(Box<Lens>),
}

impl Lens {
    pub fn del(pattern: &str, default: impl Into<String>) -> Result<Lens, LensError> {
        Ok(Lens::Del {
            pattern: Pattern::new(pattern)?,
            default: default.into(),
        })
    }

    /// Exact text, deleted from the tree and reprinted verbatim.
    pub fn literal(text: &str) -> Result<Lens, LensError> {
        Ok(Lens::Del {
            pattern: Pattern::literal(text)?,
            default: text.to_string(),
        })
    }

    pub fn store(pattern: &str) -> Result<Lens, LensError> {
        Ok(Lens::Store(Pattern::new(pattern)?))
    }

    pub fn key(pattern: &str) -> Result<Lens, LensError> {
        Ok(Lens::Key(Pattern::new(pattern)?))
    }

    pub fn label(label: impl Into<String>) -> Lens {
        Lens::Label(label.into())
    }

    pub fn seq(counter: impl Into<String>) -> Lens {
        Lens::Seq(counter.into())
    }

    pub fn concat(parts: Vec<Lens>) -> Lens {
        Lens::Concat(parts)
    }

    pub fn union(alternatives: Vec<Lens>) -> Lens {
        Lens::Union(alternatives)
    }

    pub fn star(body: Lens) -> Lens {
        Lens::Star(Box::new(body))
    }

    pub fn plus(body: Lens) -> Lens {
        Lens::Plus(Box::new(body))
    }

    pub fn maybe(body: Lens) -> Lens {
        Lens::Maybe(Box::new(body))
    }

    pub fn subtree(body: Lens) -> Lens {
        Lens::Subtree(Box::new(body))
    }

    /// `subtree(label . body)`
    pub fn subtree_labeled(label: impl Into<String>, body: Lens) -> Lens {
        Lens::subtree(Lens::concat(vec![Lens::label(label), body]))
    }

    /// Can this lens match the empty string?
    pub fn is_nullable(&self) -> bool {
        match self {
            Lens::Del { pattern, .. } | Lens::Store(pattern) | Lens::Key(pattern) => {
                pattern.matches_empty()
            }
            Lens::Label(_) | Lens::Seq(_) | Lens::Star(_) | Lens::Maybe(_) => true,
            Lens::Concat(parts) => parts.iter().all(Lens::is_nullable),
            Lens::Union(alternatives) => alternatives.iter().any(Lens::is_nullable),
            Lens::Plus(body) | Lens::Subtree(body) => body.is_nullable(),
        }
    }
}
