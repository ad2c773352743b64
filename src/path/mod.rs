//! Path expressions: a navigational query language over the tree.
//!
//! Expressions are compiled once with [`PathExpr::parse`] and evaluated any
//! number of times by an [`Evaluator`]. Syntax errors surface at compile
//! time; evaluation itself does not fail.

pub mod ast;
pub mod errors;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{Axis, Expr, NameTest, PathStart, Predicate, Step, ValueKind};
pub use errors::PathError;
pub use eval::{CreateFailure, Evaluator, Resolution, Value};

use crate::tree::NodeId;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What a `$name` reference stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A node-set, held by stable id so that later edits do not invalidate it.
    Nodes(Vec<NodeId>),
    Value(String),
}

pub type Variables = BTreeMap<String, Binding>;

/// A compiled path expression.
#[derive(Debug, Clone)]
pub struct PathExpr {
    source: String,
    expr: Expr,
}

impl PathExpr {
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let expr = parser::Parser::new(input)?.parse()?;
        Ok(Self {
            source: input.to_string(),
            expr,
        })
    }

    /// Parse and resolve variable references against `vars`.
    pub fn compile(input: &str, vars: &Variables) -> Result<Self, PathError> {
        let compiled = Self::parse(input)?;
        compiled.kind(vars)?;
        Ok(compiled)
    }

    /// Like [`PathExpr::compile`], but the expression must produce a node-set.
    pub fn compile_nodeset(input: &str, vars: &Variables) -> Result<Self, PathError> {
        let compiled = Self::parse(input)?;
        if compiled.kind(vars)? != ValueKind::Nodes {
            return Err(PathError::NotANodeSet {
                input: input.to_string(),
            });
        }
        Ok(compiled)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn kind(&self, vars: &Variables) -> Result<ValueKind, PathError> {
        self.expr.kind(vars, &self.source)
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpr::parse(s)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_checks_variables() {
        let mut vars = Variables::new();
        assert!(matches!(
            PathExpr::compile("$missing/a", &vars),
            Err(PathError::UndefinedVariable { .. })
        ));
        vars.insert("v".into(), Binding::Value("x".into()));
        assert!(PathExpr::compile("$v", &vars).is_ok());
        assert!(matches!(
            PathExpr::compile_nodeset("$v", &vars),
            Err(PathError::NotANodeSet { .. })
        ));
        assert!(matches!(
            PathExpr::compile("$v/a", &vars),
            Err(PathError::NotANodeSet { .. })
        ));
    }

    #[test]
    fn literal_is_not_a_nodeset() {
        let vars = Variables::new();
        assert!(PathExpr::compile("'abc'", &vars).is_ok());
        assert!(PathExpr::compile_nodeset("'abc'", &vars).is_err());
    }
}
