use crate::path::errors::PathError;
use crate::path::{Binding, Variables};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    pub fn from_name(name: &str) -> Option<Axis> {
        let axis = match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfNode,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        };
        Some(axis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Label(String),
    Any,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// `[*]`: every position.
    Any,
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub name: NameTest,
    pub predicates: Vec<Predicate>,
}

impl Step {
    pub fn new(axis: Axis, name: NameTest) -> Self {
        Self {
            axis,
            name,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStart {
    Root,
    Context,
    Variable(String),
}

#[derive(Debug, Clone)]
pub struct LocationPath {
    pub start: PathStart,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Matches,
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Last,
    Position,
    Count,
    Label,
    Not,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        let func = match name {
            "last" => Function::Last,
            "position" => Function::Position,
            "count" => Function::Count,
            "label" => Function::Label,
            "not" => Function::Not,
            _ => return None,
        };
        Some(func)
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Path(LocationPath),
    Literal(String),
    Number(i64),
    Regex(Regex),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

/// Static result type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nodes,
    String,
    Number,
    Boolean,
    Regex,
}

impl Expr {
    /// Type of the expression under `vars`; fails on unbound variables and
    /// on steps applied to a value variable.
    pub fn kind(&self, vars: &Variables, source: &str) -> Result<ValueKind, PathError> {
        match self {
            Expr::Path(path) => {
                for step in &path.steps {
                    for pred in &step.predicates {
                        if let Predicate::Expr(expr) = pred {
                            expr.kind(vars, source)?;
                        }
                    }
                }
                match &path.start {
                    PathStart::Variable(name) => match vars.get(name) {
                        None => Err(PathError::UndefinedVariable { name: name.clone() }),
                        Some(Binding::Value(_)) if path.steps.is_empty() => Ok(ValueKind::String),
                        Some(Binding::Value(_)) => Err(PathError::NotANodeSet {
                            input: source.to_string(),
                        }),
                        Some(Binding::Nodes(_)) => Ok(ValueKind::Nodes),
                    },
                    _ => Ok(ValueKind::Nodes),
                }
            }
            Expr::Literal(_) => Ok(ValueKind::String),
            Expr::Number(_) => Ok(ValueKind::Number),
            Expr::Regex(_) => Ok(ValueKind::Regex),
            Expr::Binary { op, lhs, rhs } => {
                lhs.kind(vars, source)?;
                rhs.kind(vars, source)?;
                Ok(match op {
                    BinaryOp::Add | BinaryOp::Sub => ValueKind::Number,
                    _ => ValueKind::Boolean,
                })
            }
            Expr::Call { func, args } => {
                for arg in args {
                    arg.kind(vars, source)?;
                }
                Ok(match func {
                    Function::Last | Function::Position | Function::Count => ValueKind::Number,
                    Function::Label => ValueKind::String,
                    Function::Not => ValueKind::Boolean,
                })
            }
        }
    }

    /// Kind without variable lookups; `None` when it depends on a binding.
    pub fn static_kind(&self) -> Option<ValueKind> {
        match self {
            Expr::Path(path) => match path.start {
                PathStart::Variable(_) => None,
                _ => Some(ValueKind::Nodes),
            },
            Expr::Literal(_) => Some(ValueKind::String),
            Expr::Number(_) => Some(ValueKind::Number),
            Expr::Regex(_) => Some(ValueKind::Regex),
            Expr::Binary { op, .. } => Some(match op {
                BinaryOp::Add | BinaryOp::Sub => ValueKind::Number,
                _ => ValueKind::Boolean,
            }),
            Expr::Call { func, .. } => Some(match func {
                Function::Last | Function::Position | Function::Count => ValueKind::Number,
                Function::Label => ValueKind::String,
                Function::Not => ValueKind::Boolean,
            }),
        }
    }
}

/// Compile a pattern so that it has to match a whole string.
pub fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, PathError> {
    let flags = if case_insensitive { "(?i)" } else { "" };
    Regex::new(&format!("^{flags}(?:{pattern})$")).map_err(|err| PathError::InvalidRegex {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}
