use crate::path::ast::{
    compile_regex, Axis, BinaryOp, Expr, Function, LocationPath, NameTest, PathStart, Predicate,
    Step, ValueKind,
};
use crate::path::{Binding, PathExpr, Variables};
use crate::tree::{Node, NodeId, NodePath, Tree};
use regex::Regex;
use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};

/// Result of evaluating an expression.
#[derive(Debug, Clone)]
pub enum Value {
    Nodes(Vec<NodePath>),
    Str(String),
    Num(i64),
    Bool(bool),
    Regex(Regex),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0,
            Value::Bool(b) => *b,
            Value::Regex(_) => true,
        }
    }
}

/// Outcome of resolving a path for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Vec<NodePath>),
    /// Nothing matched; `labels` have to be created below `anchor`.
    Missing { anchor: NodePath, labels: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateFailure {
    Ambiguous { count: usize },
    NotCreatable { reason: String },
}

/// Context node, its position in the candidate list and the list length.
struct Focus<'p> {
    node: &'p NodePath,
    position: usize,
    last: usize,
}

pub struct Evaluator<'a> {
    tree: &'a Tree,
    vars: &'a Variables,
    context: NodePath,
    index: OnceCell<HashMap<NodeId, NodePath>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(tree: &'a Tree, vars: &'a Variables) -> Self {
        Self {
            tree,
            vars,
            context: NodePath::root(),
            index: OnceCell::new(),
        }
    }

    /// Node that relative expressions start from.
    pub fn with_context(mut self, context: NodePath) -> Self {
        self.context = context;
        self
    }

    /// Matching nodes in document order; empty when the expression does not
    /// produce a node-set.
    pub fn select(&self, expr: &PathExpr) -> Vec<NodePath> {
        match self.evaluate(expr) {
            Value::Nodes(nodes) => nodes,
            _ => Vec::new(),
        }
    }

    pub fn evaluate(&self, expr: &PathExpr) -> Value {
        let focus = Focus {
            node: &self.context,
            position: 1,
            last: 1,
        };
        self.eval(expr.expr(), &focus)
    }

    /// Resolve `expr` for a write: either the existing matches, or the
    /// single deepest existing node plus the labels to create under it.
    pub fn resolve(&self, expr: &PathExpr) -> Result<Resolution, CreateFailure> {
        let Expr::Path(path) = expr.expr() else {
            return Err(CreateFailure::NotCreatable {
                reason: "expression is not a path".to_string(),
            });
        };
        if let PathStart::Variable(name) = &path.start {
            if let Some(Binding::Value(_)) = self.vars.get(name) {
                return Err(CreateFailure::NotCreatable {
                    reason: format!("${name} is bound to a value"),
                });
            }
        }

        let mut set = self.start_set(path, &self.context);
        for (i, step) in path.steps.iter().enumerate() {
            let next = self.eval_step(&set, step);
            if !next.is_empty() {
                set = next;
                continue;
            }
            let labels = creatable_labels(&path.steps[i..])?;
            return match set.len() {
                1 => Ok(Resolution::Missing {
                    anchor: set.remove(0),
                    labels,
                }),
                0 => Err(CreateFailure::NotCreatable {
                    reason: "no existing node to create under".to_string(),
                }),
                count => Err(CreateFailure::Ambiguous { count }),
            };
        }
        Ok(Resolution::Found(set))
    }

    fn eval(&self, expr: &Expr, focus: &Focus<'_>) -> Value {
        match expr {
            Expr::Path(path) => self.eval_path_value(path, focus.node),
            Expr::Literal(text) => Value::Str(text.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Regex(re) => Value::Regex(re.clone()),
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, focus),
            Expr::Call { func, args } => self.eval_call(*func, args, focus),
        }
    }

    fn eval_path_value(&self, path: &LocationPath, from: &NodePath) -> Value {
        if let PathStart::Variable(name) = &path.start {
            if let Some(Binding::Value(value)) = self.vars.get(name) {
                return Value::Str(value.clone());
            }
        }
        Value::Nodes(self.eval_path(path, from))
    }

    fn eval_path(&self, path: &LocationPath, from: &NodePath) -> Vec<NodePath> {
        let mut set = self.start_set(path, from);
        for step in &path.steps {
            if set.is_empty() {
                break;
            }
            set = self.eval_step(&set, step);
        }
        set
    }

    fn start_set(&self, path: &LocationPath, from: &NodePath) -> Vec<NodePath> {
        match &path.start {
            PathStart::Root => vec![NodePath::root()],
            PathStart::Context => vec![from.clone()],
            PathStart::Variable(name) => self.bound_nodes(name),
        }
    }

    fn bound_nodes(&self, name: &str) -> Vec<NodePath> {
        match self.vars.get(name) {
            Some(Binding::Nodes(ids)) => {
                let index = self.index.get_or_init(|| build_index(self.tree));
                let mut nodes: Vec<NodePath> =
                    ids.iter().filter_map(|id| index.get(id).cloned()).collect();
                nodes.sort();
                nodes.dedup();
                nodes
            }
            _ => Vec::new(),
        }
    }

    fn eval_step(&self, input: &[NodePath], step: &Step) -> Vec<NodePath> {
        let mut out = BTreeSet::new();
        for at in input {
            let mut candidates: Vec<NodePath> = self
                .axis(at, step.axis)
                .into_iter()
                .filter(|candidate| self.name_matches(candidate, &step.name))
                .collect();
            for pred in &step.predicates {
                candidates = self.filter(candidates, pred);
            }
            out.extend(candidates);
        }
        out.into_iter().collect()
    }

    fn filter(&self, candidates: Vec<NodePath>, pred: &Predicate) -> Vec<NodePath> {
        let expr = match pred {
            Predicate::Any => return candidates,
            Predicate::Expr(expr) => expr,
        };
        let last = candidates.len();
        candidates
            .into_iter()
            .enumerate()
            .filter(|(i, at)| {
                let focus = Focus {
                    node: at,
                    position: i + 1,
                    last,
                };
                match self.eval(expr, &focus) {
                    Value::Num(n) => n == (i + 1) as i64,
                    other => other.truthy(),
                }
            })
            .map(|(_, at)| at)
            .collect()
    }

    /// Nodes along `axis` from `at`, nearest first.
    fn axis(&self, at: &NodePath, axis: Axis) -> Vec<NodePath> {
        let Some(node) = self.tree.node(at) else {
            return Vec::new();
        };
        match axis {
            Axis::Child => (0..node.children.len()).map(|i| at.child(i)).collect(),
            Axis::Descendant => self.tree.descendants(at).into_iter().skip(1).collect(),
            Axis::DescendantOrSelf => self.tree.descendants(at),
            Axis::SelfNode => vec![at.clone()],
            Axis::Parent => at.parent().into_iter().collect(),
            Axis::Ancestor => {
                let mut out = Vec::new();
                let mut current = at.parent();
                while let Some(parent) = current {
                    current = parent.parent();
                    out.push(parent);
                }
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                let (Some(parent), Some(idx)) = (at.parent(), at.last_index()) else {
                    return Vec::new();
                };
                let count = self
                    .tree
                    .node(&parent)
                    .map(|n| n.children.len())
                    .unwrap_or(0);
                if axis == Axis::FollowingSibling {
                    (idx + 1..count).map(|i| parent.child(i)).collect()
                } else {
                    (0..idx).rev().map(|i| parent.child(i)).collect()
                }
            }
        }
    }

    fn name_matches(&self, at: &NodePath, test: &NameTest) -> bool {
        match test {
            NameTest::Any => true,
            NameTest::Label(label) => self
                .tree
                .node(at)
                .is_some_and(|node| node.label() == Some(label.as_str())),
        }
    }

    fn eval_binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr, focus: &Focus<'_>) -> Value {
        match op {
            BinaryOp::Or => {
                Value::Bool(self.eval(lhs, focus).truthy() || self.eval(rhs, focus).truthy())
            }
            BinaryOp::And => {
                Value::Bool(self.eval(lhs, focus).truthy() && self.eval(rhs, focus).truthy())
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                let left = self.eval(lhs, focus);
                let right = self.eval(rhs, focus);
                Value::Bool(self.compare(&left, &right, op == BinaryOp::Eq))
            }
            BinaryOp::Matches => {
                let left = self.eval(lhs, focus);
                let right = self.eval(rhs, focus);
                Value::Bool(self.regex_match(&left, &right))
            }
            BinaryOp::Add | BinaryOp::Sub => {
                let left = self.number(&self.eval(lhs, focus));
                let right = self.number(&self.eval(rhs, focus));
                match (left, right) {
                    (Some(a), Some(b)) if op == BinaryOp::Add => Value::Num(a.saturating_add(b)),
                    (Some(a), Some(b)) => Value::Num(a.saturating_sub(b)),
                    _ => Value::Num(0),
                }
            }
        }
    }

    fn eval_call(&self, func: Function, args: &[Expr], focus: &Focus<'_>) -> Value {
        match func {
            Function::Last => Value::Num(focus.last as i64),
            Function::Position => Value::Num(focus.position as i64),
            Function::Count => match args.first() {
                Some(Expr::Path(path)) => Value::Num(self.eval_path(path, focus.node).len() as i64),
                _ => Value::Num(0),
            },
            Function::Label => {
                let target = match args.first() {
                    None => Some(focus.node.clone()),
                    Some(arg) => match self.eval(arg, focus) {
                        Value::Nodes(nodes) => nodes.into_iter().next(),
                        _ => None,
                    },
                };
                let label = target
                    .and_then(|at| self.tree.node(&at).and_then(|n| n.label.clone()))
                    .unwrap_or_default();
                Value::Str(label)
            }
            Function::Not => Value::Bool(
                !args
                    .first()
                    .map(|arg| self.eval(arg, focus).truthy())
                    .unwrap_or(false),
            ),
        }
    }

    /// Existential comparison: true if any pair of string forms compares as
    /// requested. Nodes without a value take no part.
    fn compare(&self, left: &Value, right: &Value, equal: bool) -> bool {
        if let (Value::Bool(_), _) | (_, Value::Bool(_)) = (left, right) {
            return (left.truthy() == right.truthy()) == equal;
        }
        let lhs = self.strings(left);
        let rhs = self.strings(right);
        lhs.iter().any(|a| rhs.iter().any(|b| (a == b) == equal))
    }

    fn regex_match(&self, left: &Value, right: &Value) -> bool {
        let regex = match right {
            Value::Regex(re) => re.clone(),
            other => match self.strings(other).first() {
                Some(pattern) => match compile_regex(pattern, false) {
                    Ok(re) => re,
                    Err(_) => return false,
                },
                None => return false,
            },
        };
        self.strings(left).iter().any(|s| regex.is_match(s))
    }

    fn strings(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Nodes(nodes) => nodes
                .iter()
                .filter_map(|at| self.tree.node(at).and_then(|n| n.value.clone()))
                .collect(),
            Value::Str(s) => vec![s.clone()],
            Value::Num(n) => vec![n.to_string()],
            Value::Bool(b) => vec![b.to_string()],
            Value::Regex(re) => vec![re.as_str().to_string()],
        }
    }

    fn number(&self, value: &Value) -> Option<i64> {
        match value {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Regex(_) => None,
            other => self
                .strings(other)
                .first()
                .and_then(|s| s.trim().parse().ok()),
        }
    }
}

fn creatable_labels(steps: &[Step]) -> Result<Vec<String>, CreateFailure> {
    steps
        .iter()
        .map(|step| {
            if step.axis != Axis::Child {
                return Err(CreateFailure::NotCreatable {
                    reason: "only child steps can be created".to_string(),
                });
            }
            let NameTest::Label(label) = &step.name else {
                return Err(CreateFailure::NotCreatable {
                    reason: "cannot create a node for '*'".to_string(),
                });
            };
            for pred in &step.predicates {
                match pred {
                    Predicate::Any => {}
                    Predicate::Expr(expr) if expr.static_kind() == Some(ValueKind::Number) => {}
                    Predicate::Expr(_) => {
                        return Err(CreateFailure::NotCreatable {
                            reason: format!("cannot create '{label}' from a non-positional predicate"),
                        })
                    }
                }
            }
            Ok(label.clone())
        })
        .collect()
}

fn build_index(tree: &Tree) -> HashMap<NodeId, NodePath> {
    fn walk(node: &Node, at: NodePath, index: &mut HashMap<NodeId, NodePath>) {
        for (idx, child) in node.children.iter().enumerate() {
            walk(child, at.child(idx), index);
        }
        index.insert(node.id(), at);
    }
    let mut index = HashMap::new();
    walk(tree.root(), NodePath::root(), &mut index);
    index
}
