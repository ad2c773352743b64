//! Path-addressed reads and writes on the tree.
//!
//! [`Store`] pairs the [`Tree`] with the session's variable bindings and
//! implements the query/mutate contract: single-node reads and writes fail
//! on ambiguous paths, `set` creates what is missing, `rm` removes whole
//! subtrees. Relative paths start at the node named by `/augeas/context`.

use crate::error::{Error, Result};
use crate::path::{Binding, CreateFailure, Evaluator, PathExpr, Resolution, Value, Variables};
use crate::tree::{valid_label, Node, NodeId, NodePath, Span, Tree};
use tracing::debug;

/// Where relative paths are evaluated when `/augeas/context` is unset.
pub const DEFAULT_CONTEXT: &str = "/files";

#[derive(Debug, Default)]
pub struct Store {
    tree: Tree,
    vars: Variables,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    /// Node that relative paths start from.
    pub fn context(&self) -> NodePath {
        let configured = self
            .tree
            .child_by_label(&NodePath::root(), "augeas")
            .and_then(|augeas| self.tree.child_by_label(&augeas, "context"))
            .and_then(|at| self.tree.node(&at))
            .and_then(|node| node.value())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_CONTEXT)
            .to_string();
        let Ok(expr) = PathExpr::compile_nodeset(&configured, &self.vars) else {
            return NodePath::root();
        };
        match self.evaluator(NodePath::root()).select(&expr).as_slice() {
            [only] => only.clone(),
            _ => NodePath::root(),
        }
    }

    fn evaluator(&self, context: NodePath) -> Evaluator<'_> {
        Evaluator::new(&self.tree, &self.vars).with_context(context)
    }

    fn compile(&self, path: &str) -> Result<PathExpr> {
        Ok(PathExpr::compile_nodeset(path, &self.vars)?)
    }

    /// Matching nodes in document order.
    pub fn select(&self, path: &str) -> Result<Vec<NodePath>> {
        let expr = self.compile(path)?;
        Ok(self.evaluator(self.context()).select(&expr))
    }

    /// The single node matching `path`, if any.
    fn single(&self, path: &str) -> Result<Option<NodePath>> {
        let mut found = self.select(path)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(Error::AmbiguousPath {
                path: path.to_string(),
                count,
            }),
        }
    }

    fn exactly_one(&self, path: &str) -> Result<NodePath> {
        self.single(path)?.ok_or_else(|| Error::NoMatch {
            path: path.to_string(),
        })
    }

    /// Value of the node at `path`. No match is `Ok(None)`, as is a
    /// matching node without a value.
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .single(path)?
            .and_then(|at| self.tree.node(&at))
            .and_then(|node| node.value().map(str::to_string)))
    }

    /// Does exactly one node match `path`?
    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.single(path)?.is_some())
    }

    /// Set the value of the node at `path`, creating it and any missing
    /// ancestors first.
    pub fn set(&mut self, path: &str, value: Option<&str>) -> Result<NodePath> {
        let at = self.find_or_create(path, &self.context())?;
        self.tree.set_value(&at, value.map(str::to_string));
        Ok(at)
    }

    /// Set the value of the node at `path` to none.
    pub fn clear(&mut self, path: &str) -> Result<NodePath> {
        self.set(path, None)
    }

    /// For every node matching `base`, set `sub` below it (or the node
    /// itself when `sub` is `None`). Returns how many nodes were set.
    pub fn set_many(&mut self, base: &str, sub: Option<&str>, value: Option<&str>) -> Result<usize> {
        let bases = self.ids(&self.select(base)?);
        let sub = sub.filter(|s| !s.trim().is_empty() && s.trim() != ".");
        let mut count = 0;
        for id in bases {
            let Some(at) = self.tree.locate(id) else {
                continue;
            };
            let targets = match sub {
                None => vec![at],
                Some(sub) => {
                    let expr = self.compile(sub)?;
                    let resolution = self.evaluator(at.clone()).resolve(&expr);
                    match resolution {
                        Ok(Resolution::Found(found)) => found,
                        Ok(Resolution::Missing { anchor, labels }) => {
                            check_labels(&labels)?;
                            vec![self.create_below(&anchor, &labels)?]
                        }
                        Err(failure) => return Err(create_error(sub, failure)),
                    }
                }
            };
            let ids = self.ids(&targets);
            for id in ids {
                if let Some(target) = self.tree.locate(id) {
                    self.tree.set_value(&target, value.map(str::to_string));
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Insert a new node labeled `label` right before or after the single
    /// node matching `path`.
    pub fn insert(&mut self, path: &str, label: &str, before: bool) -> Result<NodePath> {
        if !valid_label(label) {
            return Err(Error::InvalidLabel {
                label: label.to_string(),
            });
        }
        let at = self.exactly_one(path)?;
        let (Some(parent), Some(idx)) = (at.parent(), at.last_index()) else {
            return Err(Error::BadArgument("cannot insert a sibling of the root".to_string()));
        };
        let index = if before { idx } else { idx + 1 };
        self.tree
            .insert_child(&parent, index, Node::labeled(label))
            .ok_or_else(|| Error::BadArgument(format!("cannot insert next to '{path}'")))
    }

    /// Move the single node matching `src` to `dest`, which must not exist
    /// yet. Missing ancestors of `dest` are created; the moved node takes
    /// the last label of `dest`.
    pub fn mv(&mut self, src: &str, dest: &str) -> Result<NodePath> {
        let src_at = self.exactly_one(src)?;
        if src_at.is_root() {
            return Err(Error::BadArgument("cannot move the root".to_string()));
        }
        let expr = self.compile(dest)?;
        let resolution = self.evaluator(self.context()).resolve(&expr);
        let (anchor, labels) = match resolution {
            Ok(Resolution::Found(found)) => {
                if found.iter().any(|at| src_at.contains(at)) {
                    return Err(Error::InvalidMove {
                        src: src.to_string(),
                        dest: dest.to_string(),
                    });
                }
                return Err(match found.as_slice() {
                    [_] => Error::DestinationExists {
                        dest: dest.to_string(),
                    },
                    [] => Error::CannotCreate {
                        path: dest.to_string(),
                        reason: "expression selects nothing".to_string(),
                    },
                    many => Error::AmbiguousPath {
                        path: dest.to_string(),
                        count: many.len(),
                    },
                });
            }
            Ok(Resolution::Missing { anchor, labels }) => (anchor, labels),
            Err(failure) => return Err(create_error(dest, failure)),
        };
        if src_at.contains(&anchor) {
            return Err(Error::InvalidMove {
                src: src.to_string(),
                dest: dest.to_string(),
            });
        }
        let Some((last, parents)) = labels.split_last() else {
            return Err(Error::CannotCreate {
                path: dest.to_string(),
                reason: "nothing to create".to_string(),
            });
        };
        check_labels(&labels)?;

        let anchor_id = self.id_at(&anchor)?;
        let mut moved = self
            .tree
            .detach(&src_at)
            .ok_or_else(|| Error::NoMatch {
                path: src.to_string(),
            })?;
        let anchor = self.tree.locate(anchor_id).ok_or_else(|| Error::NoMatch {
            path: dest.to_string(),
        })?;
        let parent = self.create_below(&anchor, parents)?;
        moved.label = Some(last.clone());
        let at = self
            .tree
            .append_child(&parent, moved)
            .ok_or_else(|| Error::BadArgument(format!("cannot move to '{dest}'")))?;
        debug!(src, dest, "moved node");
        Ok(at)
    }

    /// Remove every node matching `path` with its subtree. Returns the
    /// number of nodes removed, descendants included.
    pub fn rm(&mut self, path: &str) -> Result<usize> {
        let found = self.select(path)?;
        let mut tops: Vec<NodePath> = Vec::new();
        for at in found {
            if at.is_root() {
                continue;
            }
            if !tops.iter().any(|top| top.contains(&at)) {
                tops.push(at);
            }
        }
        let mut count = 0;
        for at in tops.iter().rev() {
            if let Some(node) = self.tree.detach(at) {
                count += node.subtree_len();
            }
        }
        Ok(count)
    }

    /// Relabel every node matching `path`.
    pub fn rename(&mut self, path: &str, label: &str) -> Result<usize> {
        if !valid_label(label) {
            return Err(Error::InvalidLabel {
                label: label.to_string(),
            });
        }
        let found = self.select(path)?;
        for at in &found {
            self.tree.set_label(at, Some(label.to_string()));
        }
        Ok(found.len())
    }

    /// Canonical paths of the nodes matching `path`.
    pub fn matches(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .select(path)?
            .iter()
            .map(|at| self.tree.path_string(at))
            .collect())
    }

    /// Bind `$name` to the result of `expr`; `None` removes the binding.
    /// Returns the number of nodes bound, or zero for a value binding.
    pub fn define_variable(&mut self, name: &str, expr: Option<&str>) -> Result<usize> {
        check_variable_name(name)?;
        let Some(expr) = expr else {
            self.vars.remove(name);
            return Ok(0);
        };
        let compiled = PathExpr::compile(expr, &self.vars)?;
        let value = self.evaluator(self.context()).evaluate(&compiled);
        let (binding, count) = match value {
            Value::Nodes(nodes) => {
                let count = nodes.len();
                (Binding::Nodes(self.ids(&nodes)), count)
            }
            Value::Str(s) => (Binding::Value(s), 0),
            Value::Num(n) => (Binding::Value(n.to_string()), 0),
            Value::Bool(b) => (Binding::Value(b.to_string()), 0),
            Value::Regex(_) => {
                return Err(Error::BadArgument(format!(
                    "cannot bind ${name} to a regular expression"
                )))
            }
        };
        debug!(name, expr, count, "defined variable");
        self.vars.insert(name.to_string(), binding);
        Ok(count)
    }

    /// Bind `$name` to the nodes matching `expr`, creating a single node
    /// with `value` when nothing matches. Returns the number of nodes bound
    /// and whether a node was created.
    pub fn define_node(&mut self, name: &str, expr: &str, value: Option<&str>) -> Result<(usize, bool)> {
        check_variable_name(name)?;
        let found = self.select(expr)?;
        let (nodes, created) = if found.is_empty() {
            (vec![self.set(expr, value)?], true)
        } else {
            (found, false)
        };
        let count = nodes.len();
        let ids = self.ids(&nodes);
        self.vars.insert(name.to_string(), Binding::Nodes(ids));
        Ok((count, created))
    }

    pub fn clear_variable(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    /// Source location of the single node matching `path`.
    pub fn span(&self, path: &str) -> Result<Span> {
        let at = self.exactly_one(path)?;
        self.tree
            .node(&at)
            .and_then(|node| node.span.clone())
            .ok_or_else(|| Error::NoSpanInfo {
                path: self.tree.path_string(&at),
            })
    }

    /// `path = "value"` lines for every node matching `path` and all of
    /// their descendants.
    pub fn print(&self, path: &str) -> Result<String> {
        let mut out = String::new();
        let mut seen: Vec<NodePath> = Vec::new();
        for top in self.select(path)? {
            if seen.iter().any(|s| s.contains(&top)) {
                continue;
            }
            for at in self.tree.descendants(&top) {
                let Some(node) = self.tree.node(&at) else {
                    continue;
                };
                out.push_str(&self.tree.path_string(&at));
                if let Some(value) = node.value() {
                    out.push_str(&format!(" = {}", quote(value)));
                }
                out.push('\n');
            }
            seen.push(top);
        }
        Ok(out)
    }

    /// Resolve `path` to one node, creating it when nothing matches.
    fn find_or_create(&mut self, path: &str, context: &NodePath) -> Result<NodePath> {
        let expr = self.compile(path)?;
        let resolution = self.evaluator(context.clone()).resolve(&expr);
        match resolution {
            Ok(Resolution::Found(mut found)) => match found.len() {
                1 => Ok(found.remove(0)),
                0 => Err(Error::CannotCreate {
                    path: path.to_string(),
                    reason: "expression selects nothing".to_string(),
                }),
                count => Err(Error::AmbiguousPath {
                    path: path.to_string(),
                    count,
                }),
            },
            Ok(Resolution::Missing { anchor, labels }) => {
                check_labels(&labels)?;
                self.create_below(&anchor, &labels)
            }
            Err(failure) => Err(create_error(path, failure)),
        }
    }

    /// Append a chain of new nodes below `anchor`; returns the last one.
    fn create_below(&mut self, anchor: &NodePath, labels: &[String]) -> Result<NodePath> {
        let mut at = anchor.clone();
        for label in labels {
            at = self
                .tree
                .append_child(&at, Node::labeled(label.as_str()))
                .ok_or_else(|| Error::CannotCreate {
                    path: self.tree.path_string(anchor),
                    reason: format!("cannot add '{label}'"),
                })?;
        }
        Ok(at)
    }

    fn ids(&self, nodes: &[NodePath]) -> Vec<NodeId> {
        nodes
            .iter()
            .filter_map(|at| self.tree.node(at).map(Node::id))
            .collect()
    }

    fn id_at(&self, at: &NodePath) -> Result<NodeId> {
        self.tree
            .node(at)
            .map(Node::id)
            .ok_or_else(|| Error::NoMatch {
                path: self.tree.path_string(at),
            })
    }
}

fn create_error(path: &str, failure: CreateFailure) -> Error {
    match failure {
        CreateFailure::Ambiguous { count } => Error::AmbiguousPath {
            path: path.to_string(),
            count,
        },
        CreateFailure::NotCreatable { reason } => Error::CannotCreate {
            path: path.to_string(),
            reason,
        },
    }
}

fn check_labels(labels: &[String]) -> Result<()> {
    match labels.iter().find(|label| !valid_label(label)) {
        Some(label) => Err(Error::InvalidLabel {
            label: label.clone(),
        }),
        None => Ok(()),
    }
}

fn check_variable_name(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::BadArgument(format!("invalid variable name '{name}'")))
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
