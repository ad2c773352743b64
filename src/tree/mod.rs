//! The in-memory document: one root, ordered labeled children.
//!
//! [`Tree`] offers positional primitives only. Path-based queries and the
//! get/set/move contract live in [`crate::store`].

pub mod node;
pub mod span;

pub use node::{Node, NodeId, NodePath};
pub use span::{line_col, Span, TextRange};

use std::collections::HashMap;

/// Characters that must be backslash-escaped when a label is written into
/// a path expression.
const LABEL_SPECIALS: &[char] = &[
    '/', '\\', '[', ']', '(', ')', '=', '!', ',', '|', '\'', '"', '$', '*', '+', '<', '>', '~',
];

/// Every node in a tree has an id unique within that tree. Ids come from
/// the tree's own counter.
#[derive(Debug)]
pub struct Tree {
    root: Node,
    next_id: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let mut root = Node::new(None, None);
        root.set_id(NodeId::from_raw(1));
        Self { root, next_id: 2 }
    }

    fn allocate(&mut self) -> NodeId {
        let id = NodeId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    /// Give every node of `node` that has no id yet one from this tree.
    fn assign_ids(&mut self, node: &mut Node) {
        if !node.id().is_assigned() {
            let id = self.allocate();
            node.set_id(id);
        }
        for child in &mut node.children {
            self.assign_ids(child);
        }
    }

    /// Give every node of `node` a new id, recording old to new.
    fn renumber(&mut self, node: &mut Node, ids: &mut HashMap<NodeId, NodeId>) {
        let id = self.allocate();
        if node.id().is_assigned() {
            ids.insert(node.id(), id);
        }
        node.set_id(id);
        for child in &mut node.children {
            self.renumber(child, ids);
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn node(&self, at: &NodePath) -> Option<&Node> {
        let mut node = &self.root;
        for &idx in at.indices() {
            node = node.children.get(idx)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, at: &NodePath) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for &idx in at.indices() {
            node = node.children.get_mut(idx)?;
        }
        Some(node)
    }

    /// Current position of the node with `id`, if it is still in the tree.
    pub fn locate(&self, id: NodeId) -> Option<NodePath> {
        let mut indices = Vec::new();
        if self.root.find_path(id, &mut indices) {
            Some(NodePath::from_indices(indices))
        } else {
            None
        }
    }

    /// Mark `at` and every ancestor as modified.
    pub fn mark_dirty(&mut self, at: &NodePath) {
        let mut node = &mut self.root;
        node.dirty = true;
        for &idx in at.indices() {
            match node.children.get_mut(idx) {
                Some(child) => {
                    child.dirty = true;
                    node = child;
                }
                None => return,
            }
        }
    }

    pub fn clear_dirty(&mut self, at: &NodePath) {
        if let Some(node) = self.node_mut(at) {
            node.clear_dirty();
        }
    }

    /// Set the value of the node at `at`; the node is only marked dirty when
    /// the value actually changes.
    pub fn set_value(&mut self, at: &NodePath, value: Option<String>) -> bool {
        let Some(node) = self.node_mut(at) else {
            return false;
        };
        if node.value == value {
            return true;
        }
        node.value = value;
        self.mark_dirty(at);
        true
    }

    pub fn set_label(&mut self, at: &NodePath, label: Option<String>) -> bool {
        let Some(node) = self.node_mut(at) else {
            return false;
        };
        if node.label == label {
            return true;
        }
        node.label = label;
        self.mark_dirty(at);
        true
    }

    /// Insert `node` as child `index` of `parent` (clamped to the child
    /// count) and return its position.
    pub fn insert_child(&mut self, parent: &NodePath, index: usize, mut node: Node) -> Option<NodePath> {
        self.node(parent)?;
        node.dirty = true;
        self.assign_ids(&mut node);
        let target = self.node_mut(parent)?;
        let index = index.min(target.children.len());
        target.children.insert(index, node);
        let at = parent.child(index);
        self.mark_dirty(&at);
        Some(at)
    }

    pub fn append_child(&mut self, parent: &NodePath, node: Node) -> Option<NodePath> {
        let len = self.node(parent)?.children.len();
        self.insert_child(parent, len, node)
    }

    /// Remove and return the subtree at `at`. The root cannot be detached.
    pub fn detach(&mut self, at: &NodePath) -> Option<Node> {
        let parent = at.parent()?;
        let idx = at.last_index()?;
        let target = self.node_mut(&parent)?;
        if idx >= target.children.len() {
            return None;
        }
        let node = target.children.remove(idx);
        self.mark_dirty(&parent);
        Some(node)
    }

    /// Follow `labels` from `from`, creating missing nodes, without marking
    /// anything dirty. Used for bookkeeping subtrees and file grafting.
    pub fn ensure_path(&mut self, from: &NodePath, labels: &[&str]) -> Option<NodePath> {
        let mut at = from.clone();
        for label in labels {
            at = match self.child_by_label(&at, label) {
                Some(child) => child,
                None => self.attach(&at, Node::labeled(*label))?,
            };
        }
        Some(at)
    }

    /// Append `node` under `parent` without marking anything dirty.
    pub fn attach(&mut self, parent: &NodePath, mut node: Node) -> Option<NodePath> {
        self.node(parent)?;
        self.assign_ids(&mut node);
        let target = self.node_mut(parent)?;
        target.children.push(node);
        Some(parent.child(target.children.len() - 1))
    }

    /// Replace the children of `at` with a parse result, without marking
    /// anything dirty. The nodes get ids from this tree; the returned map
    /// takes each parse-local id to its new id.
    pub fn graft(&mut self, at: &NodePath, mut nodes: Vec<Node>) -> Option<HashMap<NodeId, NodeId>> {
        self.node(at)?;
        let mut ids = HashMap::new();
        for node in &mut nodes {
            self.renumber(node, &mut ids);
        }
        self.node_mut(at)?.children = nodes;
        Some(ids)
    }

    /// Position of the first child of `parent` labeled `label`.
    pub fn child_by_label(&self, parent: &NodePath, label: &str) -> Option<NodePath> {
        let node = self.node(parent)?;
        node.children
            .iter()
            .position(|c| c.label() == Some(label))
            .map(|idx| parent.child(idx))
    }

    /// Canonical path expression naming exactly the node at `at`.
    ///
    /// Labels shared by several siblings get a `[n]` suffix; unlabeled
    /// nodes are addressed as `*[n]` by their overall position.
    pub fn path_string(&self, at: &NodePath) -> String {
        if at.is_root() {
            return "/".to_string();
        }
        let mut out = String::new();
        let mut node = &self.root;
        for &idx in at.indices() {
            let Some(child) = node.children.get(idx) else {
                break;
            };
            out.push('/');
            match child.label() {
                Some(label) => {
                    out.push_str(&escape_label(label));
                    let same: Vec<usize> = node
                        .children
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.label() == Some(label))
                        .map(|(i, _)| i)
                        .collect();
                    if same.len() > 1 {
                        if let Some(pos) = same.iter().position(|&i| i == idx) {
                            out.push_str(&format!("[{}]", pos + 1));
                        }
                    }
                }
                None => out.push_str(&format!("*[{}]", idx + 1)),
            }
            node = child;
        }
        out
    }

    /// Pre-order positions of every node under `at`, `at` included.
    pub fn descendants(&self, at: &NodePath) -> Vec<NodePath> {
        let mut out = Vec::new();
        if let Some(node) = self.node(at) {
            collect(node, at.clone(), &mut out);
        }
        out
    }
}

fn collect(node: &Node, at: NodePath, out: &mut Vec<NodePath>) {
    out.push(at.clone());
    for (idx, child) in node.children.iter().enumerate() {
        collect(child, at.child(idx), out);
    }
}

/// Escape a label so the path parser reads it back as a single name.
pub fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for (i, ch) in label.chars().enumerate() {
        let leading_special = i == 0 && (ch == '-' || ch == '.');
        if LABEL_SPECIALS.contains(&ch) || ch.is_whitespace() || leading_special {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Is `label` acceptable for a node created through the public API?
pub fn valid_label(label: &str) -> bool {
    !label.is_empty() && !label.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        let mut tree = Tree::new();
        let root = NodePath::root();
        let x = tree.append_child(&root, Node::labeled("x")).unwrap();
        tree.append_child(&x, Node::labeled("y").with_value("1")).unwrap();
        tree.append_child(&x, Node::labeled("y").with_value("2")).unwrap();
        tree.append_child(&x, Node::new(None, Some("anon".into()))).unwrap();
        tree
    }

    #[test]
    fn path_string_disambiguates_repeated_labels() {
        let tree = sample();
        let x = NodePath::from_indices(vec![0]);
        assert_eq!(tree.path_string(&x), "/x");
        assert_eq!(tree.path_string(&x.child(0)), "/x/y[1]");
        assert_eq!(tree.path_string(&x.child(1)), "/x/y[2]");
        assert_eq!(tree.path_string(&x.child(2)), "/x/*[3]");
        assert_eq!(tree.path_string(&NodePath::root()), "/");
    }

    #[test]
    fn escape_label_protects_specials() {
        assert_eq!(escape_label("a b"), "a\\ b");
        assert_eq!(escape_label("x/y"), "x\\/y");
        assert_eq!(escape_label("#comment"), "#comment");
        assert_eq!(escape_label("opt-level"), "opt-level");
        assert_eq!(escape_label(".bashrc"), "\\.bashrc");
    }

    #[test]
    fn descendants_are_pre_order() {
        let tree = sample();
        let all = tree.descendants(&NodePath::root());
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn set_value_marks_ancestors_dirty_only_on_change() {
        let mut tree = sample();
        tree.clear_dirty(&NodePath::root());
        let y = NodePath::from_indices(vec![0, 0]);
        tree.set_value(&y, Some("1".into()));
        assert!(!tree.root().is_dirty());
        tree.set_value(&y, Some("changed".into()));
        assert!(tree.root().is_dirty());
        assert!(tree.node(&NodePath::from_indices(vec![0])).unwrap().is_dirty());
        assert!(!tree.node(&NodePath::from_indices(vec![0, 1])).unwrap().is_dirty());
    }

    #[test]
    fn locate_follows_moves() {
        let mut tree = sample();
        let id = tree.node(&NodePath::from_indices(vec![0, 1])).unwrap().id();
        tree.detach(&NodePath::from_indices(vec![0, 0]));
        assert_eq!(tree.locate(id), Some(NodePath::from_indices(vec![0, 0])));
    }

    #[test]
    fn ensure_path_reuses_existing_nodes() {
        let mut tree = sample();
        let at = tree.ensure_path(&NodePath::root(), &["x", "z"]).unwrap();
        assert_eq!(at, NodePath::from_indices(vec![0, 3]));
        let again = tree.ensure_path(&NodePath::root(), &["x", "z"]).unwrap();
        assert_eq!(at, again);
    }

    #[test]
    fn ids_are_unique_within_a_tree() {
        let tree = sample();
        let mut ids: Vec<_> = tree
            .descendants(&NodePath::root())
            .iter()
            .map(|at| tree.node(at).unwrap().id())
            .collect();
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
        assert!(ids.iter().all(NodeId::is_assigned));
    }

    #[test]
    fn trees_number_nodes_independently() {
        let a = sample();
        let b = sample();
        let first = NodePath::from_indices(vec![0]);
        assert_eq!(a.node(&first).unwrap().id(), b.node(&first).unwrap().id());
    }

    #[test]
    fn moved_node_keeps_its_id() {
        let mut tree = sample();
        let y = NodePath::from_indices(vec![0, 1]);
        let id = tree.node(&y).unwrap().id();
        let node = tree.detach(&y).unwrap();
        let at = tree.append_child(&NodePath::root(), node).unwrap();
        assert_eq!(tree.node(&at).unwrap().id(), id);
        assert_eq!(tree.locate(id), Some(at));
    }

    #[test]
    fn graft_renumbers_parse_results() {
        let mut tree = sample();
        let mut parsed = Node::labeled("k").with_value("v");
        parsed.set_id(NodeId::from_raw(1));
        let at = tree.ensure_path(&NodePath::root(), &["file"]).unwrap();
        tree.clear_dirty(&NodePath::root());

        let ids = tree.graft(&at, vec![parsed]).unwrap();
        let new = ids[&NodeId::from_raw(1)];
        assert_ne!(new, tree.root().id());
        assert_eq!(tree.locate(new), Some(at.child(0)));
        assert!(!tree.root().is_dirty());
    }
}
