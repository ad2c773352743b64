use crate::tree::span::Span;

/// Stable identity of a node.
///
/// Positions shift when siblings are inserted or removed; the id does not.
/// Variable bindings and lens skeletons refer to nodes through it. Ids are
/// handed out by the [`Tree`](crate::tree::Tree) a node is inserted into,
/// or by the parser for a parse result; a node built by hand has none yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) const UNASSIGNED: NodeId = NodeId(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        NodeId(raw)
    }

    pub fn is_assigned(&self) -> bool {
        *self != NodeId::UNASSIGNED
    }
}

/// A labeled, ordered tree node.
///
/// Each node is owned by its parent. There are no parent pointers; upward
/// navigation is computed from a [`NodePath`]. `clone` keeps ids, so a
/// clone still lines up with a lens skeleton; use [`Node::deep_copy`] for a
/// node that goes back into the tree.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    pub label: Option<String>,
    pub value: Option<String>,
    pub children: Vec<Node>,
    pub span: Option<Span>,
    pub(crate) dirty: bool,
}

impl Node {
    pub fn new(label: Option<String>, value: Option<String>) -> Self {
        Self {
            id: NodeId::UNASSIGNED,
            label,
            value,
            children: Vec::new(),
            span: None,
            dirty: false,
        }
    }

    pub fn labeled(label: impl Into<String>) -> Self {
        Self::new(Some(label.into()), None)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Copy of this subtree without ids or span information. The tree it
    /// is inserted into assigns new ids.
    pub fn deep_copy(&self) -> Node {
        Node {
            id: NodeId::UNASSIGNED,
            label: self.label.clone(),
            value: self.value.clone(),
            children: self.children.iter().map(Node::deep_copy).collect(),
            span: None,
            dirty: true,
        }
    }

    pub fn child_by_label(&self, label: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.label() == Some(label))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Node::subtree_len).sum::<usize>()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
        for child in &mut self.children {
            child.clear_dirty();
        }
    }

    pub(crate) fn find_path(&self, id: NodeId, prefix: &mut Vec<usize>) -> bool {
        if self.id == id {
            return true;
        }
        for (idx, child) in self.children.iter().enumerate() {
            prefix.push(idx);
            if child.find_path(id, prefix) {
                return true;
            }
            prefix.pop();
        }
        false
    }
}

/// Structural equality: label, value and children. Ids, spans and dirty
/// flags are bookkeeping and do not take part.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.value == other.value && self.children == other.children
    }
}

impl Eq for Node {}

/// Position of a node as child indices from the root.
///
/// Lexicographic order of positions is document (pre-order) order, so a
/// sorted set of positions is a node-set in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    pub fn from_indices(indices: Vec<usize>) -> Self {
        NodePath(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, index: usize) -> NodePath {
        let mut indices = self.0.clone();
        indices.push(index);
        NodePath(indices)
    }

    /// Index of this node among its siblings.
    pub fn last_index(&self) -> Option<usize> {
        self.0.last().copied()
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &NodePath) -> bool {
        other.0.starts_with(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_ids() {
        let mut a = Node::labeled("a");
        let b = Node::labeled("a");
        assert!(!a.id().is_assigned());
        a.set_id(NodeId::from_raw(7));
        assert_ne!(a.id(), b.id());
        assert_eq!(a, b);
    }

    #[test]
    fn node_paths_sort_in_document_order() {
        let mut paths = vec![
            NodePath::from_indices(vec![1]),
            NodePath::from_indices(vec![0, 2]),
            NodePath::from_indices(vec![0]),
            NodePath::root(),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                NodePath::root(),
                NodePath::from_indices(vec![0]),
                NodePath::from_indices(vec![0, 2]),
                NodePath::from_indices(vec![1]),
            ]
        );
    }

    #[test]
    fn contains_is_prefix_relation() {
        let a = NodePath::from_indices(vec![0, 1]);
        assert!(a.contains(&a));
        assert!(a.contains(&a.child(3)));
        assert!(!a.child(3).contains(&a));
        assert!(NodePath::root().contains(&a));
    }

    #[test]
    fn deep_copy_drops_ids() {
        let mut original =
            Node::labeled("a").with_children(vec![Node::labeled("b").with_value("1")]);
        original.set_id(NodeId::from_raw(1));
        original.children[0].set_id(NodeId::from_raw(2));
        let copy = original.deep_copy();
        assert_eq!(original, copy);
        assert!(!copy.id().is_assigned());
        assert!(!copy.children[0].id().is_assigned());
        assert!(copy.is_dirty());
    }
}
