use crate::tree::{Node, NodeId};
use std::collections::HashMap;

/// What `get` remembers about the text so that `put` can reproduce it.
///
/// The shape mirrors the lens that produced it. Text that went into the
/// tree is recorded as [`Skel::Token`]; the tree supplies it again on put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skel {
    /// Text consumed by a `del`.
    Text(String),
    /// A `del` that matched nothing at the end of the text. Its default is
    /// printed only if something is written after it.
    AtEnd,
    Token,
    Concat(Vec<Skel>),
    /// Index of the union alternative that matched.
    Union(usize, Box<Skel>),
    /// One entry per iteration of a star, plus or maybe.
    Repeat(Vec<Skel>),
    /// A subtree; its own skeleton is stored under the node id.
    Subtree(NodeId),
}

impl Skel {
    /// Ids of the subtrees created directly by this skeleton, not counting
    /// subtrees nested inside them.
    pub fn subtree_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_subtrees(&mut out);
        out
    }

    fn renumber(&mut self, ids: &HashMap<NodeId, NodeId>) {
        match self {
            Skel::Subtree(id) => {
                if let Some(new) = ids.get(id) {
                    *id = *new;
                }
            }
            Skel::Concat(items) | Skel::Repeat(items) => {
                for item in items {
                    item.renumber(ids);
                }
            }
            Skel::Union(_, inner) => inner.renumber(ids),
            Skel::Text(_) | Skel::AtEnd | Skel::Token => {}
        }
    }

    fn collect_subtrees(&self, out: &mut Vec<NodeId>) {
        match self {
            Skel::Subtree(id) => out.push(*id),
            Skel::Concat(items) | Skel::Repeat(items) => {
                for item in items {
                    item.collect_subtrees(out);
                }
            }
            Skel::Union(_, inner) => inner.collect_subtrees(out),
            Skel::Text(_) | Skel::AtEnd | Skel::Token => {}
        }
    }
}

/// Skeleton of one parsed file: the top-level skeleton plus the skeleton
/// of each subtree, keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    pub top: Option<Skel>,
    pub nodes: HashMap<NodeId, Skel>,
}

impl Skeleton {
    /// Follow the nodes to the ids they were given in a tree. Entries for
    /// nodes missing from `ids` are dropped.
    pub fn renumber(&mut self, ids: &HashMap<NodeId, NodeId>) {
        if let Some(top) = &mut self.top {
            top.renumber(ids);
        }
        self.nodes = std::mem::take(&mut self.nodes)
            .into_iter()
            .filter_map(|(id, mut skel)| {
                skel.renumber(ids);
                ids.get(&id).map(|new| (*new, skel))
            })
            .collect();
    }
}

/// Output of `get`.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub nodes: Vec<Node>,
    pub skeleton: Skeleton,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_ids_stop_at_first_subtree() {
        let a = NodeId::from_raw(1);
        let b = NodeId::from_raw(2);
        let skel = Skel::Concat(vec![
            Skel::Text("#".into()),
            Skel::Union(1, Box::new(Skel::Subtree(a))),
            Skel::Repeat(vec![Skel::Subtree(b), Skel::Token]),
        ]);
        assert_eq!(skel.subtree_ids(), vec![a, b]);
        assert!(Skel::Text("x".into()).subtree_ids().is_empty());
    }

    #[test]
    fn renumber_follows_new_ids() {
        let old = NodeId::from_raw(1);
        let new = NodeId::from_raw(40);
        let mut skeleton = Skeleton {
            top: Some(Skel::Repeat(vec![Skel::Subtree(old)])),
            nodes: HashMap::from([(old, Skel::Token), (NodeId::from_raw(2), Skel::Token)]),
        };
        skeleton.renumber(&HashMap::from([(old, new)]));
        assert_eq!(skeleton.top, Some(Skel::Repeat(vec![Skel::Subtree(new)])));
        assert_eq!(skeleton.nodes.len(), 1);
        assert_eq!(skeleton.nodes.get(&new), Some(&Skel::Token));
    }
}
