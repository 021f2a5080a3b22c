use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::common::{MutexError, NodeId};

/// The static spanning tree the privilege moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

/// Edges of figure 7 in Raymond's paper, the tree every scenario runs on.
pub const CANONICAL_EDGES: [(u32, u32); 9] = [
    (1, 2),
    (1, 3),
    (1, 4),
    (2, 5),
    (2, 6),
    (3, 7),
    (3, 8),
    (4, 9),
    (4, 10),
];

impl Tree {
    /// Builds a tree from undirected edges, rejecting anything that is not a
    /// single connected, acyclic graph.
    pub fn from_edges(edges: &[(u32, u32)]) -> Result<Self, MutexError> {
        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for &(a, b) in edges {
            let (a, b) = (NodeId(a), NodeId(b));
            if a == b {
                return Err(MutexError::InvalidTopology(format!("self-loop at {a}")));
            }
            if !adjacency.entry(a).or_default().insert(b) {
                return Err(MutexError::InvalidTopology(format!("duplicate edge {a}-{b}")));
            }
            adjacency.entry(b).or_default().insert(a);
        }

        let tree = Tree { adjacency };
        if tree.is_empty() {
            return Err(MutexError::InvalidTopology("no edges".to_string()));
        }
        if edges.len() + 1 != tree.len() {
            return Err(MutexError::InvalidTopology(format!(
                "{} edges over {} nodes cannot form a spanning tree",
                edges.len(),
                tree.len()
            )));
        }
        // n - 1 edges and connected means acyclic
        let reachable = tree.nodes().next().map(|first| tree.reachable_from(first));
        if reachable != Some(tree.len()) {
            return Err(MutexError::InvalidTopology("graph is disconnected".to_string()));
        }
        Ok(tree)
    }

    pub fn canonical() -> Result<Self, MutexError> {
        Self::from_edges(&CANONICAL_EDGES)
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.get(&id).into_iter().flatten().copied()
    }

    fn reachable_from(&self, start: NodeId) -> usize {
        let mut seen = BTreeSet::from([start]);
        let mut frontier = VecDeque::from([start]);
        while let Some(node) = frontier.pop_front() {
            for next in self.neighbors(node) {
                if seen.insert(next) {
                    frontier.push_back(next);
                }
            }
        }
        seen.len()
    }

    /// The unique path between two nodes, both ends included.
    pub fn path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut frontier = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);
        while let Some(node) = frontier.pop_front() {
            if node == to {
                break;
            }
            for next in self.neighbors(node) {
                if seen.insert(next) {
                    parent.insert(next, node);
                    frontier.push_back(next);
                }
            }
        }

        let mut path = vec![to];
        let mut cursor = to;
        while cursor != from {
            cursor = *parent.get(&cursor)?;
            path.push(cursor);
        }
        path.reverse();
        Some(path)
    }

    /// The neighbor of `node` that lies toward `target`, or `node` itself.
    pub fn toward(&self, node: NodeId, target: NodeId) -> Option<NodeId> {
        let path = self.path(node, target)?;
        Some(path.get(1).copied().unwrap_or(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_tree() {
        let tree = Tree::canonical().unwrap();
        assert_eq!(tree.len(), 10);
        assert_eq!(
            tree.neighbors(NodeId(1)).collect::<Vec<_>>(),
            vec![NodeId(2), NodeId(3), NodeId(4)]
        );
        assert_eq!(tree.neighbors(NodeId(7)).collect::<Vec<_>>(), vec![NodeId(3)]);
    }

    #[test]
    fn test_path_and_direction() {
        let tree = Tree::canonical().unwrap();
        assert_eq!(
            tree.path(NodeId(7), NodeId(4)).unwrap(),
            vec![NodeId(7), NodeId(3), NodeId(1), NodeId(4)]
        );
        assert_eq!(tree.toward(NodeId(7), NodeId(4)), Some(NodeId(3)));
        assert_eq!(tree.toward(NodeId(4), NodeId(4)), Some(NodeId(4)));
        assert_eq!(tree.path(NodeId(7), NodeId(42)), None);
    }

    #[test]
    fn test_rejects_non_trees() {
        assert!(matches!(
            Tree::from_edges(&[(1, 2), (2, 3), (3, 1)]),
            Err(MutexError::InvalidTopology(_))
        ));
        assert!(matches!(
            Tree::from_edges(&[(1, 2), (3, 4)]),
            Err(MutexError::InvalidTopology(_))
        ));
        assert!(matches!(
            Tree::from_edges(&[(1, 1)]),
            Err(MutexError::InvalidTopology(_))
        ));
        assert!(matches!(
            Tree::from_edges(&[(1, 2), (2, 1)]),
            Err(MutexError::InvalidTopology(_))
        ));
        assert!(matches!(Tree::from_edges(&[]), Err(MutexError::InvalidTopology(_))));
    }
}
