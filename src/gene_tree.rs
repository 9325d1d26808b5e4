use std::collections::{BTreeSet, HashMap};

use crate::error::{ChronorateError, Result};

pub type NodeId = usize;

/// Per-node side data filled in by traversals. Tool-specific pass-through
/// tags (anything unrecognized from an NHX comment) live in `extra`.
#[derive(Debug, Clone, Default)]
pub struct NodeAnnotations {
    pub distance_from_root: Option<f64>,
    pub tip_set: Option<BTreeSet<String>>,
    pub topology_hash: Option<String>,
    pub duplication: Option<bool>,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: Option<String>,
    pub branch_length: Option<f64>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub removed: bool,
    pub annotations: NodeAnnotations,
}

impl TreeNode {
    fn new() -> Self {
        TreeNode {
            name: None,
            branch_length: None,
            parent: None,
            children: Vec::new(),
            removed: false,
            annotations: NodeAnnotations::default(),
        }
    }

    /// The node label, with the empty string normalized away.
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Rooted tree over an arena of nodes. Ids stay stable for the lifetime of
/// the tree; pruning tombstones slots instead of reusing them. Nodes are
/// never shared across trees.
#[derive(Debug, Clone)]
pub struct GeneTree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl Default for GeneTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneTree {
    pub fn new() -> Self {
        GeneTree {
            nodes: vec![TreeNode::new()],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id]
    }

    pub fn add_child(&mut self, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        let mut node = TreeNode::new();
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    pub fn is_tip(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    /// All live nodes, parents before children, siblings left to right.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Terminal nodes in stable left-to-right order.
    pub fn tips(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.is_tip(id))
            .collect()
    }

    pub fn tip_count(&self) -> usize {
        self.tips().len()
    }

    /// Depth-first walk with entry and exit hooks. The pre hook runs before a
    /// node's children are visited, the post hook after all of them. Hooks
    /// may mutate annotations; structural edits during the walk are not
    /// supported.
    pub fn depth_first<F, G>(&mut self, mut pre: F, mut post: G)
    where
        F: FnMut(&mut GeneTree, NodeId),
        G: FnMut(&mut GeneTree, NodeId),
    {
        let mut stack: Vec<(NodeId, usize)> = vec![(self.root, 0)];
        pre(self, self.root);
        while let Some(&(id, next)) = stack.last() {
            match self.nodes[id].children.get(next).copied() {
                Some(child) => {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    stack.push((child, 0));
                    pre(self, child);
                }
                None => {
                    post(self, id);
                    stack.pop();
                }
            }
        }
    }

    /// Remove the given terminal nodes. Internal nodes left childless are
    /// removed too, walking up toward the root. A root that loses all of its
    /// children means the tree has collapsed, which is an error rather than
    /// a panic.
    pub fn prune_tips(&mut self, tips: &[NodeId]) -> Result<()> {
        for &tip in tips {
            if self.nodes[tip].removed {
                continue;
            }
            self.detach(tip)?;
        }
        Ok(())
    }

    fn detach(&mut self, start: NodeId) -> Result<()> {
        let mut id = start;
        loop {
            let parent = self.nodes[id].parent;
            self.nodes[id].removed = true;
            self.nodes[id].children.clear();
            self.nodes[id].parent = None;
            match parent {
                None => {
                    return Err(ChronorateError::prune("pruning collapsed the whole tree"));
                }
                Some(p) => {
                    self.nodes[p].children.retain(|&c| c != id);
                    if !self.nodes[p].children.is_empty() {
                        return Ok(());
                    }
                    id = p;
                }
            }
        }
    }
}
