/// Directory tree reconstruction from MFT parent references
use std::collections::HashMap;

use crate::error::{Result, UnwindError};
use crate::fs::ntfs::MftEntry;

/// Index into the arena `Vec<TreeNode>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One MFT entry placed in the tree
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub entry: MftEntry,
    pub children: Vec<NodeId>,
    /// Full path below the volume root, `""` for the root and for orphans.
    /// Directory paths end with `/`.
    pub path: String,
}

impl TreeNode {
    fn new(entry: MftEntry) -> Self {
        Self {
            entry,
            children: Vec::new(),
            path: String::new(),
        }
    }
}

/// The reconstructed directory hierarchy.
///
/// Nodes live in a flat arena in MFT scan order. Every node is either
/// reachable from the root or an orphan: present in the id index but with an
/// empty path.
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    nodes: Vec<TreeNode>,
    index: HashMap<u64, NodeId>,
    root: NodeId,
}

impl DirectoryTree {
    /// Link entries into a tree by parent reference.
    ///
    /// A self-parenting entry is the root; when there are several the last one
    /// wins. Entries whose parent is missing stay orphaned. A repeated record
    /// id replaces the earlier entry in place.
    pub fn build(entries: Vec<MftEntry>) -> Result<Self> {
        let mut nodes: Vec<TreeNode> = Vec::with_capacity(entries.len());
        let mut index: HashMap<u64, NodeId> = HashMap::with_capacity(entries.len());

        for entry in entries {
            match index.get(&entry.id) {
                Some(&existing) => nodes[existing.index()] = TreeNode::new(entry),
                None => {
                    index.insert(entry.id, NodeId(nodes.len()));
                    nodes.push(TreeNode::new(entry));
                }
            }
        }

        let mut root = None;
        for position in 0..nodes.len() {
            let id = NodeId(position);
            let entry = &nodes[position].entry;

            if entry.is_self_parented() {
                root = Some(id);
            } else if let Some(&parent) = index.get(&entry.parent_id) {
                nodes[parent.index()].children.push(id);
            }
        }

        let root = root.ok_or(UnwindError::NoRoot)?;
        let mut tree = DirectoryTree { nodes, index, root };
        tree.assign_paths();

        tracing::debug!(
            "Directory tree built: {} nodes, {} orphans",
            tree.len(),
            tree.orphans().count()
        );

        Ok(tree)
    }

    /// Compute full paths top-down from the root
    fn assign_paths(&mut self) {
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            let children = self.nodes[id.index()].children.clone();
            for &child in &children {
                let path = join_path(&self.nodes[id.index()].path, &self.nodes[child.index()].entry);
                self.nodes[child.index()].path = path;
            }
            stack.extend(children.into_iter().rev());
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[self.root.index()]
    }

    /// Get a node by arena id
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    /// Look up a node by MFT record id
    pub fn get(&self, entry_id: u64) -> Option<&TreeNode> {
        self.index.get(&entry_id).map(|&id| self.node(id))
    }

    /// Arena id of an MFT record id
    pub fn node_id(&self, entry_id: u64) -> Option<NodeId> {
        self.index.get(&entry_id).copied()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &TreeNode> + '_ {
        self.nodes[id.index()]
            .children
            .iter()
            .map(move |&child| self.node(child))
    }

    /// All nodes in scan order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (NodeId(position), node))
    }

    /// Depth-first pre-order from the root, children in link order
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Nodes not reachable from the root, in scan order
    pub fn orphans(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> + '_ {
        self.iter()
            .filter(move |(id, node)| *id != self.root && node.path.is_empty())
    }

    /// Total number of nodes, orphans included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Iterator returned by [`DirectoryTree::preorder`]
pub struct Preorder<'a> {
    tree: &'a DirectoryTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        self.stack.extend(node.children.iter().rev().copied());
        Some((id, node))
    }
}

fn join_path(parent: &str, entry: &MftEntry) -> String {
    let mut path = String::with_capacity(parent.len() + entry.name.len() + 2);
    path.push_str(parent);
    if !parent.is_empty() && !parent.ends_with('/') {
        path.push('/');
    }
    path.push_str(&entry.name);
    if entry.is_directory {
        path.push('/');
    }
    path
}
