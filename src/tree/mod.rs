use std::fmt::Write as _;

pub mod external;
pub mod layout;
pub mod newick;
pub mod painter;
pub mod scene_graph;
pub mod viewer;

pub type NodeId = usize;

/// Representation of a phylogenetic tree with an explicit node list.
///
/// Nodes live in an arena owned by the tree and refer to each other by
/// [`NodeId`]. Ids are assigned in pre-order, so iterating `nodes` visits
/// leaves in the same left-to-right order as the source text.
#[derive(Debug, Clone)]
pub struct Tree {
    pub label: Option<String>,
    pub root: NodeId,
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Build a tree from an arena. Only the parser constructs trees, and it
    /// guarantees that `root` indexes `nodes`.
    pub(crate) fn from_nodes(nodes: Vec<TreeNode>, root: NodeId) -> Self {
        Self {
            label: None,
            root,
            nodes,
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[self.root]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    pub fn external_nodes(&self) -> Vec<&TreeNode> {
        self.preorder()
            .into_iter()
            .map(|id| &self.nodes[id])
            .filter(|node| node.is_leaf())
            .collect()
    }

    pub fn internal_nodes(&self) -> Vec<&TreeNode> {
        self.nodes.iter().filter(|node| !node.is_leaf()).collect()
    }

    /// Node ids in depth-first pre-order, children in source order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        order
    }

    /// Sum of branch lengths from the root (inclusive) down to `id`.
    pub fn path_length(&self, id: NodeId) -> f64 {
        let mut total = 0.0;
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            total += node.length;
            current = node.parent;
        }
        total
    }

    pub fn negative_length_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.length < 0.0).count()
    }

    /// Longest leaf label in characters, used to reserve label room.
    pub fn max_leaf_label_chars(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(|node| node.name.chars().count())
            .max()
            .unwrap_or(0)
    }

    /// Canonical tree-description text for this tree, terminated by `;`.
    pub fn to_newick(&self) -> String {
        enum Step {
            Open(NodeId),
            Close(NodeId),
            Comma,
        }

        let write_label = |out: &mut String, node: &TreeNode| {
            out.push_str(&quote_label(&node.name));
            let _ = write!(out, ":{}", node.length);
        };

        let mut out = String::new();
        let mut stack = vec![Step::Open(self.root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Open(id) => {
                    let node = &self.nodes[id];
                    if node.children.is_empty() {
                        write_label(&mut out, node);
                        continue;
                    }
                    out.push('(');
                    stack.push(Step::Close(id));
                    for (index, &child) in node.children.iter().enumerate().rev() {
                        stack.push(Step::Open(child));
                        if index > 0 {
                            stack.push(Step::Comma);
                        }
                    }
                }
                Step::Close(id) => {
                    out.push(')');
                    write_label(&mut out, &self.nodes[id]);
                }
                Step::Comma => out.push(','),
            }
        }
        out.push(';');
        out
    }

    /// Structural equality on names, lengths and child order, ignoring
    /// layout coordinates and arena ids.
    pub fn is_isomorphic(&self, other: &Tree) -> bool {
        let mut pending = vec![(self.root, other.root)];
        while let Some((a_id, b_id)) = pending.pop() {
            let (left, right) = (&self.nodes[a_id], &other.nodes[b_id]);
            if left.name != right.name
                || left.length != right.length
                || left.children.len() != right.children.len()
            {
                return false;
            }
            pending.extend(left.children.iter().copied().zip(right.children.iter().copied()));
        }
        true
    }
}

fn quote_label(name: &str) -> String {
    let needs_quotes = name != name.trim()
        || name
            .chars()
            .any(|c| matches!(c, '(' | ')' | '[' | ']' | ',' | ':' | ';' | '\''));
    if needs_quotes {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_owned()
    }
}

/// Node within a phylogenetic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: String,
    /// Branch length to the parent; 0 when the source omits it.
    pub length: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Cumulative branch length from the root, set by layout.
    pub x: f64,
    /// Vertical slot, set by layout.
    pub y: f64,
}

impl TreeNode {
    pub fn new(id: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            name: String::new(),
            length: 0.0,
            parent,
            children: Vec::new(),
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
