use super::Tree;

/// Extent of a laid-out tree, in layout units.
///
/// `x` is cumulative branch length from the root and `y` is a leaf slot, so
/// the renderer maps `[0, max_depth] x [0, max_y]` onto pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeLayout {
    pub max_depth: f64,
    pub max_y: f64,
    pub leaf_count: usize,
}

impl TreeLayout {
    /// Assign `x`/`y` to every node of `tree` and report the extent.
    ///
    /// Leaves get consecutive integer slots in source order; an internal
    /// node sits at the mean of its children's slots.
    pub fn compute(tree: &mut Tree) -> Self {
        let order = tree.preorder();
        let mut max_depth = 0.0f64;
        let mut leaf_count = 0usize;

        // Parents precede children in pre-order, so depths accumulate downwards.
        for &id in &order {
            let parent_depth = tree.nodes[id].parent.map_or(0.0, |parent| tree.nodes[parent].x);
            let node = &mut tree.nodes[id];
            node.x = parent_depth + node.length;
            max_depth = max_depth.max(node.x);
            if node.is_leaf() {
                node.y = leaf_count as f64;
                leaf_count += 1;
            }
        }

        // Reverse pre-order visits every child before its parent.
        for &id in order.iter().rev() {
            let children = &tree.nodes[id].children;
            if children.is_empty() {
                continue;
            }
            let y_sum: f64 = children.iter().map(|&child| tree.nodes[child].y).sum();
            let mean = y_sum / children.len() as f64;
            tree.nodes[id].y = mean;
        }

        TreeLayout {
            max_depth,
            max_y: leaf_count.saturating_sub(1) as f64,
            leaf_count,
        }
    }
}
