//! The worker tree.
//!
//! Workers form a complete binary tree over their intra-partition indices:
//! worker 0 is the root, and the children of worker `i` are `2i + 1` and
//! `2i + 2`. The tree carries the lifeline and termination traffic, so it is
//! kept as a purely numeric index structure; workers refer to each other by
//! index everywhere.

/// The tree-relative position of a single worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTree {
    pub parent: Option<usize>,
    pub left_child: Option<usize>,
    pub right_child: Option<usize>,
}

impl WorkerTree {
    /// Computes the position of worker `id` in a tree of `num_workers`
    /// workers.
    pub fn new(id: usize, num_workers: usize) -> WorkerTree {
        debug_assert!(id < num_workers);
        let left = 2 * id + 1;
        let right = 2 * id + 2;
        WorkerTree {
            parent: id.checked_sub(1).map(|up| up / 2),
            left_child: (left < num_workers).then_some(left),
            right_child: (right < num_workers).then_some(right),
        }
    }

    /// Returns true if `child` is a direct child of this worker.
    pub fn is_child(&self, child: usize) -> bool {
        self.left_child == Some(child) || self.right_child == Some(child)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_of_one() {
        let tree = WorkerTree::new(0, 1);
        assert_eq!(tree.parent, None);
        assert_eq!(tree.left_child, None);
        assert_eq!(tree.right_child, None);
    }

    #[test]
    fn four_workers() {
        let root = WorkerTree::new(0, 4);
        assert_eq!(root.parent, None);
        assert_eq!(root.left_child, Some(1));
        assert_eq!(root.right_child, Some(2));

        let one = WorkerTree::new(1, 4);
        assert_eq!(one.parent, Some(0));
        assert_eq!(one.left_child, Some(3));
        assert_eq!(one.right_child, None);

        let three = WorkerTree::new(3, 4);
        assert_eq!(three.parent, Some(1));
        assert_eq!(three.left_child, None);
        assert_eq!(three.right_child, None);
    }

    #[test]
    fn parents_and_children_agree() {
        let num_workers = 13;
        for id in 0..num_workers {
            let tree = WorkerTree::new(id, num_workers);
            for child in [tree.left_child, tree.right_child].into_iter().flatten() {
                assert_eq!(WorkerTree::new(child, num_workers).parent, Some(id));
                assert!(tree.is_child(child));
            }
        }
    }
}
