//! AVL tree of large free blocks, keyed by block size.
//!
//! Every node is the payload of a free block, so inserting and removing
//! never allocates. Equal sizes are kept on the left.
//!
//! ```text
//!   rotate_left(x)                       rotate_right(y)
//!
//!       x                  y                  y               x
//!      / \                / \                / \             / \
//!     A   y      =>      x   C              x   C    =>     A   y
//!        / \            / \                / \                 / \
//!       B   C          A   B              A   B               B   C
//! ```
//!
//! Absent children and parents are `None`, and an absent subtree has
//! height zero, so height arithmetic never special-cases leaves.

use std::ptr::NonNull;

use crate::CheckError;

type Link = Option<NonNull<TreeNode>>;

/// Tree node overlaid on a large free block's payload.
#[repr(C)]
#[derive(Debug, Default)]
pub struct TreeNode {
  size: usize,
  left: Link,
  right: Link,
  parent: Link,
  height: usize,
}

impl TreeNode {
  pub fn size(&self) -> usize {
    self.size
  }
}

/// Shape of a verified tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
  pub nodes: usize,
  pub height: usize,
}

unsafe fn height(link: Link) -> usize {
  match link {
    Some(node) => unsafe { (*node.as_ptr()).height },
    None => 0,
  }
}

unsafe fn update_height(node: NonNull<TreeNode>) {
  unsafe {
    let n = node.as_ptr();
    (*n).height = 1 + height((*n).left).max(height((*n).right));
  }
}

unsafe fn balance_factor(node: NonNull<TreeNode>) -> isize {
  unsafe {
    let n = node.as_ptr();
    height((*n).left) as isize - height((*n).right) as isize
  }
}

/// Leftmost node of the subtree rooted at `node`.
///
/// # Safety
///
/// `node` must be part of a well-formed tree.
pub unsafe fn minimum(mut node: NonNull<TreeNode>) -> NonNull<TreeNode> {
  unsafe {
    while let Some(left) = (*node.as_ptr()).left {
      node = left;
    }
  }
  node
}

pub struct FreeTree {
  root: Link,
  len: usize,
}

impl FreeTree {
  pub const fn new() -> Self {
    Self { root: None, len: 0 }
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.root.is_none()
  }

  #[cfg(test)]
  pub fn root(&self) -> Option<NonNull<TreeNode>> {
    self.root
  }

  #[cfg(test)]
  pub fn height(&self) -> usize {
    unsafe { height(self.root) }
  }

  /// Replaces the subtree rooted at `u` with the one rooted at `v` in `u`'s
  /// parent. `u`'s own links are left as they were.
  unsafe fn transplant(
    &mut self,
    u: NonNull<TreeNode>,
    v: Link,
  ) {
    unsafe {
      let parent = (*u.as_ptr()).parent;

      match parent {
        None => self.root = v,
        Some(p) if (*p.as_ptr()).left == Some(u) => (*p.as_ptr()).left = v,
        Some(p) => (*p.as_ptr()).right = v,
      }

      if let Some(v) = v {
        (*v.as_ptr()).parent = parent;
      }
    }
  }

  unsafe fn rotate_left(
    &mut self,
    x: NonNull<TreeNode>,
  ) -> NonNull<TreeNode> {
    unsafe {
      let Some(y) = (*x.as_ptr()).right else {
        return x;
      };

      (*x.as_ptr()).right = (*y.as_ptr()).left;
      if let Some(b) = (*y.as_ptr()).left {
        (*b.as_ptr()).parent = Some(x);
      }

      self.transplant(x, Some(y));

      (*y.as_ptr()).left = Some(x);
      (*x.as_ptr()).parent = Some(y);

      // x is now y's child: its height has to be settled first.
      update_height(x);
      update_height(y);
      y
    }
  }

  unsafe fn rotate_right(
    &mut self,
    y: NonNull<TreeNode>,
  ) -> NonNull<TreeNode> {
    unsafe {
      let Some(x) = (*y.as_ptr()).left else {
        return y;
      };

      (*y.as_ptr()).left = (*x.as_ptr()).right;
      if let Some(b) = (*x.as_ptr()).right {
        (*b.as_ptr()).parent = Some(y);
      }

      self.transplant(y, Some(x));

      (*x.as_ptr()).right = Some(y);
      (*y.as_ptr()).parent = Some(x);

      update_height(y);
      update_height(x);
      x
    }
  }

  /// Walks from `start` to the root, refreshing heights and rotating any
  /// node whose balance factor left `[-1, 1]`.
  unsafe fn rebalance_upwards(
    &mut self,
    start: Link,
  ) {
    let mut cursor = start;

    while let Some(x) = cursor {
      unsafe {
        update_height(x);
        let balance = balance_factor(x);
        let mut subtree = x;

        if balance > 1 {
          if let Some(left) = (*x.as_ptr()).left {
            if balance_factor(left) < 0 {
              self.rotate_left(left);
            }
          }
          subtree = self.rotate_right(x);
        } else if balance < -1 {
          if let Some(right) = (*x.as_ptr()).right {
            if balance_factor(right) > 0 {
              self.rotate_right(right);
            }
          }
          subtree = self.rotate_left(x);
        }

        cursor = (*subtree.as_ptr()).parent;
      }
    }
  }

  /// Links `node` into the tree under key `size`.
  ///
  /// # Safety
  ///
  /// `node` must point to writable memory large enough for a [`TreeNode`]
  /// that is not already part of the tree, and must stay valid until it is
  /// deleted.
  pub unsafe fn insert(
    &mut self,
    node: NonNull<TreeNode>,
    size: usize,
  ) {
    unsafe {
      let mut parent = None;
      let mut cursor = self.root;

      while let Some(current) = cursor {
        parent = Some(current);
        cursor = if size <= (*current.as_ptr()).size {
          (*current.as_ptr()).left
        } else {
          (*current.as_ptr()).right
        };
      }

      node.write(TreeNode {
        size,
        left: None,
        right: None,
        parent,
        height: 1,
      });

      match parent {
        None => self.root = Some(node),
        Some(p) if size <= (*p.as_ptr()).size => (*p.as_ptr()).left = Some(node),
        Some(p) => (*p.as_ptr()).right = Some(node),
      }

      self.len += 1;
      self.rebalance_upwards(parent);
    }
  }

  /// Unlinks `z` from the tree.
  ///
  /// With two children, `z`'s in-order successor is spliced out of its own
  /// position and moved into `z`'s place. Nodes are memory blocks, so keys
  /// are never copied between them.
  ///
  /// # Safety
  ///
  /// `z` must currently be a node of this tree.
  pub unsafe fn delete(
    &mut self,
    z: NonNull<TreeNode>,
  ) {
    unsafe {
      let zp = z.as_ptr();
      let y = match ((*zp).left, (*zp).right) {
        (Some(_), Some(right)) => minimum(right),
        _ => z,
      };

      let x = (*y.as_ptr()).left.or((*y.as_ptr()).right);
      let mut start = (*y.as_ptr()).parent;
      self.transplant(y, x);

      if y != z {
        let yp = y.as_ptr();
        self.transplant(z, Some(y));

        (*yp).left = (*zp).left;
        if let Some(left) = (*yp).left {
          (*left.as_ptr()).parent = Some(y);
        }
        (*yp).right = (*zp).right;
        if let Some(right) = (*yp).right {
          (*right.as_ptr()).parent = Some(y);
        }
        update_height(y);

        if start == Some(z) {
          start = Some(y);
        }
      }

      self.len -= 1;
      self.rebalance_upwards(start);
    }
  }

  /// Smallest node whose size is at least `size`.
  ///
  /// # Safety
  ///
  /// Every node in the tree must still be valid.
  pub unsafe fn find_best_fit(
    &self,
    size: usize,
  ) -> Option<NonNull<TreeNode>> {
    let mut best = None;
    let mut cursor = self.root;

    while let Some(node) = cursor {
      unsafe {
        if (*node.as_ptr()).size >= size {
          best = Some(node);
          cursor = (*node.as_ptr()).left;
        } else {
          cursor = (*node.as_ptr()).right;
        }
      }
    }

    best
  }

  /// Calls `visit` on every node in ascending size order.
  ///
  /// # Safety
  ///
  /// Every node in the tree must still be valid and `visit` must not modify
  /// the tree.
  pub unsafe fn for_each(
    &self,
    mut visit: impl FnMut(NonNull<TreeNode>),
  ) {
    let mut cursor = self.root.map(|root| unsafe { minimum(root) });

    while let Some(node) = cursor {
      visit(node);
      cursor = unsafe { Self::successor(node) };
    }
  }

  unsafe fn successor(node: NonNull<TreeNode>) -> Link {
    unsafe {
      if let Some(right) = (*node.as_ptr()).right {
        return Some(minimum(right));
      }

      let mut child = node;
      let mut parent = (*node.as_ptr()).parent;
      while let Some(p) = parent {
        if (*p.as_ptr()).left == Some(child) {
          return Some(p);
        }
        child = p;
        parent = (*p.as_ptr()).parent;
      }
      None
    }
  }

  /// Checks ordering, parent links, recorded heights and AVL balance of the
  /// whole tree.
  ///
  /// # Safety
  ///
  /// Every node in the tree must still be valid.
  pub unsafe fn verify(&self) -> Result<TreeShape, CheckError> {
    let Some(root) = self.root else {
      return if self.len == 0 {
        Ok(TreeShape { nodes: 0, height: 0 })
      } else {
        Err(CheckError::IndexCount {
          recorded: self.len,
          counted: 0,
        })
      };
    };

    unsafe {
      if (*root.as_ptr()).parent.is_some() {
        return Err(CheckError::TreeParent {
          addr: root.as_ptr() as usize,
        });
      }

      let (nodes, height) = verify_subtree(root, 0, usize::MAX)?;
      if nodes != self.len {
        return Err(CheckError::IndexCount {
          recorded: self.len,
          counted: nodes,
        });
      }

      Ok(TreeShape { nodes, height })
    }
  }
}

/// Returns `(node count, height)` of the subtree, whose keys must all lie
/// in `[lo, hi]`.
unsafe fn verify_subtree(
  node: NonNull<TreeNode>,
  lo: usize,
  hi: usize,
) -> Result<(usize, usize), CheckError> {
  unsafe {
    let n = node.as_ptr();
    let addr = n as usize;
    let size = (*n).size;

    if size < lo || size > hi {
      return Err(CheckError::TreeOrder { addr });
    }

    let mut count = 1;
    let mut child_heights = [0, 0];

    for (slot, child, lo, hi) in [(0, (*n).left, lo, size), (1, (*n).right, size, hi)] {
      if let Some(child) = child {
        if (*child.as_ptr()).parent != Some(node) {
          return Err(CheckError::TreeParent {
            addr: child.as_ptr() as usize,
          });
        }
        let (nodes, height) = verify_subtree(child, lo, hi)?;
        count += nodes;
        child_heights[slot] = height;
      }
    }

    let actual = 1 + child_heights[0].max(child_heights[1]);
    if (*n).height != actual {
      return Err(CheckError::TreeHeight {
        addr,
        stored: (*n).height,
        actual,
      });
    }

    let balance = child_heights[0] as isize - child_heights[1] as isize;
    if balance.abs() > 1 {
      return Err(CheckError::TreeUnbalanced { addr, balance });
    }

    Ok((count, actual))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  struct Arena {
    nodes: Vec<TreeNode>,
  }

  impl Arena {
    fn new(len: usize) -> Self {
      Self {
        nodes: (0..len).map(|_| TreeNode::default()).collect(),
      }
    }

    fn node(
      &mut self,
      index: usize,
    ) -> NonNull<TreeNode> {
      NonNull::new(unsafe { self.nodes.as_mut_ptr().add(index) }).unwrap()
    }
  }

  fn sizes_in_order(tree: &FreeTree) -> Vec<usize> {
    let mut sizes = Vec::new();
    unsafe { tree.for_each(|node| sizes.push((*node.as_ptr()).size)) };
    sizes
  }

  #[test]
  fn test_empty_tree() {
    let tree = FreeTree::new();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    unsafe {
      assert_eq!(tree.find_best_fit(1), None);
      assert_eq!(tree.verify(), Ok(TreeShape { nodes: 0, height: 0 }));
    }
  }

  #[test]
  fn test_ascending_inserts_stay_balanced() {
    let mut arena = Arena::new(1000);
    let mut tree = FreeTree::new();

    for i in 0..1000 {
      unsafe {
        tree.insert(arena.node(i), 4096 + 8 * i);
        tree.verify().unwrap();
      }
    }

    // An AVL tree of 1000 nodes is at most 1.44 * log2(1002) ≈ 14 high.
    assert!(tree.height() <= 14);
    assert_eq!(tree.len(), 1000);
    assert_eq!(sizes_in_order(&tree), (0..1000).map(|i| 4096 + 8 * i).collect::<Vec<_>>());
  }

  #[test]
  fn test_best_fit_picks_smallest_sufficient() {
    let mut arena = Arena::new(5);
    let mut tree = FreeTree::new();
    let sizes = [8208, 4112, 12304, 5016, 4112];

    unsafe {
      for (i, &size) in sizes.iter().enumerate() {
        tree.insert(arena.node(i), size);
      }

      assert_eq!(tree.find_best_fit(5000), Some(arena.node(3)));
      assert_eq!(tree.find_best_fit(5017).map(|n| (*n.as_ptr()).size), Some(8208));
      assert_eq!(tree.find_best_fit(4112).map(|n| (*n.as_ptr()).size), Some(4112));
      assert_eq!(tree.find_best_fit(1).map(|n| (*n.as_ptr()).size), Some(4112));
      assert_eq!(tree.find_best_fit(12305), None);
    }
  }

  #[test]
  fn test_delete_node_with_two_children_moves_successor() {
    let mut arena = Arena::new(7);
    let mut tree = FreeTree::new();

    unsafe {
      for (i, size) in [400, 200, 600, 100, 300, 500, 700].into_iter().enumerate() {
        tree.insert(arena.node(i), size);
      }
      let root = tree.root().unwrap();
      assert_eq!((*root.as_ptr()).size, 400);

      tree.delete(root);
      tree.verify().unwrap();

      // The successor block itself takes the root's place.
      assert_eq!(tree.root(), Some(arena.node(5)));
      assert_eq!(sizes_in_order(&tree), vec![100, 200, 300, 500, 600, 700]);
    }
  }

  #[test]
  fn test_delete_rebalances() {
    let mut arena = Arena::new(4);
    let mut tree = FreeTree::new();

    unsafe {
      for (i, size) in [200, 100, 300, 400].into_iter().enumerate() {
        tree.insert(arena.node(i), size);
      }

      // Removing 100 leaves 200 right-heavy by two.
      tree.delete(arena.node(1));
      tree.verify().unwrap();
      assert_eq!(tree.root(), Some(arena.node(2)));
      assert_eq!(tree.height(), 2);
    }
  }

  #[test]
  fn test_duplicate_sizes() {
    let mut arena = Arena::new(16);
    let mut tree = FreeTree::new();

    unsafe {
      for i in 0..16 {
        tree.insert(arena.node(i), 4096);
      }
      tree.verify().unwrap();

      for i in (0..16).step_by(2) {
        tree.delete(arena.node(i));
        tree.verify().unwrap();
      }
      assert_eq!(tree.len(), 8);
      assert_eq!(sizes_in_order(&tree), vec![4096; 8]);
      assert!(tree.find_best_fit(4096).is_some());
    }
  }

  #[derive(Debug, Clone)]
  enum Op {
    Insert(usize),
    Delete(usize),
    BestFit(usize),
  }

  fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
      (1usize..64).prop_map(|s| Op::Insert(s * 8)),
      any::<usize>().prop_map(Op::Delete),
      (1usize..64).prop_map(|s| Op::BestFit(s * 8)),
    ]
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn tree_matches_sorted_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
      let mut arena = Arena::new(ops.len());
      let mut tree = FreeTree::new();
      let mut live: Vec<(usize, usize)> = Vec::new();

      for (slot, op) in ops.into_iter().enumerate() {
        match op {
          Op::Insert(size) => {
            unsafe { tree.insert(arena.node(slot), size) };
            live.push((slot, size));
          }
          Op::Delete(pick) if !live.is_empty() => {
            let (victim, _) = live.swap_remove(pick % live.len());
            unsafe { tree.delete(arena.node(victim)) };
          }
          Op::Delete(_) => {}
          Op::BestFit(size) => {
            let expected = live.iter().map(|&(_, s)| s).filter(|&s| s >= size).min();
            let found = unsafe { tree.find_best_fit(size).map(|n| (*n.as_ptr()).size) };
            prop_assert_eq!(found, expected);
          }
        }

        let shape = unsafe { tree.verify() };
        prop_assert!(shape.is_ok(), "{:?}", shape);
        prop_assert_eq!(tree.len(), live.len());
      }

      let mut expected: Vec<usize> = live.iter().map(|&(_, s)| s).collect();
      expected.sort_unstable();
      prop_assert_eq!(sizes_in_order(&tree), expected);
    }
  }
}
