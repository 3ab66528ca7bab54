//! Segregated free lists for small blocks.
//!
//! ```text
//!   class:   0     1     2     3      4      5      6      7      8     (9)
//!   bound:  16    32    64   128    256    512   1024   2048   3072   (large)
//!            │           │
//!            ▼           ▼
//!          [blk]       [blk] ⇄ [blk] ⇄ [blk]      (LIFO, newest first)
//! ```
//!
//! The links live in the first two words of each free payload.
//!
//! Class 0 only matters on 32-bit targets: on 64-bit the minimum block is
//! 32 bytes, so nothing ever lands there.

use std::ptr::NonNull;

use crate::block::BlockPtr;

/// Largest block size served by the segregated lists. Anything larger is
/// indexed by the free tree.
pub const SMALL_BLOCK_MAX: usize = 3072;

/// Number of size classes, including the trailing above-threshold class.
pub const NUM_CLASSES: usize = 10;

const CLASS_BOUNDS: [usize; NUM_CLASSES - 1] = [16, 32, 64, 128, 256, 512, 1024, 2048, SMALL_BLOCK_MAX];

type Link = Option<NonNull<ListNode>>;

/// Free-list links overlaid on a small free block's payload.
#[repr(C)]
pub struct ListNode {
  prev: Link,
  next: Link,
}

/// Smallest size class whose bound covers `size`, or the last class.
pub fn class_of(size: usize) -> usize {
  CLASS_BOUNDS
    .iter()
    .position(|&bound| size <= bound)
    .unwrap_or(NUM_CLASSES - 1)
}

pub struct SegregatedLists {
  heads: [Link; NUM_CLASSES],
  len: usize,
}

impl SegregatedLists {
  pub const fn new() -> Self {
    Self {
      heads: [None; NUM_CLASSES],
      len: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Pushes a free block onto the head of its class list.
  ///
  /// # Safety
  ///
  /// `bp` must be a free block with valid tags and a payload large enough
  /// for a [`ListNode`], and must not already be listed.
  pub unsafe fn insert(
    &mut self,
    bp: BlockPtr,
  ) {
    unsafe {
      let class = class_of(bp.size());
      let node = bp.cast::<ListNode>();
      let old_head = self.heads[class];

      node.write(ListNode {
        prev: None,
        next: old_head,
      });

      if let Some(old_head) = old_head {
        (*old_head.as_ptr()).prev = Some(node);
      }

      self.heads[class] = Some(node);
    }
    self.len += 1;
  }

  /// Unlinks a block from its class list.
  ///
  /// # Safety
  ///
  /// `bp` must currently be a member of the list matching its header size.
  pub unsafe fn remove(
    &mut self,
    bp: BlockPtr,
  ) {
    unsafe {
      let class = class_of(bp.size());
      let node = bp.cast::<ListNode>().as_ptr();
      let prev = (*node).prev;
      let next = (*node).next;

      match prev {
        Some(prev) => (*prev.as_ptr()).next = next,
        None => self.heads[class] = next,
      }

      if let Some(next) = next {
        (*next.as_ptr()).prev = prev;
      }
    }
    self.len -= 1;
  }

  /// First-fit search starting at the class of `asize`, moving up through
  /// larger classes. The found block is removed from its list.
  ///
  /// # Safety
  ///
  /// Every listed block must still be a valid free block.
  pub unsafe fn find_fit(
    &mut self,
    asize: usize,
  ) -> Option<BlockPtr> {
    for class in class_of(asize)..NUM_CLASSES - 1 {
      let found = unsafe { self.blocks(class).find(|bp| bp.size() >= asize) };

      if let Some(bp) = found {
        unsafe { self.remove(bp) };
        return Some(bp);
      }
    }

    None
  }

  /// Walks one class list from head to tail.
  ///
  /// # Safety
  ///
  /// The list must not be modified while the iterator is alive, and every
  /// listed block must still be a valid free block.
  pub unsafe fn blocks(
    &self,
    class: usize,
  ) -> Blocks {
    Blocks {
      cursor: self.heads[class],
    }
  }
}

/// The `(prev, next)` list neighbors recorded in a listed block.
///
/// # Safety
///
/// `bp` must currently be a member of a free list.
pub unsafe fn links(bp: BlockPtr) -> (Option<BlockPtr>, Option<BlockPtr>) {
  unsafe {
    let node = bp.cast::<ListNode>().as_ptr();
    (
      (*node).prev.map(BlockPtr::from_node),
      (*node).next.map(BlockPtr::from_node),
    )
  }
}

/// Iterator over one class list. See [`SegregatedLists::blocks`].
pub struct Blocks {
  cursor: Link,
}

impl Iterator for Blocks {
  type Item = BlockPtr;

  fn next(&mut self) -> Option<BlockPtr> {
    let node = self.cursor?;
    let bp = BlockPtr::from_node(node);
    unsafe {
      self.cursor = (*node.as_ptr()).next;
    }
    Some(bp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{MIN_BLOCK_SIZE, WSIZE};

  /// Carves `sizes` into consecutive free blocks inside `words`.
  fn carve(
    words: &mut Vec<usize>,
    sizes: &[usize],
  ) -> Vec<BlockPtr> {
    let total: usize = sizes.iter().sum();
    words.resize(total / WSIZE + 2, 0);

    let mut blocks = Vec::new();
    let mut payload = unsafe { words.as_mut_ptr().add(1) } as *mut u8;
    for &size in sizes {
      let bp = BlockPtr::from_payload(NonNull::new(payload).unwrap());
      unsafe {
        bp.set_tags(size, false);
        payload = payload.add(size);
      }
      blocks.push(bp);
    }
    blocks
  }

  #[test]
  fn test_class_of() {
    assert_eq!(class_of(1), 0);
    assert_eq!(class_of(16), 0);
    assert_eq!(class_of(17), 1);
    assert_eq!(class_of(64), 2);
    assert_eq!(class_of(65), 3);
    assert_eq!(class_of(2048), 7);
    assert_eq!(class_of(2049), 8);
    assert_eq!(class_of(SMALL_BLOCK_MAX), 8);
    assert_eq!(class_of(SMALL_BLOCK_MAX + 8), NUM_CLASSES - 1);
    assert_eq!(class_of(usize::MAX), NUM_CLASSES - 1);
  }

  #[test]
  fn test_insert_is_lifo() {
    let mut words = Vec::new();
    let blocks = carve(&mut words, &[48, 56, 40]);
    let mut lists = SegregatedLists::new();

    unsafe {
      for &bp in &blocks {
        lists.insert(bp);
      }
      assert_eq!(lists.len(), 3);

      let order: Vec<BlockPtr> = lists.blocks(class_of(48)).collect();
      assert_eq!(order, vec![blocks[2], blocks[1], blocks[0]]);

      assert_eq!(lists.find_fit(40), Some(blocks[2]));
      assert_eq!(lists.find_fit(40), Some(blocks[1]));
      assert_eq!(lists.len(), 1);
    }
  }

  #[test]
  fn test_remove_head_middle_tail() {
    let mut words = Vec::new();
    let blocks = carve(&mut words, &[MIN_BLOCK_SIZE; 4]);
    let class = class_of(MIN_BLOCK_SIZE);
    let mut lists = SegregatedLists::new();

    unsafe {
      for &bp in &blocks {
        lists.insert(bp);
      }

      // List order is 3, 2, 1, 0.
      assert_eq!(links(blocks[2]), (Some(blocks[3]), Some(blocks[1])));
      assert_eq!(links(blocks[3]), (None, Some(blocks[2])));

      lists.remove(blocks[2]);
      assert_eq!(links(blocks[1]), (Some(blocks[3]), Some(blocks[0])));
      assert_eq!(lists.blocks(class).collect::<Vec<_>>(), vec![blocks[3], blocks[1], blocks[0]]);

      lists.remove(blocks[3]);
      assert_eq!(lists.blocks(class).collect::<Vec<_>>(), vec![blocks[1], blocks[0]]);

      lists.remove(blocks[0]);
      assert_eq!(lists.blocks(class).collect::<Vec<_>>(), vec![blocks[1]]);

      lists.remove(blocks[1]);
      assert!(lists.is_empty());
      assert_eq!(lists.blocks(class).next(), None);
    }
  }

  #[test]
  fn test_find_fit_is_first_fit_within_class() {
    let mut words = Vec::new();
    // Both land in the (128, 256] class.
    let blocks = carve(&mut words, &[256, 136]);
    let mut lists = SegregatedLists::new();

    unsafe {
      lists.insert(blocks[0]);
      lists.insert(blocks[1]);

      // The head (136) is too small for 200, so the scan moves on to 256.
      assert_eq!(lists.find_fit(200), Some(blocks[0]));
      assert_eq!(lists.find_fit(200), None);
      assert_eq!(lists.find_fit(136), Some(blocks[1]));
    }
  }

  #[test]
  fn test_find_fit_climbs_classes() {
    let mut words = Vec::new();
    let blocks = carve(&mut words, &[1024, 64]);
    let mut lists = SegregatedLists::new();

    unsafe {
      lists.insert(blocks[0]);
      lists.insert(blocks[1]);

      assert_eq!(lists.find_fit(80), Some(blocks[0]));
      assert_eq!(lists.find_fit(80), None);
      assert_eq!(lists.len(), 1);
    }
  }
}
