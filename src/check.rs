//! Heap consistency checker.
//!
//! Walks every block from the prologue to the epilogue, then both free
//! indexes, and reports the first broken invariant.

use crate::{
  Allocator, CheckError,
  align::ALIGNMENT,
  block::{BlockPtr, MIN_BLOCK_SIZE, OVERHEAD, WSIZE},
  heap::HeapSource,
  seglist::{self, NUM_CLASSES, SMALL_BLOCK_MAX},
};

/// Snapshot of heap usage produced by [`Allocator::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes obtained from the heap source, prologue and epilogue included.
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
  /// Free blocks held by the segregated lists.
  pub listed_blocks: usize,
  /// Free blocks held by the tree.
  pub tree_blocks: usize,
  pub tree_height: usize,
}

impl<S: HeapSource> Allocator<S> {
  /// Verifies every heap invariant and returns usage statistics.
  pub fn check(&self) -> Result<HeapStats, CheckError> {
    let mut stats = HeapStats {
      heap_bytes: self.source.size(),
      ..HeapStats::default()
    };

    unsafe {
      self.check_blocks(&mut stats)?;
      self.check_lists(&mut stats)?;
      self.check_tree(&mut stats)?;
    }

    let indexed = stats.listed_blocks + stats.tree_blocks;
    if indexed != stats.free_blocks {
      return Err(CheckError::Unindexed {
        walked: stats.free_blocks,
        indexed,
      });
    }

    Ok(stats)
  }

  unsafe fn check_blocks(
    &self,
    stats: &mut HeapStats,
  ) -> Result<(), CheckError> {
    let end = self.source.hi() as usize;

    unsafe {
      let prologue = self.prologue;
      let tag = prologue.header();
      if tag.size() != OVERHEAD || !tag.is_allocated() || prologue.footer() != tag {
        return Err(CheckError::Prologue {
          addr: prologue.addr(),
        });
      }

      let mut prev_free = false;
      let mut bp = prologue.next();

      while bp.size() != 0 {
        let addr = bp.addr();
        let header = bp.header();
        let size = header.size();

        if addr % ALIGNMENT != 0 {
          return Err(CheckError::Misaligned {
            addr,
            alignment: ALIGNMENT,
          });
        }
        if size < MIN_BLOCK_SIZE {
          return Err(CheckError::BadSize { addr, size });
        }
        // The block and the epilogue header after it must fit in the heap.
        if addr + size > end {
          return Err(CheckError::OutOfBounds { addr });
        }

        if header.is_allocated() {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += size;
          prev_free = false;
        } else {
          let footer = bp.footer();
          if footer != header {
            return Err(CheckError::TagMismatch {
              addr,
              header: header.bits(),
              footer: footer.bits(),
            });
          }
          if prev_free {
            return Err(CheckError::Uncoalesced { addr });
          }
          stats.free_blocks += 1;
          stats.free_bytes += size;
          stats.largest_free = stats.largest_free.max(size);
          prev_free = true;
        }

        bp = bp.next();
      }

      if !bp.is_allocated() || bp.addr() != end {
        return Err(CheckError::Epilogue {
          addr: bp.addr() - WSIZE,
        });
      }
    }

    Ok(())
  }

  unsafe fn check_lists(
    &self,
    stats: &mut HeapStats,
  ) -> Result<(), CheckError> {
    for class in 0..NUM_CLASSES {
      let mut expected_prev: Option<BlockPtr> = None;

      for bp in unsafe { self.lists.blocks(class) } {
        let addr = bp.addr();

        if !self.contains(bp) {
          return Err(CheckError::OutOfBounds { addr });
        }

        unsafe {
          if bp.is_allocated() {
            return Err(CheckError::AllocatedInIndex { addr });
          }

          let size = bp.size();
          if size > SMALL_BLOCK_MAX || seglist::class_of(size) != class {
            return Err(CheckError::WrongClass { addr, size, class });
          }

          if seglist::links(bp).0 != expected_prev {
            return Err(CheckError::BrokenList { addr, class });
          }
        }

        expected_prev = Some(bp);
        stats.listed_blocks += 1;
      }
    }

    if stats.listed_blocks != self.lists.len() {
      return Err(CheckError::IndexCount {
        recorded: self.lists.len(),
        counted: stats.listed_blocks,
      });
    }

    Ok(())
  }

  unsafe fn check_tree(
    &self,
    stats: &mut HeapStats,
  ) -> Result<(), CheckError> {
    let shape = unsafe { self.tree.verify()? };
    stats.tree_blocks = shape.nodes;
    stats.tree_height = shape.height;

    let mut fault = None;
    unsafe {
      self.tree.for_each(|node| {
        if fault.is_some() {
          return;
        }

        let bp = BlockPtr::from_node(node);
        let addr = bp.addr();
        let key = node.as_ref().size();

        fault = if !self.contains(bp) {
          Some(CheckError::OutOfBounds { addr })
        } else if bp.is_allocated() {
          Some(CheckError::AllocatedInIndex { addr })
        } else if bp.size() != key {
          Some(CheckError::TreeKey {
            addr,
            key,
            size: bp.size(),
          })
        } else if key <= SMALL_BLOCK_MAX {
          Some(CheckError::WrongClass {
            addr,
            size: key,
            class: NUM_CLASSES - 1,
          })
        } else {
          None
        };
      });
    }

    fault.map_or(Ok(()), Err)
  }
}
