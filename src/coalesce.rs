//! Merging freed blocks with their physical neighbors.
//!
//! ```text
//!   case 1:  [alloc][ bp ][alloc]   ->  nothing to merge
//!   case 2:  [alloc][ bp ][free ]   ->  [alloc][   bp + next   ]
//!   case 3:  [free ][ bp ][alloc]   ->  [   prev + bp   ][alloc]
//!   case 4:  [free ][ bp ][free ]   ->  [  prev + bp + next   ]
//! ```

use crate::{
  Allocator,
  block::BlockPtr,
  heap::HeapSource,
};

impl<S: HeapSource> Allocator<S> {
  /// Merges the free block `bp` with free neighbors and returns the merged
  /// block.
  ///
  /// Neighbors are taken out of their indexes; the merged block is not
  /// indexed, which is left to the caller since its size decides where it
  /// belongs. The first block after the prologue has no predecessor to look
  /// at.
  ///
  /// # Safety
  ///
  /// `bp` must be a block of this heap whose tags are already marked free
  /// and which is not in any index.
  pub(crate) unsafe fn coalesce(
    &mut self,
    bp: BlockPtr,
  ) -> BlockPtr {
    unsafe {
      let next = self.next_block(bp);
      let next_free = !next.is_allocated();
      let prev_free = bp != self.first_block() && !bp.prev_footer().is_allocated();
      let mut size = bp.size();

      match (prev_free, next_free) {
        (false, false) => bp,
        (false, true) => {
          self.remove_free(next);
          size += next.size();
          bp.set_tags(size, false);
          bp
        }
        (true, false) => {
          let prev = self.prev_block(bp);
          self.remove_free(prev);
          size += prev.size();
          prev.set_tags(size, false);
          prev
        }
        (true, true) => {
          let prev = self.prev_block(bp);
          self.remove_free(prev);
          self.remove_free(next);
          size += prev.size() + next.size();
          prev.set_tags(size, false);
          prev
        }
      }
    }
  }
}
