use std::{alloc::Layout, ptr, ptr::NonNull};

use crate::{
  AllocatorConfig, HeapError,
  align::ALIGNMENT,
  avl::{FreeTree, TreeNode},
  block::{self, BlockPtr, MIN_BLOCK_SIZE, OVERHEAD, Tag, WSIZE},
  heap::{HeapSource, ReservedHeap},
  seglist::{SMALL_BLOCK_MAX, SegregatedLists},
};

/// Boundary-tag allocator over one growable heap.
///
/// Small free blocks (up to [`SMALL_BLOCK_MAX`] bytes) are kept in
/// segregated LIFO lists, larger ones in an AVL tree searched best-fit.
/// Freed blocks are merged with free physical neighbors right away.
///
/// The allocator is single-threaded: it holds raw pointers into its heap and
/// is neither `Send` nor `Sync`.
pub struct Allocator<S: HeapSource = ReservedHeap> {
  pub(crate) source: S,
  pub(crate) config: AllocatorConfig,
  pub(crate) prologue: BlockPtr,
  pub(crate) lists: SegregatedLists,
  pub(crate) tree: FreeTree,
}

impl Allocator<ReservedHeap> {
  /// Allocator over a private [`ReservedHeap`] of `config.capacity` bytes.
  pub fn with_config(config: AllocatorConfig) -> Result<Self, HeapError> {
    Self::new(ReservedHeap::new(config.capacity)?, config)
  }

  pub fn with_capacity(capacity: usize) -> Result<Self, HeapError> {
    Self::with_config(AllocatorConfig::default().with_capacity(capacity))
  }
}

impl<S: HeapSource> Allocator<S> {
  /// Lays out an empty heap on `source` and seeds it with one free block of
  /// `config.initial_chunk` bytes.
  ///
  /// ```text
  ///   ┌─────┬──────────┬──────────┬──────────┐
  ///   │ pad │ pro hdr  │ pro ftr  │ epi hdr  │
  ///   │  0  │ 2W | 1   │ 2W | 1   │  0 | 1   │
  ///   └─────┴──────────┴──────────┴──────────┘
  /// ```
  pub fn new(
    mut source: S,
    config: AllocatorConfig,
  ) -> Result<Self, HeapError> {
    let config = config.validate()?;
    let start = source.grow(4 * WSIZE)?;

    let prologue = unsafe {
      let words = start.as_ptr() as *mut usize;
      words.write(0);
      words.add(1).write(Tag::pack(OVERHEAD, true).bits());
      words.add(2).write(Tag::pack(OVERHEAD, true).bits());
      words.add(3).write(Tag::pack(0, true).bits());
      BlockPtr::from_payload(start.add(2 * WSIZE))
    };

    let mut allocator = Self {
      source,
      config,
      prologue,
      lists: SegregatedLists::new(),
      tree: FreeTree::new(),
    };

    unsafe {
      let bp = allocator.extend_heap(config.initial_chunk)?;
      allocator.insert_free(bp);
    }

    log::debug!(
      "heap initialized at {:p} with a {} byte free block",
      allocator.source.lo(),
      config.initial_chunk
    );

    Ok(allocator)
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Current heap size in bytes, including prologue and epilogue.
  pub fn heap_size(&self) -> usize {
    self.source.size()
  }

  /// First block after the prologue.
  pub(crate) fn first_block(&self) -> BlockPtr {
    unsafe { self.prologue.next() }
  }

  /// Whether `bp` could be a block payload inside this heap.
  pub(crate) fn contains(
    &self,
    bp: BlockPtr,
  ) -> bool {
    let first = self.first_block().addr();
    let end = self.source.hi() as usize;
    bp.addr() >= first && bp.addr() <= end && bp.addr() % ALIGNMENT == 0
  }

  /// Allocates at least `size` bytes, aligned to [`ALIGNMENT`].
  ///
  /// Returns null for `size == 0` or when the heap cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(asize) = block::adjusted_size(size) else {
      log::warn!("allocate({size}) overflows the block size");
      return ptr::null_mut();
    };

    unsafe {
      if let Some(bp) = self.find_fit(asize) {
        self.place(bp, asize);
        log::trace!("allocate({size}) -> {:p} (reused, block {})", bp.as_ptr(), bp.size());
        return bp.as_ptr();
      }

      let extend = asize.max(self.config.chunk_size);
      match self.extend_heap(extend) {
        Ok(bp) => {
          self.place(bp, asize);
          log::trace!("allocate({size}) -> {:p} (grew heap by {extend})", bp.as_ptr());
          bp.as_ptr()
        }
        Err(err) => {
          log::warn!("allocate({size}) failed: {err}");
          ptr::null_mut()
        }
      }
    }
  }

  /// Allocates zeroed room for `count` elements of `size` bytes each.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      log::warn!("allocate_zeroed({count}, {size}) overflows");
      return ptr::null_mut();
    };

    let address = self.allocate(total);
    if !address.is_null() {
      unsafe { ptr::write_bytes(address, 0, total) };
    }
    address
  }

  /// Allocates for a [`Layout`]. Alignments above [`ALIGNMENT`] are not
  /// supported and yield null.
  pub fn allocate_layout(
    &mut self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      log::warn!("alignment {} is not supported", layout.align());
      return ptr::null_mut();
    }
    self.allocate(layout.size())
  }

  /// Releases a block. Null is ignored.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    let Some(payload) = NonNull::new(address) else {
      return;
    };
    let bp = BlockPtr::from_payload(payload);
    debug_assert!(self.contains(bp), "{address:p} is outside the heap");

    unsafe {
      let size = bp.size();
      bp.set_tags(size, false);
      let merged = self.coalesce(bp);
      self.insert_free(merged);
      log::trace!("free({address:p}) -> free block {:p} of {}", merged.as_ptr(), merged.size());
    }
  }

  /// Resizes a block, preserving its first `min(old, size)` payload bytes.
  ///
  /// A null `address` behaves like [`allocate`](Self::allocate); `size == 0`
  /// frees the block and returns null. On exhaustion null is returned and
  /// the original block is left untouched.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn resize(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    let Some(payload) = NonNull::new(address) else {
      return self.allocate(size);
    };

    if size == 0 {
      unsafe { self.free(address) };
      return ptr::null_mut();
    }

    let Some(asize) = block::adjusted_size(size) else {
      log::warn!("resize({address:p}, {size}) overflows the block size");
      return ptr::null_mut();
    };

    let bp = BlockPtr::from_payload(payload);
    debug_assert!(self.contains(bp), "{address:p} is outside the heap");

    unsafe {
      let old_size = bp.size();

      if asize <= old_size {
        self.release_tail(bp, asize);
        log::trace!("resize({address:p}, {size}) shrank in place");
        return address;
      }

      let next = self.next_block(bp);
      let next_tag = next.header();

      if !next_tag.is_allocated() && old_size + next_tag.size() >= asize {
        self.remove_free(next);
        bp.set_tags(old_size + next_tag.size(), true);
        self.release_tail(bp, asize);
        log::trace!("resize({address:p}, {size}) merged forward");
        return address;
      }

      if next_tag.size() == 0 {
        let deficit = asize - old_size;
        return match self.source.grow(deficit) {
          Ok(_) => {
            bp.set_tags(asize, true);
            bp.next().set_header(Tag::pack(0, true));
            log::trace!("resize({address:p}, {size}) extended the heap tail by {deficit}");
            address
          }
          Err(err) => {
            log::warn!("resize({address:p}, {size}) failed: {err}");
            ptr::null_mut()
          }
        };
      }

      let fresh = self.allocate(size);
      if fresh.is_null() {
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(address, fresh, size.min(old_size - OVERHEAD));
      self.free(address);
      log::trace!("resize({address:p}, {size}) moved to {fresh:p}");
      fresh
    }
  }

  /// Payload bytes usable through a live pointer.
  ///
  /// # Safety
  ///
  /// `address` must be a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    address: NonNull<u8>,
  ) -> usize {
    unsafe { BlockPtr::from_payload(address).payload_size() }
  }

  /// Takes a free block of at least `asize` bytes out of the indexes.
  ///
  /// Small requests search the segregated lists first and fall back to the
  /// tree, so a large free block is still usable before the heap grows.
  unsafe fn find_fit(
    &mut self,
    asize: usize,
  ) -> Option<BlockPtr> {
    unsafe {
      if asize <= SMALL_BLOCK_MAX && !self.lists.is_empty() {
        if let Some(bp) = self.lists.find_fit(asize) {
          return Some(bp);
        }
      }

      if self.tree.is_empty() {
        return None;
      }
      let node = self.tree.find_best_fit(asize)?;
      self.tree.delete(node);
      Some(BlockPtr::from_node(node))
    }
  }

  /// Marks the free block `bp` allocated, splitting off whatever is left
  /// past `asize` when it makes a block of its own.
  unsafe fn place(
    &mut self,
    bp: BlockPtr,
    asize: usize,
  ) {
    unsafe {
      bp.set_tags(bp.size(), true);
      self.release_tail(bp, asize);
    }
  }

  /// Shrinks the allocated block `bp` to `asize` bytes if the remainder is
  /// at least [`MIN_BLOCK_SIZE`]; the remainder is freed and merged with a
  /// free successor. Smaller remainders stay in the block.
  unsafe fn release_tail(
    &mut self,
    bp: BlockPtr,
    asize: usize,
  ) {
    unsafe {
      let size = bp.size();
      let rest = size - asize;
      if rest < MIN_BLOCK_SIZE {
        return;
      }

      bp.set_tags(asize, true);
      let remainder = bp.next();
      remainder.set_tags(rest, false);
      let merged = self.coalesce(remainder);
      self.insert_free(merged);
    }
  }

  /// Grows the heap by `bytes`, turning the new range into a free block
  /// merged with a free block that ended the heap. The result is not
  /// indexed yet.
  pub(crate) unsafe fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<BlockPtr, HeapError> {
    let size = crate::align!(bytes);
    let start = self.source.grow(size)?;

    unsafe {
      // The old epilogue header becomes the new block's header.
      let bp = BlockPtr::from_payload(start);
      bp.set_tags(size, false);
      bp.next().set_header(Tag::pack(0, true));

      log::debug!("heap grew by {size} bytes to {}", self.source.size());
      Ok(self.coalesce(bp))
    }
  }

  /// Registers a free block with the index its size belongs to.
  pub(crate) unsafe fn insert_free(
    &mut self,
    bp: BlockPtr,
  ) {
    unsafe {
      let size = bp.size();
      if size <= SMALL_BLOCK_MAX {
        self.lists.insert(bp);
      } else {
        self.tree.insert(bp.cast::<TreeNode>(), size);
      }
    }
  }

  /// Removes a free block from whichever index holds it.
  pub(crate) unsafe fn remove_free(
    &mut self,
    bp: BlockPtr,
  ) {
    unsafe {
      if bp.size() <= SMALL_BLOCK_MAX {
        self.lists.remove(bp);
      } else {
        self.tree.delete(bp.cast::<TreeNode>());
      }
    }
  }

  pub(crate) unsafe fn next_block(
    &self,
    bp: BlockPtr,
  ) -> BlockPtr {
    let next = unsafe { bp.next() };
    debug_assert!(self.contains(next), "next block {:p} is outside the heap", next.as_ptr());
    next
  }

  pub(crate) unsafe fn prev_block(
    &self,
    bp: BlockPtr,
  ) -> BlockPtr {
    let prev = unsafe { bp.prev() };
    debug_assert!(
      prev == self.prologue || self.contains(prev),
      "previous block {:p} is outside the heap",
      prev.as_ptr()
    );
    prev
  }
}
