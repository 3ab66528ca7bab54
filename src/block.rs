//! Boundary-tag block layout.
//!
//! ```text
//!   ┌────────┬──────────────────────────────────────┬────────┐
//!   │ header │               payload                │ footer │
//!   │ size|a │                                      │ size|a │
//!   └────────┴──────────────────────────────────────┴────────┘
//!            ▲
//!            └── BlockPtr (what callers get back)
//! ```
//!
//! A tag is one machine word. The low three bits of a size are always zero,
//! so bit 0 carries the allocation state.

use std::{mem, ptr::NonNull};

use crate::align::{self, ALIGNMENT};

/// Size of one boundary tag.
pub const WSIZE: usize = mem::size_of::<usize>();

/// Bytes of bookkeeping carried by every block (header and footer).
pub const OVERHEAD: usize = 2 * WSIZE;

/// Smallest block that can hold the free-list links once it is freed.
pub const MIN_BLOCK_SIZE: usize = crate::align!(OVERHEAD + 2 * mem::size_of::<*mut u8>());

const ALLOCATED: usize = 0x1;
const SIZE_MASK: usize = !(ALIGNMENT - 1);

/// Block size needed to serve a request of `size` payload bytes, or `None` if
/// the computation overflows.
pub const fn adjusted_size(size: usize) -> Option<usize> {
  let with_tags = match size.checked_add(OVERHEAD) {
    Some(total) => total,
    None => return None,
  };

  match align::checked_align(with_tags) {
    Some(asize) if asize < MIN_BLOCK_SIZE => Some(MIN_BLOCK_SIZE),
    other => other,
  }
}

/// A packed `(size, allocated)` boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
  pub const fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size & !SIZE_MASK == 0);
    Self(size | allocated as usize)
  }

  pub const fn size(self) -> usize {
    self.0 & SIZE_MASK
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }

  pub const fn bits(self) -> usize {
    self.0
  }
}

/// Handle to a block, pointing at the first payload byte.
///
/// All navigation is pure arithmetic: nothing here checks that the block
/// lies inside a heap. The allocator wraps traversal in bounds assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(NonNull<u8>);

impl BlockPtr {
  pub const fn from_payload(payload: NonNull<u8>) -> Self {
    Self(payload)
  }

  pub const fn as_ptr(self) -> *mut u8 {
    self.0.as_ptr()
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  /// Reinterprets the payload as metadata of type `T`.
  ///
  /// Only meaningful while the block is free.
  pub const fn cast<T>(self) -> NonNull<T> {
    self.0.cast()
  }

  pub fn from_node<T>(node: NonNull<T>) -> Self {
    Self(node.cast())
  }

  fn header_ptr(self) -> *mut usize {
    self.0.as_ptr().wrapping_sub(WSIZE) as *mut usize
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn header(self) -> Tag {
    unsafe { Tag(self.header_ptr().read()) }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn size(self) -> usize {
    unsafe { self.header().size() }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.header().is_allocated() }
  }

  /// # Safety
  ///
  /// The header must describe a block that lies entirely in writable memory.
  pub unsafe fn payload_size(self) -> usize {
    unsafe { self.size() - OVERHEAD }
  }

  /// # Safety
  ///
  /// The header must describe a block that lies entirely in readable memory.
  pub unsafe fn footer(self) -> Tag {
    unsafe { Tag(self.footer_ptr().read()) }
  }

  unsafe fn footer_ptr(self) -> *mut usize {
    unsafe { self.0.as_ptr().add(self.size()).sub(OVERHEAD) as *mut usize }
  }

  /// # Safety
  ///
  /// The header word must be writable.
  pub unsafe fn set_header(
    self,
    tag: Tag,
  ) {
    unsafe { self.header_ptr().write(tag.bits()) }
  }

  /// Writes matching header and footer tags for a block of `size` bytes.
  ///
  /// # Safety
  ///
  /// `size` bytes starting at the header must be writable.
  pub unsafe fn set_tags(
    self,
    size: usize,
    allocated: bool,
  ) {
    let tag = Tag::pack(size, allocated);
    unsafe {
      self.set_header(tag);
      self.footer_ptr().write(tag.bits());
    }
  }

  /// The physically following block.
  ///
  /// # Safety
  ///
  /// The block must not be the epilogue.
  pub unsafe fn next(self) -> BlockPtr {
    unsafe { BlockPtr(NonNull::new_unchecked(self.0.as_ptr().add(self.size()))) }
  }

  /// Tag stored in the word right before this block's header, which is the
  /// previous block's footer.
  ///
  /// # Safety
  ///
  /// A block must physically precede this one.
  pub unsafe fn prev_footer(self) -> Tag {
    unsafe { Tag((self.0.as_ptr().sub(OVERHEAD) as *const usize).read()) }
  }

  /// The physically preceding block, located through its footer.
  ///
  /// # Safety
  ///
  /// A block with a valid footer must physically precede this one.
  pub unsafe fn prev(self) -> BlockPtr {
    unsafe {
      let size = self.prev_footer().size();
      BlockPtr(NonNull::new_unchecked(self.0.as_ptr().sub(size)))
    }
  }
}
