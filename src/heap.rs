//! Raw memory behind the allocator.
//!
//! The allocator only ever asks for "more bytes at the end", the way the
//! classic `sbrk` interface works. Two sources are provided:
//!
//! - [`ReservedHeap`] reserves a fixed span of address space with `mmap`
//!   and moves a private break inside it. Instances are fully isolated, so
//!   several allocators (and tests) can coexist in one process.
//! - [`SbrkHeap`] moves the real program break with `sbrk(2)`.

use std::{io, ptr, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{HeapError, align::ALIGNMENT};

/// A contiguous, append-only region of memory.
///
/// # Safety
///
/// Implementations must hand out memory that stays valid and writable for
/// as long as the source lives, and every successful [`grow`](Self::grow)
/// must return exactly the previous end of the region, aligned to
/// [`ALIGNMENT`]. Growth either completes or leaves the region untouched.
pub unsafe trait HeapSource {
  /// Extends the region by `increment` bytes and returns the start of the
  /// new range (the old end of the region).
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError>;

  /// First byte of the region. May be null before the first growth.
  fn lo(&self) -> *mut u8;

  /// One past the last byte of the region.
  fn hi(&self) -> *mut u8;

  /// Current size of the region in bytes.
  fn size(&self) -> usize {
    self.hi() as usize - self.lo() as usize
  }
}

fn last_errno() -> i32 {
  io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    size if size > 0 => size as usize,
    _ => 4096,
  }
}

/// A fixed reservation of address space with a private break pointer.
///
/// Pages are only touched once the break passes over them, so a generous
/// capacity costs nothing until it is used.
pub struct ReservedHeap {
  base: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

impl ReservedHeap {
  pub fn new(capacity: usize) -> Result<Self, HeapError> {
    let page = page_size();
    let capacity = capacity
      .checked_add(page - 1)
      .map(|bumped| bumped & !(page - 1))
      .ok_or(HeapError::InvalidConfig("capacity overflows"))?;

    if capacity == 0 {
      return Err(HeapError::InvalidConfig("capacity must be non-zero"));
    }

    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(HeapError::Reserve {
        size: capacity,
        errno: last_errno(),
      });
    }

    let base = NonNull::new(address as *mut u8).ok_or(HeapError::Reserve {
      size: capacity,
      errno: 0,
    })?;

    log::debug!("reserved {capacity} bytes of heap at {:p}", base);

    Ok(Self {
      base,
      brk: 0,
      capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.brk
  }
}

unsafe impl HeapSource for ReservedHeap {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    if increment > self.remaining() {
      return Err(HeapError::Exhausted {
        requested: increment,
        available: self.remaining(),
      });
    }

    let old_brk = unsafe { self.base.add(self.brk) };
    self.brk += increment;
    Ok(old_brk)
  }

  fn lo(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  fn hi(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.brk) }
  }
}

impl Drop for ReservedHeap {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr() as *mut c_void, self.capacity);
    }
  }
}

/// Current program break, as reported by `sbrk(0)`.
pub fn program_break() -> *mut u8 {
  unsafe { sbrk(0) as *mut u8 }
}

/// The process data segment, grown with `sbrk(2)`.
///
/// Anything else in the process that moves the break (the system `malloc`
/// often does) breaks contiguity; that is detected and reported as
/// [`HeapError::Discontiguous`] rather than silently papered over.
pub struct SbrkHeap {
  lo: *mut u8,
  hi: *mut u8,
}

impl SbrkHeap {
  pub fn new() -> Self {
    Self {
      lo: ptr::null_mut(),
      hi: ptr::null_mut(),
    }
  }

  unsafe fn raw_sbrk(increment: usize) -> Result<*mut u8, HeapError> {
    let increment = intptr_t::try_from(increment).map_err(|_| HeapError::Exhausted {
      requested: increment,
      available: 0,
    })?;

    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return Err(HeapError::Break { errno: last_errno() });
    }

    Ok(address as *mut u8)
  }
}

impl Default for SbrkHeap {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapSource for SbrkHeap {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    unsafe {
      if self.lo.is_null() {
        let current = program_break();
        let padding = crate::align_to!(current as usize, ALIGNMENT) - current as usize;
        let start = Self::raw_sbrk(padding)?.add(padding);
        self.lo = start;
        self.hi = start;
      }

      let address = Self::raw_sbrk(increment)?;

      if address != self.hi {
        // Give the bytes back if nobody has moved the break since.
        if program_break() == address.add(increment) {
          let _ = sbrk(-(increment as intptr_t));
        }
        return Err(HeapError::Discontiguous {
          expected: self.hi as usize,
          actual: address as usize,
        });
      }

      self.hi = address.add(increment);
      Ok(NonNull::new_unchecked(address))
    }
  }

  fn lo(&self) -> *mut u8 {
    self.lo
  }

  fn hi(&self) -> *mut u8 {
    self.hi
  }
}
