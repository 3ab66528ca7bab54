use crate::{
  HeapError,
  block::{MIN_BLOCK_SIZE, OVERHEAD},
};

/// Default heap growth granularity, in bytes.
pub const CHUNK_SIZE: usize = 1 << 6;

/// Default address space reserved by [`ReservedHeap`](crate::ReservedHeap).
pub const DEFAULT_CAPACITY: usize = 64 << 20;

/// Tuning knobs for an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Minimum number of bytes requested from the heap source when no free
  /// block fits. Default: [`CHUNK_SIZE`].
  pub chunk_size: usize,

  /// Size of the free block created at initialization. Default: [`CHUNK_SIZE`].
  pub initial_chunk: usize,

  /// Address space reserved up front by a
  /// [`ReservedHeap`](crate::ReservedHeap). Other sources ignore it.
  /// Default: 64 MiB.
  pub capacity: usize,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      chunk_size: CHUNK_SIZE,
      initial_chunk: CHUNK_SIZE,
      capacity: DEFAULT_CAPACITY,
    }
  }
}

impl AllocatorConfig {
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_initial_chunk(
    mut self,
    initial_chunk: usize,
  ) -> Self {
    self.initial_chunk = initial_chunk;
    self
  }

  pub fn with_capacity(
    mut self,
    capacity: usize,
  ) -> Self {
    self.capacity = capacity;
    self
  }

  /// Normalizes the sizes to whole blocks and rejects unusable settings.
  pub fn validate(self) -> Result<Self, HeapError> {
    if self.capacity == 0 {
      return Err(HeapError::InvalidConfig("capacity must be non-zero"));
    }

    let chunk_size = crate::align::checked_align(self.chunk_size)
      .ok_or(HeapError::InvalidConfig("chunk size overflows"))?
      .max(MIN_BLOCK_SIZE);
    let initial_chunk = crate::align::checked_align(self.initial_chunk)
      .ok_or(HeapError::InvalidConfig("initial chunk overflows"))?
      .max(MIN_BLOCK_SIZE);

    if initial_chunk.saturating_add(2 * OVERHEAD) > self.capacity {
      return Err(HeapError::InvalidConfig("initial chunk does not fit in capacity"));
    }

    Ok(Self {
      chunk_size,
      initial_chunk,
      capacity: self.capacity,
    })
  }
}
