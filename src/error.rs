use thiserror::Error;

/// Failures reported by a [`HeapSource`](crate::HeapSource) or while setting
/// up an allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("heap exhausted: requested {requested} bytes, {available} bytes left")]
  Exhausted { requested: usize, available: usize },

  #[error("failed to reserve {size} bytes of address space (errno {errno})")]
  Reserve { size: usize, errno: i32 },

  #[error("sbrk failed (errno {errno})")]
  Break { errno: i32 },

  #[error("program break moved behind the allocator's back: expected {expected:#x}, found {actual:#x}")]
  Discontiguous { expected: usize, actual: usize },

  #[error("invalid allocator configuration: {0}")]
  InvalidConfig(&'static str),
}

/// First heap invariant found broken by [`Allocator::check`](crate::Allocator::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
  #[error("prologue at {addr:#x} is corrupt")]
  Prologue { addr: usize },

  #[error("epilogue at {addr:#x} does not end the heap")]
  Epilogue { addr: usize },

  #[error("block at {addr:#x} is not {alignment}-byte aligned")]
  Misaligned { addr: usize, alignment: usize },

  #[error("block at {addr:#x} has invalid size {size}")]
  BadSize { addr: usize, size: usize },

  #[error("block at {addr:#x} runs past the end of the heap")]
  OutOfBounds { addr: usize },

  #[error("free block at {addr:#x} has header {header:#x} but footer {footer:#x}")]
  TagMismatch {
    addr: usize,
    header: usize,
    footer: usize,
  },

  #[error("free blocks at {addr:#x} and its predecessor were not coalesced")]
  Uncoalesced { addr: usize },

  #[error("indexed block at {addr:#x} is marked allocated")]
  AllocatedInIndex { addr: usize },

  #[error("free-list links around {addr:#x} in class {class} are inconsistent")]
  BrokenList { addr: usize, class: usize },

  #[error("block at {addr:#x} of size {size} sits in size class {class}")]
  WrongClass {
    addr: usize,
    size: usize,
    class: usize,
  },

  #[error("tree node at {addr:#x} breaks size ordering")]
  TreeOrder { addr: usize },

  #[error("tree node at {addr:#x} has a stale parent link")]
  TreeParent { addr: usize },

  #[error("tree node at {addr:#x} records height {stored}, actual {actual}")]
  TreeHeight {
    addr: usize,
    stored: usize,
    actual: usize,
  },

  #[error("tree node at {addr:#x} is out of balance ({balance})")]
  TreeUnbalanced { addr: usize, balance: isize },

  #[error("tree node at {addr:#x} is keyed {key} but its block holds {size} bytes")]
  TreeKey {
    addr: usize,
    key: usize,
    size: usize,
  },

  #[error("index size {recorded} disagrees with {counted} reachable entries")]
  IndexCount { recorded: usize, counted: usize },

  #[error("heap walk found {walked} free blocks but the indexes hold {indexed}")]
  Unindexed { walked: usize, indexed: usize },
}
