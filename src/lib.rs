//! # hybrid-malloc - A Boundary-Tag Memory Allocator
//!
//! This crate provides a user-space `malloc`/`free`/`realloc` over one
//! contiguous, growable heap. It never calls into another general-purpose
//! allocator: all bookkeeping lives inside the heap itself.
//!
//! ## Overview
//!
//! The heap is a sequence of blocks framed by boundary tags:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬──────────┬────────────────┬──────────┬─────────────────┬─────┐
//!   │ pad │ prologue │    block A     │ block B  │     block C     │ epi │
//!   │     │  (2W|1)  │  (alloc|1)     │ (free|0) │    (alloc|1)    │ 0|1 │
//!   └─────┴──────────┴────────────────┴──────────┴─────────────────┴─────┘
//!   ▲                                                                     ▲
//!   lo                                                         hi (break)
//! ```
//!
//! Free blocks are indexed two ways, depending on their size:
//!
//! ```text
//!   Free Block Index:
//!
//!   size <= 3072                          size > 3072
//!   ┌──────────────────────────┐          ┌──────────────────────────┐
//!   │  segregated LIFO lists   │          │   AVL tree keyed by size │
//!   │                          │          │                          │
//!   │  [16]  → ·               │          │          8208            │
//!   │  [32]  → blk ⇄ blk       │          │         /    \           │
//!   │  [64]  → blk             │          │      4112   12304        │
//!   │  ...                     │          │                          │
//!   │  [3072]→ blk ⇄ blk ⇄ blk │          │  best fit in O(log n)    │
//!   └──────────────────────────┘          └──────────────────────────┘
//! ```
//!
//! List links and tree nodes are written into the payload of the free block
//! they describe, so indexing a block never allocates.
//!
//! ## Crate Structure
//!
//! ```text
//!   hybrid_malloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags and block navigation (internal)
//!   ├── heap       - Heap sources: ReservedHeap (mmap) and SbrkHeap (sbrk)
//!   ├── seglist    - Segregated free lists (internal)
//!   ├── avl        - AVL tree of large free blocks (internal)
//!   ├── coalesce   - Neighbor merging (internal)
//!   ├── allocator  - Allocator: allocate / free / resize
//!   ├── check      - Heap consistency checker and HeapStats
//!   ├── config     - AllocatorConfig
//!   └── error      - HeapError, CheckError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use hybrid_malloc::Allocator;
//!
//! let mut allocator = Allocator::with_capacity(1 << 20).unwrap();
//!
//! let ptr = allocator.allocate(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!   ptr.write_bytes(0xAB, 64);
//!
//!   let bigger = allocator.resize(ptr, 256);
//!   assert_eq!(*bigger.add(63), 0xAB);
//!
//!   allocator.free(bigger);
//! }
//!
//! allocator.check().unwrap();
//! ```
//!
//! ## How It Works
//!
//! Allocation rounds the request up to a block size (payload plus header
//! and footer, multiple of 8), finds a free block in the matching index,
//! and splits off the unused tail when it is big enough to be a block:
//!
//! ```text
//!   place(bp, asize):
//!
//!   ┌─────────────────────────────────────────────┐
//!   │                 free block                  │
//!   └─────────────────────────────────────────────┘
//!                         ▼
//!   ┌──────────────────────┬──────────────────────┐
//!   │  allocated (asize)   │  free remainder      │ → back into an index
//!   └──────────────────────┴──────────────────────┘
//! ```
//!
//! When nothing fits, the heap grows by at least one chunk. Freeing merges
//! the block with free physical neighbors before indexing it again.
//! Resizing tries, in order: shrinking in place, absorbing a free
//! successor, and growing the heap in place when the block is the last one;
//! only then does it move the data.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Fixed alignment**: Payloads are 8-byte aligned, nothing more
//! - **Grow-only heap**: Memory is never returned to the OS
//! - **Unix-only**: Requires `libc` (`mmap`, `sbrk`)
//!
//! ## Safety
//!
//! Freeing or resizing a pointer that was not returned by the same
//! allocator, or freeing twice, is undefined behavior; those entry points
//! are `unsafe`.

pub mod align;
mod allocator;
mod avl;
mod block;
mod check;
mod coalesce;
mod config;
mod error;
pub mod heap;
mod seglist;

pub use allocator::Allocator;
pub use block::{MIN_BLOCK_SIZE, OVERHEAD};
pub use check::HeapStats;
pub use config::{AllocatorConfig, CHUNK_SIZE, DEFAULT_CAPACITY};
pub use error::{CheckError, HeapError};
pub use heap::{HeapSource, ReservedHeap, SbrkHeap, program_break};
pub use seglist::SMALL_BLOCK_MAX;
