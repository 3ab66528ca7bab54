use hybrid_malloc::{Allocator, AllocatorConfig, SMALL_BLOCK_MAX};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
  Allocate(usize),
  Free(usize),
  Resize(usize, usize),
}

fn size_strategy() -> impl Strategy<Value = usize> {
  prop_oneof![
    4 => 1usize..256,
    2 => 256usize..SMALL_BLOCK_MAX,
    1 => SMALL_BLOCK_MAX..20_000,
  ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
  prop_oneof![
    3 => size_strategy().prop_map(Op::Allocate),
    2 => any::<usize>().prop_map(Op::Free),
    2 => (any::<usize>(), size_strategy()).prop_map(|(pick, size)| Op::Resize(pick, size)),
  ]
}

/// A live allocation and the byte pattern written into it.
struct Live {
  address: *mut u8,
  len: usize,
  tag: u8,
}

impl Live {
  unsafe fn paint(&self) {
    unsafe { self.address.write_bytes(self.tag, self.len) };
  }

  unsafe fn intact(
    &self,
    len: usize,
  ) -> bool {
    (0..len).all(|i| unsafe { self.address.add(i).read() } == self.tag)
  }
}

fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
  let mut allocator = Allocator::with_config(AllocatorConfig::default().with_capacity(64 << 20)).unwrap();
  let mut live: Vec<Live> = Vec::new();
  let mut next_tag = 1u8;

  for op in ops {
    match op {
      Op::Allocate(size) => {
        let address = allocator.allocate(size);
        prop_assert!(!address.is_null());
        prop_assert_eq!(address as usize % 8, 0);

        let block = Live {
          address,
          len: size,
          tag: next_tag,
        };
        unsafe { block.paint() };
        live.push(block);
      }
      Op::Free(pick) if !live.is_empty() => {
        let block = live.swap_remove(pick % live.len());
        unsafe { allocator.free(block.address) };
      }
      Op::Resize(pick, size) if !live.is_empty() => {
        let index = pick % live.len();
        let old = &live[index];
        let address = unsafe { allocator.resize(old.address, size) };
        prop_assert!(!address.is_null());

        let moved = Live {
          address,
          len: old.len,
          tag: old.tag,
        };
        let preserved = unsafe { moved.intact(old.len.min(size)) };
        prop_assert!(preserved, "resize to {} lost the payload prefix", size);

        let block = Live {
          address,
          len: size,
          tag: next_tag,
        };
        unsafe { block.paint() };
        live[index] = block;
      }
      Op::Free(_) | Op::Resize(..) => {}
    }

    next_tag = next_tag.wrapping_add(1).max(1);

    let stats = allocator.check();
    prop_assert!(stats.is_ok(), "{:?}", stats);
    prop_assert_eq!(stats.unwrap().allocated_blocks, live.len());

    for block in &live {
      let intact = unsafe { block.intact(block.len) };
      prop_assert!(intact, "block at {:p} was overwritten", block.address);
    }
  }

  for block in live.drain(..) {
    unsafe { allocator.free(block.address) };
  }

  let stats = allocator.check().unwrap();
  prop_assert_eq!(stats.allocated_blocks, 0);
  prop_assert_eq!(stats.free_blocks, 1);
  Ok(())
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(48))]
  #[test]
  fn random_sequences_keep_the_heap_consistent(ops in prop::collection::vec(op_strategy(), 1..120)) {
    run(ops)?;
  }
}

#[test]
fn interleaved_small_and_large_blocks() {
  let mut allocator = Allocator::with_capacity(8 << 20).unwrap();
  let sizes = [24, 5000, 300, 12_000, 64, 3100, 2000, 40_000];

  let blocks: Vec<*mut u8> = sizes.iter().map(|&size| allocator.allocate(size)).collect();
  assert!(blocks.iter().all(|address| !address.is_null()));

  // Free every other block so nothing coalesces yet.
  for address in blocks.iter().step_by(2) {
    unsafe { allocator.free(*address) };
  }
  let stats = allocator.check().unwrap();
  assert_eq!(stats.allocated_blocks, 4);

  for address in blocks.iter().skip(1).step_by(2) {
    unsafe { allocator.free(*address) };
  }
  let stats = allocator.check().unwrap();
  assert_eq!(stats.allocated_blocks, 0);
  assert_eq!(stats.free_blocks, 1);
  assert_eq!(stats.tree_blocks, 1);
}

#[test]
fn growing_resize_chain_preserves_prefix() {
  let mut allocator = Allocator::with_capacity(8 << 20).unwrap();
  let mut address = allocator.allocate(16);
  let mut len = 16;

  unsafe {
    for i in 0..len {
      address.add(i).write(i as u8);
    }

    for _ in 0..12 {
      let new_len = len * 2;
      address = allocator.resize(address, new_len);
      assert!(!address.is_null());
      for i in 0..len {
        assert_eq!(address.add(i).read(), i as u8);
      }
      for i in len..new_len {
        address.add(i).write(i as u8);
      }
      len = new_len;
      allocator.check().unwrap();
    }

    allocator.free(address);
  }
  assert_eq!(allocator.check().unwrap().allocated_blocks, 0);
}
