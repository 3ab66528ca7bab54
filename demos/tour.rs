use std::{io::Read, ptr};

use hybrid_malloc::{Allocator, AllocatorConfig, HeapStats, SbrkHeap, program_break};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the heap.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn print_stats(
  label: &str,
  stats: &HeapStats,
) {
  println!(
    "[{}] heap = {} B | allocated: {} blocks / {} B | free: {} blocks / {} B (lists {}, tree {}, height {}) | largest free = {} B",
    label,
    stats.heap_bytes,
    stats.allocated_blocks,
    stats.allocated_bytes,
    stats.free_blocks,
    stats.free_bytes,
    stats.listed_blocks,
    stats.tree_blocks,
    stats.tree_height,
    stats.largest_free,
  );
}

fn main() {
  // The default allocator lives in a private mmap reservation, so the
  // program break does not move for it.
  let mut allocator = Allocator::with_capacity(16 << 20).expect("reserve heap");

  unsafe {
    print_stats("start", &allocator.check().unwrap());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) A small block comes out of the segregated lists.
    // --------------------------------------------------------------------
    let small = allocator.allocate(24) as *mut u32;
    small.write(0xDEADBEEF);
    println!("\n[1] allocate(24) -> {:p}, value = 0x{:X}", small, small.read());
    print_stats("1", &allocator.check().unwrap());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Large blocks, freed, land in the AVL tree.
    // --------------------------------------------------------------------
    let sizes = [4096, 8192, 12288];
    let large: Vec<*mut u8> = sizes.iter().map(|&size| allocator.allocate(size)).collect();
    let guard = allocator.allocate(16);
    for (address, size) in large.iter().zip(sizes) {
      println!("[2] allocate({size}) -> {address:p}");
    }
    allocator.free(large[0]);
    allocator.free(large[2]);
    print_stats("2", &allocator.check().unwrap());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Best fit: a 5000 byte request takes the smallest block that fits.
    // --------------------------------------------------------------------
    let fit = allocator.allocate(5000);
    println!(
      "\n[3] allocate(5000) -> {:p} (the 12288 block at {:p}? {})",
      fit,
      large[2],
      fit == large[2]
    );
    print_stats("3", &allocator.check().unwrap());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Freeing the middle block merges it with its free neighbor.
    // --------------------------------------------------------------------
    allocator.free(large[1]);
    println!("\n[4] free({:p})", large[1]);
    print_stats("4", &allocator.check().unwrap());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Resize keeps the data and grows in place when it can.
    // --------------------------------------------------------------------
    let bytes = allocator.allocate(64);
    ptr::write_bytes(bytes, 0xAB, 64);
    let grown = allocator.resize(bytes, 1024);
    println!(
      "\n[5] resize({:p}, 1024) -> {:p}, moved: {}, first byte = 0x{:X}, usable = {}",
      bytes,
      grown,
      grown != bytes,
      grown.read(),
      allocator.usable_size(ptr::NonNull::new(grown).unwrap()),
    );
    print_stats("5", &allocator.check().unwrap());
    block_until_enter_pressed();

    allocator.free(grown);
    allocator.free(fit);
    allocator.free(guard);
    allocator.free(small as *mut u8);
    print_stats("end", &allocator.check().unwrap());
  }

  // ----------------------------------------------------------------------
  // 6) The same allocator on top of the real program break.
  // ----------------------------------------------------------------------
  print_program_break("before sbrk heap");
  match Allocator::new(SbrkHeap::new(), AllocatorConfig::default()) {
    Ok(mut brk) => {
      let big = brk.allocate(64 * 1024);
      println!("\n[6] allocate(64 KiB) on the program break -> {big:p}");
      print_program_break("after large alloc");
      unsafe { brk.free(big) };
      print_stats("6", &brk.check().unwrap());
    }
    Err(err) => println!("\n[6] sbrk heap unavailable: {err}"),
  }
  block_until_enter_pressed();

  println!("\n[7] End of example. Process will exit and the OS will reclaim all memory.");
}
