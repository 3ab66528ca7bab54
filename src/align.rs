/// Alignment unit of every block size and every payload address.
pub const ALIGNMENT: usize = 8;

/// Rounds a size up to the allocator's alignment unit ([`ALIGNMENT`]).
///
/// # Examples
///
/// ```rust
/// use hybrid_malloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds `value` up to a multiple of `to`, which must be a power of two.
///
/// ```rust
/// use hybrid_malloc::align_to;
///
/// assert_eq!(align_to!(4097, 4096), 8192);
/// assert_eq!(align_to!(24, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}

/// Overflow-checked version of [`align!`], for sizes coming from callers.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(bumped) => Some(bumped & !(ALIGNMENT - 1)),
    None => None,
  }
}
