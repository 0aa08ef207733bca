use core::mem;

/// All block boundaries are aligned to this many bytes and every block size
/// is a multiple of it; this is also the minimum alignment of all payloads.
pub const UNIT: usize = mem::size_of::<usize>();

pub(crate) const UNIT_LOG2: u32 = UNIT.trailing_zeros();

/// Bytes of metadata preceding every payload: one boundary-tag word.
pub(crate) const HEADER_BYTES: usize = UNIT;

/// Smallest span a block may occupy: header, free-list node and footer.
pub const MIN_BLOCK_BYTES: usize = crate::units::units_to_bytes(4);

/// Floor applied to grow-callback requests when none is configured.
pub const DEFAULT_GROW_BYTES: usize = 4096;

// The recommended SLI of 4 gives 16 second-level buckets per power of two.
pub(crate) const SLI_LOG2: u32 = 4;
pub(crate) const SL_LEN: usize = 1 << SLI_LOG2;

// For small sizes splitting a power-of-two range into `SL_LEN` sub-ranges
// makes no sense; everything below `SIZE_THRESHOLD` goes into a single
// linearly-indexed first row.
pub(crate) const FLI_SHIFT: u32 = UNIT_LOG2 + SLI_LOG2;
pub(crate) const SIZE_THRESHOLD: usize = 1 << FLI_SHIFT;

// One row per power of two from `SIZE_THRESHOLD` up to the top bit of
// `usize`, plus the merged linear row.
pub(crate) const FL_LEN: usize = (usize::BITS - FLI_SHIFT) as usize + 1;
