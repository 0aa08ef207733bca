//! Unit rounding: everything the allocator hands out is measured in whole
//! multiples of [`UNIT`](crate::UNIT).

use crate::consts::{HEADER_BYTES, MIN_BLOCK_BYTES, UNIT, UNIT_LOG2};
use crate::AllocError;

pub(crate) const fn units_to_bytes(units: usize) -> usize {
    units << UNIT_LOG2
}

pub(crate) const fn bytes_to_units(bytes: usize) -> usize {
    bytes >> UNIT_LOG2
}

/// Rounds `n` up to a whole number of units; fails instead of wrapping.
pub(crate) fn round_to_units(n: usize) -> Result<usize, AllocError> {
    n.checked_add(UNIT - 1)
        .map(|n| n & !(UNIT - 1))
        .ok_or(AllocError::SizeOverflow)
}

/// Whole block span needed to serve a payload of `len` bytes: the header is
/// added, the sum is unit-rounded and the result never dips below the
/// minimum block size.
pub(crate) fn block_size_for(len: usize) -> Result<usize, AllocError> {
    let padded = len
        .checked_add(HEADER_BYTES)
        .ok_or(AllocError::SizeOverflow)?;
    let amt = round_to_units(padded)?;

    Ok(if amt < MIN_BLOCK_BYTES {
        MIN_BLOCK_BYTES
    } else {
        amt
    })
}
