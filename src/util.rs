/// Find Last Set: index of the most significant set bit. `x` must be nonzero.
pub(crate) fn fls(x: usize) -> u32 {
    debug_assert!(x != 0);

    usize::BITS - 1 - x.leading_zeros()
}

/// Find First Set: index of the least significant set bit. `x` must be nonzero.
pub(crate) fn ffs(x: usize) -> u32 {
    debug_assert!(x != 0);

    x.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::{ffs, fls};

    #[test]
    fn bit_scans() {
        assert_eq!(fls(1), 0);
        assert_eq!(fls(0b110011), 5);
        assert_eq!(fls(usize::max_value()), usize::BITS - 1);

        assert_eq!(ffs(1), 0);
        assert_eq!(ffs(0b110000), 4);
        assert_eq!(ffs(1 << (usize::BITS - 1)), usize::BITS - 1);
    }
}
