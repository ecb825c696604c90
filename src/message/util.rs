/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Read an f64 out of the first eight (little-endian) bytes of a buffer.
/// Short buffers decode to NaN, which every reduction treats as poisoned.
///
pub fn f64_from_bytes(bytes: &[u8]) -> f64 {
    bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(f64::from_le_bytes)
        .unwrap_or(f64::NAN)
}

/// Read a bool out of the first byte of a buffer.
///
pub fn bool_from_bytes(bytes: &[u8]) -> bool {
    bytes.first().map_or(false, |b| *b != 0)
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{ceil_log2, f64_from_bytes};

    #[test]
    fn ceil_log2_rounds_up() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn short_buffer_decodes_to_nan() {
        assert!(f64_from_bytes(&[1, 2, 3]).is_nan());
        assert_eq!(f64_from_bytes(&2.5f64.to_le_bytes()), 2.5);
    }
}
