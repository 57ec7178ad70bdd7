//! Deterministic keys and payloads.

/// Big-endian encoding of `i`, so numeric and byte order agree.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// assert!(be_key(9) < be_key(10));
/// assert_eq!(be_key(1), vec![0, 0, 0, 1]);
/// ```
pub fn be_key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

/// A `len`-byte value whose content depends on `seed`.
///
/// Distinct seeds give distinct values, which catches a lookup returning a
/// neighbour's value.
pub fn payload(seed: u32, len: usize) -> Vec<u8> {
    let bytes = seed.to_le_bytes();
    (0..len).map(|i| bytes[i % 4] ^ (i as u8)).collect()
}
