//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that workloads revisit keys and
//! exercise updates and deletes of present entries.

use btree::{MAX_KEY_SIZE, MAX_VAL_SIZE};
use proptest::prelude::*;

/// One step of a key/value workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Set(Vec<u8>, Vec<u8>),
    Del(Vec<u8>),
}

/// Short keys over `a..=d`, including the empty key.
pub fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'd', 0..6)
}

/// Mostly small values, occasionally up to the maximum size.
pub fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        8 => prop::collection::vec(any::<u8>(), 0..64),
        2 => prop::collection::vec(any::<u8>(), 500..1500),
        1 => prop::collection::vec(any::<u8>(), MAX_VAL_SIZE..=MAX_VAL_SIZE),
    ]
}

/// Keys long enough that a few of them fill a page.
pub fn arb_wide_key() -> impl Strategy<Value = Vec<u8>> {
    (b'a'..=b'h', 100..=MAX_KEY_SIZE).prop_map(|(first, len)| {
        let mut key = vec![b'k'; len];
        key[0] = first;
        key
    })
}

/// A workload of up to `max_len` operations, biased towards inserts.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_ops;
///
/// proptest! {
///     #[test]
///     fn workload_is_bounded(ops in arb_ops(20)) {
///         prop_assert!(ops.len() <= 20);
///     }
/// }
/// ```
pub fn arb_ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    let key = prop_oneof![3 => arb_key(), 1 => arb_wide_key()];
    let op = prop_oneof![
        3 => (key.clone(), arb_value()).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key.prop_map(Op::Del),
    ];
    prop::collection::vec(op, 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_entries_respect_limits(ops in arb_ops(30)) {
            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        prop_assert!(k.len() <= MAX_KEY_SIZE);
                        prop_assert!(v.len() <= MAX_VAL_SIZE);
                    }
                    Op::Del(k) => prop_assert!(k.len() <= MAX_KEY_SIZE),
                }
            }
        }
    }
}
