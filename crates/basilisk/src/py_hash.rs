//! Hashing helpers that keep `hash(a) == hash(b)` whenever `a == b`, even
//! across `Value` variants that CPython treats as numerically equal
//! (`1 == 1.0 == True`).

use std::hash::{Hash, Hasher};

use ahash::AHasher;

/// Hashes an `i64` the way every numeric `Value` variant must: floats that
/// represent an exact integer hash identically to that integer, and `bool`
/// hashes identically to `0`/`1`.
pub(crate) fn hash_i64(value: i64) -> u64 {
    let mut hasher = AHasher::default();
    // A fixed discriminant tag keeps this disjoint from string/bytes hashes
    // that happen to collide on the raw bytes.
    0u8.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hashes a float, folding exact-integer floats onto [`hash_i64`] so that
/// `hash(1.0) == hash(1) == hash(True)`.
///
/// `NaN` is still hashable here (it must be usable as a dict key / set
/// member), it just never compares equal to anything including itself, so
/// two `NaN` keys land in the same bucket but are never unified.
pub(crate) fn hash_f64(value: f64) -> u64 {
    if value.is_nan() {
        let mut hasher = AHasher::default();
        3u8.hash(&mut hasher);
        return hasher.finish();
    }
    if value.fract() == 0.0 && value.abs() < 9_223_372_036_854_775_808.0 {
        #[expect(clippy::cast_possible_truncation, reason = "checked against i64 bounds above")]
        return hash_i64(value as i64);
    }
    let mut hasher = AHasher::default();
    0u8.hash(&mut hasher);
    value.to_bits().hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn hash_str(value: &str) -> u64 {
    let mut hasher = AHasher::default();
    1u8.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn hash_bytes(value: &[u8]) -> u64 {
    let mut hasher = AHasher::default();
    2u8.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn hash_bool(value: bool) -> u64 {
    hash_i64(i64::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_bool_agree() {
        assert_eq!(hash_i64(1), hash_bool(true));
        assert_eq!(hash_i64(0), hash_bool(false));
    }

    #[test]
    fn int_and_float_agree() {
        assert_eq!(hash_i64(7), hash_f64(7.0));
    }

    #[test]
    fn nan_is_hashable_but_never_unifies() {
        // Hashable (used as a dict key), just never equal to anything.
        let _ = hash_f64(f64::NAN);
    }
}
