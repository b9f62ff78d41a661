//! # Hash Functions
//!
//! Key hashing and comparison helpers for [`HashMap`](super::HashMap).

use bytemuck::Pod;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Base of the polynomial string hash.
const STRING_HASH_BASE: u64 = 31;
/// Modulus of the polynomial string hash.
const STRING_HASH_MODULUS: u64 = 1_000_000_009;

/// Finalizer of SplitMix64. Spreads the low-entropy bits of sequential
/// integers (addresses, ids) over the whole word.
#[inline]
#[must_use]
pub const fn mix64(mut value: u64) -> u64 {
    value ^= value >> 30;
    value = value.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    value ^= value >> 27;
    value = value.wrapping_mul(0x94d0_49bb_1331_11eb);
    value ^ (value >> 31)
}

/// FNV-1a over raw bytes.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hashes a plain-old-data key by its bytes.
#[inline]
#[must_use]
pub fn hash_pod<K: Pod>(key: &K) -> u64 {
    fnv1a(bytemuck::bytes_of(key))
}

/// Compares two plain-old-data keys by their bytes.
#[inline]
#[must_use]
pub fn pod_eq<K: Pod>(a: &K, b: &K) -> bool {
    bytemuck::bytes_of(a) == bytemuck::bytes_of(b)
}

/// Polynomial rolling hash of a string, base 31 modulo `1e9 + 9`.
///
/// Characters are weighted by their distance from `'a'`, so lowercase names
/// hash densely. Used to key asset and glyph tables by name.
#[must_use]
pub fn hash_str(text: &str) -> u64 {
    let mut hash = 0u64;
    let mut power = 1u64;
    for byte in text.bytes() {
        // byte - 'a' + 1, kept non-negative modulo the modulus.
        let weight = (u64::from(byte) + STRING_HASH_MODULUS + 1 - u64::from(b'a')) % STRING_HASH_MODULUS;
        hash = (hash + weight * power) % STRING_HASH_MODULUS;
        power = (power * STRING_HASH_BASE) % STRING_HASH_MODULUS;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix64_spreads_sequential_values() {
        let a = mix64(0x1000);
        let b = mix64(0x1008);
        assert_ne!(a & 0xFF, b & 0xFF);
        assert_eq!(mix64(0), 0);
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_pod_helpers() {
        assert!(pod_eq(&7u32, &7u32));
        assert!(!pod_eq(&7u32, &8u32));
        assert_eq!(hash_pod(&7u64), fnv1a(&7u64.to_ne_bytes()));
    }

    #[test]
    fn test_hash_str() {
        assert_eq!(hash_str(""), 0);
        assert_eq!(hash_str("a"), 1);
        // b + c * 31
        assert_eq!(hash_str("bc"), 2 + 3 * 31);
        assert_ne!(hash_str("player.png"), hash_str("player.ogg"));
    }
}
