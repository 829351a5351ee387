//! Streaming SHA-256 (FIPS 180-4) and the result-binding commitment.
//!
//! Ported from `original_source/src/verify/verify.c`'s state machine:
//! eight `u32` hash words, a 64-byte block buffer, and a running byte
//! count, updated one 64-byte block at a time. No allocation, no
//! external crate — SHA-256 appears nowhere else in the example pack,
//! so this is written fresh against FIPS 180-4 rather than adapted from
//! a neighbour.

use crate::types::Hash;

mod sha256;

pub use sha256::VerifyCtx;

/// One-shot convenience: hashes `data` in a single call.
pub fn compute_hash(data: &[u8]) -> Hash {
    let mut ctx = VerifyCtx::new();
    ctx.update(data);
    ctx.finish()
}

/// Constant-time digest comparison: XOR-accumulates every byte and
/// compares the accumulator to zero, so the result depends only on
/// whether the bytes are equal, never on the position of the first
/// difference.
pub fn hash_equal(a: &Hash, b: &Hash) -> bool {
    let mut diff = 0u8;
    for i in 0..32 {
        diff |= a.0[i] ^ b.0[i];
    }
    diff == 0
}

/// A persisted golden reference against which a freshly computed output
/// hash can be checked (spec.md §3 `GoldenRef`).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoldenRef {
    pub output_hash: Hash,
    pub sample_count: u32,
    pub output_size: u32,
    pub platform: arrayvec::ArrayString<32>,
}

/// `true` iff `computed` matches the golden's expected output hash.
pub fn golden_verify(computed: &Hash, golden: &GoldenRef) -> bool {
    hash_equal(computed, &golden.output_hash)
}

/// Domain-separation tag for [`result_binding`]. Never changes across
/// crate versions — changing it would silently break comparability with
/// previously persisted results.
const RESULT_BINDING_PREFIX: &[u8] = b"CB:RESULT:v1";

/// Computes the cryptographic commitment that binds measured performance
/// to the verified output hash (spec.md §4.2 "Result binding"):
///
/// ```text
/// SHA256(prefix ∥ output_hash ∥ platform[32] ∥ LE64(config_hash)
///        ∥ LE64(min) ∥ LE64(max) ∥ LE64(mean) ∥ LE64(p99) ∥ LE64(timestamp))
/// ```
///
/// `platform` is right-padded with NUL bytes to exactly 32 bytes,
/// truncated if longer. All multi-byte integers are little-endian.
#[allow(clippy::too_many_arguments)]
pub fn result_binding(
    output_hash: &Hash,
    platform: &str,
    config_hash: u64,
    min_ns: u64,
    max_ns: u64,
    mean_ns: u64,
    p99_ns: u64,
    timestamp_unix: u64,
) -> Hash {
    let mut ctx = VerifyCtx::new();
    ctx.update(RESULT_BINDING_PREFIX);
    ctx.update(&output_hash.0);

    let mut platform_padded = [0u8; 32];
    let platform_bytes = platform.as_bytes();
    let n = platform_bytes.len().min(32);
    platform_padded[..n].copy_from_slice(&platform_bytes[..n]);
    ctx.update(&platform_padded);

    ctx.update(&config_hash.to_le_bytes());
    ctx.update(&min_ns.to_le_bytes());
    ctx.update(&max_ns.to_le_bytes());
    ctx.update(&mean_ns.to_le_bytes());
    ctx.update(&p99_ns.to_le_bytes());
    ctx.update(&timestamp_unix.to_le_bytes());

    ctx.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_sensitive_to_timestamp() {
        let oh = Hash([7u8; 32]);
        let a = result_binding(&oh, "x86_64", 0, 100, 200, 150, 190, 1_000);
        let b = result_binding(&oh, "x86_64", 0, 100, 200, 150, 190, 1_001);
        assert!(!hash_equal(&a, &b));
    }

    #[test]
    fn binding_sensitive_to_output_hash() {
        let a = result_binding(&Hash([1u8; 32]), "x86_64", 0, 1, 2, 1, 2, 0);
        let b = result_binding(&Hash([2u8; 32]), "x86_64", 0, 1, 2, 1, 2, 0);
        assert!(!hash_equal(&a, &b));
    }

    #[test]
    fn hash_equal_is_reflexive() {
        let h = compute_hash(b"abc");
        assert!(hash_equal(&h, &h));
    }

    #[test]
    fn golden_verify_matches_on_equal_hash() {
        let h = compute_hash(b"payload");
        let golden = GoldenRef {
            output_hash: h,
            sample_count: 10,
            output_size: 1024,
            platform: arrayvec::ArrayString::from("x86_64").unwrap(),
        };
        assert!(golden_verify(&h, &golden));
        assert!(!golden_verify(&compute_hash(b"other"), &golden));
    }
}
