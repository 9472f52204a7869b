//! Constant-time secret comparison

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare a candidate against an expected secret without leaking timing.
///
/// Both inputs are hashed to fixed-length digests first, so a length
/// mismatch is not observable before the byte-wise comparison.
pub fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    let candidate = Sha256::digest(candidate.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    candidate.as_slice().ct_eq(expected.as_slice()).into()
}
