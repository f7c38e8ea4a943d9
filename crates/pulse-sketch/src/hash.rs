//! Stable 64-bit hashing for sketch inputs.
//!
//! Persisted sketches are merged across process restarts, so the hash must
//! not depend on a per-process seed.

/// Hashes a user identifier with the splitmix64 finalizer.
#[must_use]
pub fn hash_user_id(user_id: u32) -> u64 {
    let mut z = u64::from(user_id).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
