//! Single-use backup codes.
//!
//! Codes are generated once, shown to the user, and stored only as SHA-256
//! digests. Matching walks every stored hash in constant time per
//! comparison so a lookup does not reveal which slot matched.

use constant_time_eq::constant_time_eq;
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::models::mfa::BackupCode;
use crate::random::RandomSource;

// 32 symbols, so one random byte maps to one symbol without bias.
// 0/O and 1/I are excluded to keep the codes transcribable.
const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate `count` plaintext codes of `length` symbols each.
pub fn generate_codes(random: &dyn RandomSource, count: usize, length: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let mut buf = vec![0u8; length];
            random.fill(&mut buf);
            buf.iter()
                .map(|b| CODE_ALPHABET[(b % 32) as usize] as char)
                .collect()
        })
        .collect()
}

/// Lowercase hex SHA-256 of a plaintext code.
#[must_use]
pub fn hash_code(code: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(code.as_bytes()))
}

/// Index of the stored code matching `code`, used or not.
#[must_use]
pub fn find_match(codes: &[BackupCode], code: &str) -> Option<usize> {
    let candidate = hash_code(code);
    let mut found = None;
    for (i, stored) in codes.iter().enumerate() {
        if constant_time_eq(stored.hash.as_bytes(), candidate.as_bytes()) && found.is_none() {
            found = Some(i);
        }
    }
    found
}
