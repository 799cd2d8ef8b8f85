//! Injectable identifier and randomness sources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::RngCore;
use uuid::Uuid;

/// Generator for entity and session identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Shared handle to an id generator.
pub type SharedIdGenerator = Arc<dyn IdGenerator>;

/// Random UUIDv4 identifiers. Session ids come from here, so the generator
/// must be backed by a CSPRNG in production assemblies.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic `prefix-N` identifiers for tests.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceIdGenerator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

/// Source of raw random bytes for MFA secrets and backup codes.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Shared handle to a randomness source.
pub type SharedRandom = Arc<dyn RandomSource>;

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }
}

/// Fixed byte pattern for tests that need reproducible secrets.
#[derive(Debug)]
pub struct FixedRandom {
    bytes: Vec<u8>,
}

impl FixedRandom {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl RandomSource for FixedRandom {
    fn fill(&self, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.bytes[i % self.bytes.len()];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidGenerator;
        assert_ne!(ids.generate(), ids.generate());
    }

    #[test]
    fn sequence_ids_are_ordered() {
        let ids = SequenceIdGenerator::new("s");
        assert_eq!(ids.generate(), "s-0");
        assert_eq!(ids.generate(), "s-1");
    }

    #[test]
    fn fixed_random_repeats_pattern() {
        let src = FixedRandom::new(vec![1, 2, 3]);
        let mut buf = [0u8; 5];
        src.fill(&mut buf);
        assert_eq!(buf, [1, 2, 3, 1, 2]);
    }
}
