//! Idempotency keys and request fingerprints

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::ledger::OwnerId;

const MAX_KEY_LEN: usize = 128;

/// Caller- or engine-supplied deduplication key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ledger request id: the key qualified by the owner that supplied it
    pub fn request_id(&self, owner: OwnerId) -> String {
        format!("{}:{}", owner, self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':');
        if s.is_empty() || s.len() > MAX_KEY_LEN || !s.chars().all(valid_char) {
            return Err(EngineError::MalformedIdempotencyKey);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-side key generator
///
/// Format: `idk-{sequence:012x}-{128 random bits as hex}`. The sequence is
/// process-monotonic; the random part comes from the OS CSPRNG so that keys
/// from concurrent bursts, other processes or restarts cannot collide.
#[derive(Debug, Default)]
pub struct KeyGenerator {
    sequence: AtomicU64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> IdempotencyKey {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut entropy = [0u8; 16];
        OsRng.fill_bytes(&mut entropy);
        IdempotencyKey(format!("idk-{:012x}-{}", seq, hex::encode(entropy)))
    }
}

/// Hash of a request's semantic fields
///
/// Detects reuse of one key for a different payload. Secrets (PINs) are
/// never part of a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint an ordered list of fields
    pub fn of(fields: &[&str]) -> Self {
        let mut ctx = md5::Context::new();
        for field in fields {
            ctx.consume(field.len().to_le_bytes());
            ctx.consume(field.as_bytes());
        }
        Self(ctx.compute().0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
