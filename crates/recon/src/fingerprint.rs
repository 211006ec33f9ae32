//! Near-duplicate detection across uploaded files.
//!
//! Each file is reduced to a set of 64-bit record hashes; two files are
//! compared by Jaccard similarity over those sets. The hash covers the
//! business key and every canonical value, so a re-export with one edited
//! row still scores close to 1.0 while a genuinely new export does not.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::key::BusinessKey;
use crate::model::{CanonicalField, RawRecord};

/// Set-of-record-hashes fingerprint for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    hashes: BTreeSet<u64>,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one reconciled record into the fingerprint.
    pub fn add(&mut self, key: &BusinessKey, record: &RawRecord) {
        self.hashes.insert(record_hash(key, record));
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Jaccard similarity in `[0.0, 1.0]`. Two empty fingerprints are
    /// identical by convention.
    pub fn jaccard(&self, other: &Fingerprint) -> f64 {
        if self.hashes.is_empty() && other.hashes.is_empty() {
            return 1.0;
        }
        let intersection = self.hashes.intersection(&other.hashes).count();
        let union = self.hashes.len() + other.hashes.len() - intersection;
        intersection as f64 / union as f64
    }
}

/// Stable 64-bit hash of one record's identity and canonical values.
fn record_hash(key: &BusinessKey, record: &RawRecord) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.as_str().as_bytes());
    for field in CanonicalField::ALL {
        if let Some(value) = record.get(field) {
            // field tag keeps (a="x") distinct from (b="x")
            hasher.update(&[0x1f]);
            hasher.update(field.as_str().as_bytes());
            hasher.update(&[0x1e]);
            hasher.update(value.as_bytes());
        }
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
