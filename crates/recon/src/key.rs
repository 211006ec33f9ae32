use crate::error::ReconError;
use crate::model::{CanonicalField, RawRecord};

/// Separator between the fallback key components. Unit Separator keeps the
/// canonical form unambiguous for any printable machine code.
const KEY_SEP: char = '\u{1f}';

/// Canonical business key identifying "the same order" across uploads.
///
/// Derived from `order_number` when present, otherwise from the
/// `(machine_code, creation_time)` fallback pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusinessKey(String);

impl BusinessKey {
    pub fn derive(record: &RawRecord, file_name: &str) -> Result<Self, ReconError> {
        if let Some(number) = record.get(CanonicalField::OrderNumber) {
            return Ok(Self(number.to_string()));
        }

        let machine = record.get(CanonicalField::MachineCode);
        let created = record.get(CanonicalField::CreationTime);
        match (machine, created) {
            (Some(machine), Some(created)) => {
                Ok(Self(format!("{machine}{KEY_SEP}{created}")))
            }
            _ => Err(ReconError::UnresolvableKey {
                file: file_name.to_string(),
                row: record.row_index,
            }),
        }
    }

    /// Restore a key from its stored canonical form.
    pub fn from_canonical(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable lane index for per-key sequential processing. All records
    /// sharing a key hash to the same lane regardless of source file.
    pub fn lane(&self, lanes: usize) -> usize {
        debug_assert!(lanes > 0);
        let hash = blake3::hash(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(bytes) % lanes as u64) as usize
    }
}

impl std::fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(pairs: &[(CanonicalField, &str)]) -> RawRecord {
        let mut rec = RawRecord::new(1, 3);
        for (field, value) in pairs {
            rec.set(*field, *value);
        }
        rec
    }

    #[test]
    fn order_number_wins() {
        let rec = record_with(&[
            (CanonicalField::OrderNumber, "ORD-9"),
            (CanonicalField::MachineCode, "M1"),
            (CanonicalField::CreationTime, "2026-01-15T10:00:00"),
        ]);
        let key = BusinessKey::derive(&rec, "a.csv").unwrap();
        assert_eq!(key.as_str(), "ORD-9");
    }

    #[test]
    fn fallback_pair() {
        let rec = record_with(&[
            (CanonicalField::MachineCode, "M1"),
            (CanonicalField::CreationTime, "2026-01-15T10:00:00"),
        ]);
        let key = BusinessKey::derive(&rec, "a.csv").unwrap();
        assert!(key.as_str().starts_with("M1"));
        assert!(key.as_str().ends_with("2026-01-15T10:00:00"));
    }

    #[test]
    fn unresolvable_without_fallback_pair() {
        let rec = record_with(&[(CanonicalField::MachineCode, "M1")]);
        let err = BusinessKey::derive(&rec, "a.csv").unwrap_err();
        assert_eq!(err, ReconError::UnresolvableKey { file: "a.csv".into(), row: 3 });
    }

    #[test]
    fn lane_is_stable_and_bounded() {
        let key = BusinessKey::from_canonical("ORD-9");
        let lane = key.lane(8);
        assert!(lane < 8);
        assert_eq!(lane, BusinessKey::from_canonical("ORD-9").lane(8));
    }
}
