use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Canonical fields
// ---------------------------------------------------------------------------

/// The fixed normalized attribute set every adapter maps source columns onto.
///
/// Columns that match none of these stay in the record's raw-extras bag and
/// are excluded from diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    OrderNumber,
    MachineCode,
    Address,
    GoodsName,
    TasteName,
    OrderType,
    OrderResource,
    OrderPrice,
    CreationTime,
    PayingTime,
    BrewingTime,
    DeliveryTime,
    RefundTime,
    PaymentStatus,
    BrewStatus,
    PaymentType,
    Reason,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 17] = [
        Self::OrderNumber,
        Self::MachineCode,
        Self::Address,
        Self::GoodsName,
        Self::TasteName,
        Self::OrderType,
        Self::OrderResource,
        Self::OrderPrice,
        Self::CreationTime,
        Self::PayingTime,
        Self::BrewingTime,
        Self::DeliveryTime,
        Self::RefundTime,
        Self::PaymentStatus,
        Self::BrewStatus,
        Self::PaymentType,
        Self::Reason,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderNumber => "order_number",
            Self::MachineCode => "machine_code",
            Self::Address => "address",
            Self::GoodsName => "goods_name",
            Self::TasteName => "taste_name",
            Self::OrderType => "order_type",
            Self::OrderResource => "order_resource",
            Self::OrderPrice => "order_price",
            Self::CreationTime => "creation_time",
            Self::PayingTime => "paying_time",
            Self::BrewingTime => "brewing_time",
            Self::DeliveryTime => "delivery_time",
            Self::RefundTime => "refund_time",
            Self::PaymentStatus => "payment_status",
            Self::BrewStatus => "brew_status",
            Self::PaymentType => "payment_type",
            Self::Reason => "reason",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Primary business fields. A difference in one of these classifies the
    /// change as `updated`; every other field difference is `changed`.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::OrderPrice | Self::GoodsName | Self::MachineCode)
    }

    /// Timestamp-valued fields (normalized to ISO 8601 by the adapters).
    pub fn is_timestamp(&self) -> bool {
        matches!(
            self,
            Self::CreationTime
                | Self::PayingTime
                | Self::BrewingTime
                | Self::DeliveryTime
                | Self::RefundTime
        )
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One normalized row from any source file. Ephemeral: produced by an
/// adapter, consumed by the engine, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub file_id: i64,
    pub row_index: usize,
    pub fields: BTreeMap<CanonicalField, String>,
    /// Unmapped source columns. Carried on snapshots for audit, excluded
    /// from diffing and classification.
    pub extras: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(file_id: i64, row_index: usize) -> Self {
        Self {
            file_id,
            row_index,
            fields: BTreeMap::new(),
            extras: BTreeMap::new(),
        }
    }

    /// Non-empty value for a canonical field, if present.
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: CanonicalField, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.fields.insert(field, value.trim().to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger entities
// ---------------------------------------------------------------------------

/// Match status of a ledger order against external payment sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Unmatched,
    Matched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
        }
    }
}

/// Full-snapshot version of an order. Append-only: a new snapshot is written
/// for every accepted change, existing rows are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub business_key: String,
    pub version: i64,
    pub fields: BTreeMap<CanonicalField, String>,
    pub extras: BTreeMap<String, String>,
    pub match_status: MatchStatus,
}

impl OrderSnapshot {
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str).filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Change classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First sighting of the business key (version 1, empty befores).
    New,
    /// A primary field differs from the stored non-empty value.
    Updated,
    /// A stored empty field received a value and nothing else differs
    /// beyond other fills.
    Filled,
    /// A non-primary field differs from the stored non-empty value.
    Changed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Filled => "filled",
            Self::Changed => "changed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "new" => Some(Self::New),
            "updated" => Some(Self::Updated),
            "filled" => Some(Self::Filled),
            "changed" => Some(Self::Changed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field before/after pair inside one [`OrderChange`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub field: CanonicalField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    pub after: String,
    pub kind: ChangeType,
}

/// Immutable audit record for one accepted (order, incoming record) pair.
/// Totally ordered per business key by `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderChange {
    pub business_key: String,
    pub version: i64,
    pub change_type: ChangeType,
    pub deltas: Vec<FieldDelta>,
    pub source_file_id: i64,
    pub row_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_field_names_round_trip() {
        for field in CanonicalField::ALL {
            assert_eq!(CanonicalField::from_name(field.as_str()), Some(field));
        }
        assert_eq!(CanonicalField::from_name("not_a_field"), None);
    }

    #[test]
    fn primary_fields() {
        assert!(CanonicalField::OrderPrice.is_primary());
        assert!(CanonicalField::GoodsName.is_primary());
        assert!(CanonicalField::MachineCode.is_primary());
        assert!(!CanonicalField::Address.is_primary());
        assert!(!CanonicalField::PaymentType.is_primary());
    }

    #[test]
    fn record_set_trims_and_drops_empty() {
        let mut rec = RawRecord::new(1, 0);
        rec.set(CanonicalField::OrderNumber, "  A-1  ");
        rec.set(CanonicalField::Address, "   ");
        assert_eq!(rec.get(CanonicalField::OrderNumber), Some("A-1"));
        assert_eq!(rec.get(CanonicalField::Address), None);
    }

    #[test]
    fn change_type_round_trip() {
        for ct in [ChangeType::New, ChangeType::Updated, ChangeType::Filled, ChangeType::Changed] {
            assert_eq!(ChangeType::from_name(ct.as_str()), Some(ct));
        }
    }
}
