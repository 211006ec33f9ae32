//! Core reconciliation step: one incoming record against the current stored
//! snapshot for its business key.

use crate::classify::{diff_fields, dominant_type};
use crate::key::BusinessKey;
use crate::model::{
    CanonicalField, ChangeType, FieldDelta, MatchStatus, OrderChange, OrderSnapshot, RawRecord,
};

/// Outcome of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First sighting of the key. Snapshot is version 1, change is `new`.
    New {
        snapshot: OrderSnapshot,
        change: OrderChange,
    },
    /// The key exists and at least one field differs. Snapshot is the merged
    /// successor version, change carries the field deltas.
    Update {
        snapshot: OrderSnapshot,
        change: OrderChange,
    },
    /// Pure duplicate of the stored state. Nothing to write.
    Unchanged,
}

/// Reconcile an incoming record against the stored snapshot for `key`.
///
/// Versions are dense per key: `New` always yields version 1, `Update`
/// yields `stored.version + 1`. Incoming empty fields never erase stored
/// values; unmapped extras are merged additively.
pub fn reconcile(
    stored: Option<&OrderSnapshot>,
    incoming: &RawRecord,
    key: &BusinessKey,
) -> Resolution {
    match stored {
        None => first_sighting(incoming, key),
        Some(stored) => successor(stored, incoming),
    }
}

fn first_sighting(incoming: &RawRecord, key: &BusinessKey) -> Resolution {
    let snapshot = OrderSnapshot {
        business_key: key.as_str().to_string(),
        version: 1,
        fields: incoming.fields.clone(),
        extras: incoming.extras.clone(),
        match_status: MatchStatus::Unmatched,
    };
    let deltas = CanonicalField::ALL
        .iter()
        .filter_map(|&field| {
            incoming.get(field).map(|value| FieldDelta {
                field,
                before: None,
                after: value.to_string(),
                kind: ChangeType::New,
            })
        })
        .collect();
    let change = OrderChange {
        business_key: key.as_str().to_string(),
        version: 1,
        change_type: ChangeType::New,
        deltas,
        source_file_id: incoming.file_id,
        row_index: incoming.row_index,
    };
    Resolution::New { snapshot, change }
}

fn successor(stored: &OrderSnapshot, incoming: &RawRecord) -> Resolution {
    let deltas = diff_fields(stored, incoming);
    if deltas.is_empty() {
        return Resolution::Unchanged;
    }

    let mut fields = stored.fields.clone();
    for delta in &deltas {
        fields.insert(delta.field, delta.after.clone());
    }
    let mut extras = stored.extras.clone();
    for (name, value) in &incoming.extras {
        extras.insert(name.clone(), value.clone());
    }

    let version = stored.version + 1;
    let snapshot = OrderSnapshot {
        business_key: stored.business_key.clone(),
        version,
        fields,
        extras,
        match_status: stored.match_status,
    };
    let change = OrderChange {
        business_key: stored.business_key.clone(),
        version,
        change_type: dominant_type(&deltas),
        deltas,
        source_file_id: incoming.file_id,
        row_index: incoming.row_index,
    };
    Resolution::Update { snapshot, change }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(CanonicalField, &str)]) -> RawRecord {
        let mut rec = RawRecord::new(7, 2);
        for (field, value) in pairs {
            rec.set(*field, *value);
        }
        rec
    }

    fn key_of(rec: &RawRecord) -> BusinessKey {
        BusinessKey::derive(rec, "t.csv").unwrap()
    }

    #[test]
    fn first_sighting_is_version_one_with_empty_befores() {
        let rec = record(&[
            (CanonicalField::OrderNumber, "ORD-1"),
            (CanonicalField::OrderPrice, "12.50"),
        ]);
        let key = key_of(&rec);
        let Resolution::New { snapshot, change } = reconcile(None, &rec, &key) else {
            panic!("expected New");
        };
        assert_eq!(snapshot.version, 1);
        assert_eq!(change.version, 1);
        assert_eq!(change.change_type, ChangeType::New);
        assert!(change.deltas.iter().all(|d| d.before.is_none()));
        assert_eq!(change.deltas.len(), 2);
    }

    #[test]
    fn exact_duplicate_is_unchanged() {
        let rec = record(&[
            (CanonicalField::OrderNumber, "ORD-1"),
            (CanonicalField::OrderPrice, "12.50"),
        ]);
        let key = key_of(&rec);
        let Resolution::New { snapshot, .. } = reconcile(None, &rec, &key) else {
            panic!("expected New");
        };
        assert_eq!(reconcile(Some(&snapshot), &rec, &key), Resolution::Unchanged);
    }

    #[test]
    fn update_merges_and_bumps_version() {
        let first = record(&[
            (CanonicalField::OrderNumber, "ORD-1"),
            (CanonicalField::OrderPrice, "12.50"),
        ]);
        let key = key_of(&first);
        let Resolution::New { snapshot, .. } = reconcile(None, &first, &key) else {
            panic!("expected New");
        };

        let second = record(&[
            (CanonicalField::OrderNumber, "ORD-1"),
            (CanonicalField::OrderPrice, "13.00"),
            (CanonicalField::Address, "Depot 4"),
        ]);
        let Resolution::Update { snapshot: next, change } =
            reconcile(Some(&snapshot), &second, &key)
        else {
            panic!("expected Update");
        };
        assert_eq!(next.version, 2);
        assert_eq!(change.change_type, ChangeType::Updated);
        assert_eq!(next.get(CanonicalField::OrderPrice), Some("13.00"));
        assert_eq!(next.get(CanonicalField::Address), Some("Depot 4"));
        // untouched field survives the merge
        assert_eq!(next.get(CanonicalField::OrderNumber), Some("ORD-1"));
    }

    #[test]
    fn fills_only_classify_as_filled() {
        let first = record(&[(CanonicalField::OrderNumber, "ORD-2")]);
        let key = key_of(&first);
        let Resolution::New { snapshot, .. } = reconcile(None, &first, &key) else {
            panic!("expected New");
        };

        let second = record(&[
            (CanonicalField::OrderNumber, "ORD-2"),
            (CanonicalField::PaymentStatus, "paid"),
        ]);
        let Resolution::Update { change, .. } = reconcile(Some(&snapshot), &second, &key) else {
            panic!("expected Update");
        };
        assert_eq!(change.change_type, ChangeType::Filled);
    }

    #[test]
    fn incoming_empty_never_erases() {
        let first = record(&[
            (CanonicalField::OrderNumber, "ORD-3"),
            (CanonicalField::GoodsName, "Latte"),
        ]);
        let key = key_of(&first);
        let Resolution::New { snapshot, .. } = reconcile(None, &first, &key) else {
            panic!("expected New");
        };

        // second record omits goods_name entirely
        let second = record(&[
            (CanonicalField::OrderNumber, "ORD-3"),
            (CanonicalField::OrderPrice, "9.00"),
        ]);
        let Resolution::Update { snapshot: next, .. } =
            reconcile(Some(&snapshot), &second, &key)
        else {
            panic!("expected Update");
        };
        assert_eq!(next.get(CanonicalField::GoodsName), Some("Latte"));
    }

    #[test]
    fn extras_merge_additively() {
        let mut first = record(&[(CanonicalField::OrderNumber, "ORD-4")]);
        first.extras.insert("operator_note".into(), "check".into());
        let key = key_of(&first);
        let Resolution::New { snapshot, .. } = reconcile(None, &first, &key) else {
            panic!("expected New");
        };
        assert_eq!(snapshot.extras.get("operator_note").map(String::as_str), Some("check"));

        let mut second = record(&[
            (CanonicalField::OrderNumber, "ORD-4"),
            (CanonicalField::OrderPrice, "5.00"),
        ]);
        second.extras.insert("terminal_id".into(), "T-9".into());
        let Resolution::Update { snapshot: next, .. } =
            reconcile(Some(&snapshot), &second, &key)
        else {
            panic!("expected Update");
        };
        assert_eq!(next.extras.len(), 2);
        assert_eq!(next.extras.get("terminal_id").map(String::as_str), Some("T-9"));
    }
}
