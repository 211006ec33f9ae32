//! Field-level diffing and the four-way change taxonomy.
//!
//! Disambiguation rule: a difference in a primary field
//! (`order_price`, `goods_name`, `machine_code`) is `updated`; a difference
//! in any other canonical field is `changed`; an empty stored field gaining
//! a value is `filled`. The change row's type is the dominant category:
//! `updated` > `changed` > `filled`. Incoming empty values never erase
//! stored values.

use crate::model::{CanonicalField, ChangeType, FieldDelta, OrderSnapshot, RawRecord};

/// Compute the per-field deltas between a stored snapshot and an incoming
/// record. Empty result means the record is a pure duplicate.
pub fn diff_fields(stored: &OrderSnapshot, incoming: &RawRecord) -> Vec<FieldDelta> {
    let mut deltas = Vec::new();

    for field in CanonicalField::ALL {
        let Some(new_value) = incoming.get(field) else {
            continue; // incoming empty never erases stored values
        };

        match stored.get(field) {
            None => deltas.push(FieldDelta {
                field,
                before: None,
                after: new_value.to_string(),
                kind: ChangeType::Filled,
            }),
            Some(old_value) if old_value != new_value => deltas.push(FieldDelta {
                field,
                before: Some(old_value.to_string()),
                after: new_value.to_string(),
                kind: if field.is_primary() {
                    ChangeType::Updated
                } else {
                    ChangeType::Changed
                },
            }),
            Some(_) => {}
        }
    }

    deltas
}

/// Dominant change type for one change row. `filled` only wins when zero
/// fields were updated or changed.
pub fn dominant_type(deltas: &[FieldDelta]) -> ChangeType {
    let mut saw_changed = false;
    for delta in deltas {
        match delta.kind {
            ChangeType::Updated => return ChangeType::Updated,
            ChangeType::Changed => saw_changed = true,
            ChangeType::Filled | ChangeType::New => {}
        }
    }
    if saw_changed {
        ChangeType::Changed
    } else {
        ChangeType::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchStatus;
    use std::collections::BTreeMap;

    fn snapshot(pairs: &[(CanonicalField, &str)]) -> OrderSnapshot {
        let mut fields = BTreeMap::new();
        for (field, value) in pairs {
            fields.insert(*field, (*value).to_string());
        }
        OrderSnapshot {
            business_key: "K".into(),
            version: 1,
            fields,
            extras: BTreeMap::new(),
            match_status: MatchStatus::Unmatched,
        }
    }

    fn record(pairs: &[(CanonicalField, &str)]) -> RawRecord {
        let mut rec = RawRecord::new(1, 0);
        for (field, value) in pairs {
            rec.set(*field, *value);
        }
        rec
    }

    #[test]
    fn identical_values_produce_no_deltas() {
        let stored = snapshot(&[(CanonicalField::OrderPrice, "10")]);
        let incoming = record(&[(CanonicalField::OrderPrice, "10")]);
        assert!(diff_fields(&stored, &incoming).is_empty());
    }

    #[test]
    fn mixed_fill_and_change_in_one_diff() {
        // stored {price:"1", address:empty} vs incoming {price:"2", address:"3"}
        let stored = snapshot(&[(CanonicalField::OrderPrice, "1")]);
        let incoming = record(&[
            (CanonicalField::OrderPrice, "2"),
            (CanonicalField::Address, "3"),
        ]);
        let deltas = diff_fields(&stored, &incoming);
        assert_eq!(deltas.len(), 2);

        let price = deltas.iter().find(|d| d.field == CanonicalField::OrderPrice).unwrap();
        assert_eq!(price.kind, ChangeType::Updated);
        assert_eq!(price.before.as_deref(), Some("1"));
        assert_eq!(price.after, "2");

        let addr = deltas.iter().find(|d| d.field == CanonicalField::Address).unwrap();
        assert_eq!(addr.kind, ChangeType::Filled);
        assert_eq!(addr.before, None);
    }

    #[test]
    fn incoming_empty_does_not_erase() {
        let stored = snapshot(&[(CanonicalField::GoodsName, "Espresso")]);
        let incoming = record(&[(CanonicalField::OrderPrice, "10")]);
        let deltas = diff_fields(&stored, &incoming);
        assert!(deltas.iter().all(|d| d.field != CanonicalField::GoodsName));
    }

    #[test]
    fn non_primary_difference_is_changed() {
        let stored = snapshot(&[(CanonicalField::PaymentStatus, "pending")]);
        let incoming = record(&[(CanonicalField::PaymentStatus, "paid")]);
        let deltas = diff_fields(&stored, &incoming);
        assert_eq!(deltas[0].kind, ChangeType::Changed);
    }

    #[test]
    fn dominant_prefers_updated_then_changed_then_filled() {
        let filled = FieldDelta {
            field: CanonicalField::Address,
            before: None,
            after: "x".into(),
            kind: ChangeType::Filled,
        };
        let changed = FieldDelta {
            field: CanonicalField::PaymentStatus,
            before: Some("a".into()),
            after: "b".into(),
            kind: ChangeType::Changed,
        };
        let updated = FieldDelta {
            field: CanonicalField::OrderPrice,
            before: Some("1".into()),
            after: "2".into(),
            kind: ChangeType::Updated,
        };

        assert_eq!(dominant_type(&[filled.clone()]), ChangeType::Filled);
        assert_eq!(dominant_type(&[filled.clone(), changed.clone()]), ChangeType::Changed);
        assert_eq!(dominant_type(&[filled, changed, updated]), ChangeType::Updated);
    }
}
