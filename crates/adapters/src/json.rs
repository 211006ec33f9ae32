//! JSON adapter. Accepts an array of objects, or a wrapper object whose
//! single array member holds the records. Nested objects flatten to
//! dot-joined paths before alias resolution.

use serde_json::Value;

use fleetledger_recon::RawRecord;

use crate::alias::{resolve_header, ColumnTarget};
use crate::error::AdapterError;
use crate::normalize::normalize_value;

pub fn parse(name: &str, bytes: &[u8], file_id: i64) -> Result<Vec<RawRecord>, AdapterError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| AdapterError::corrupt(name, e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut arrays: Vec<Vec<Value>> = map
                .into_iter()
                .filter_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .collect();
            match (arrays.len(), arrays.pop()) {
                (1, Some(items)) => items,
                _ => {
                    return Err(AdapterError::corrupt(
                        name,
                        "expected an array of records or an object with one array member",
                    ))
                }
            }
        }
        _ => {
            return Err(AdapterError::corrupt(
                name,
                "expected an array of records at the top level",
            ))
        }
    };

    let mut records = Vec::new();
    for (row_index, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(AdapterError::corrupt(name, format!("record {row_index} is not an object")));
        };
        let mut record = RawRecord::new(file_id, row_index);
        for (key, value) in map {
            flatten_into(&mut record, &key, value);
        }
        if !record.fields.is_empty() || !record.extras.is_empty() {
            records.push(record);
        }
    }

    if records.is_empty() {
        return Err(AdapterError::Empty { name: name.to_string() });
    }
    Ok(records)
}

fn flatten_into(record: &mut RawRecord, path: &str, value: Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(record, &format!("{path}.{key}"), nested);
            }
        }
        Value::Null => {}
        other => {
            let text = match other {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if text.trim().is_empty() {
                return;
            }
            match resolve_header(path) {
                ColumnTarget::Canonical(field) => {
                    record.set(field, normalize_value(field, &text));
                }
                ColumnTarget::Extra(name) => {
                    record.extras.insert(name, text);
                }
                ColumnTarget::Skip => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetledger_recon::CanonicalField;

    #[test]
    fn array_of_objects() {
        let bytes = br#"[{"order_number":"A-1","price":"10,5"},{"order_number":"A-2"}]"#;
        let records = parse("a.json", bytes, 1).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(CanonicalField::OrderPrice), Some("10.50"));
    }

    #[test]
    fn wrapper_object_with_one_array() {
        let bytes = br#"{"total":2,"orders":[{"order_number":"A-1"},{"order_number":"A-2"}]}"#;
        let records = parse("a.json", bytes, 1).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn nested_objects_flatten_to_dot_paths() {
        let bytes =
            br#"[{"order_number":"A-1","payment":{"type":"card"},"meta":{"terminal":"T-9"}}]"#;
        let records = parse("a.json", bytes, 1).unwrap();
        // "payment.type" normalizes to the payment_type alias
        assert_eq!(records[0].get(CanonicalField::PaymentType), Some("card"));
        // unmapped paths land in extras under the dotted path
        assert_eq!(
            records[0].extras.get("meta.terminal").map(String::as_str),
            Some("T-9")
        );
    }

    #[test]
    fn numbers_and_nulls() {
        let bytes = br#"[{"order_number":"A-1","price":12.5,"reason":null}]"#;
        let records = parse("a.json", bytes, 1).unwrap();
        assert_eq!(records[0].get(CanonicalField::OrderPrice), Some("12.50"));
        assert_eq!(records[0].get(CanonicalField::Reason), None);
    }

    #[test]
    fn scalar_top_level_is_corrupt() {
        assert!(matches!(
            parse("a.json", b"42", 1).unwrap_err(),
            AdapterError::Corrupt { .. }
        ));
    }

    #[test]
    fn empty_array_is_empty() {
        assert_eq!(
            parse("a.json", b"[]", 1).unwrap_err(),
            AdapterError::Empty { name: "a.json".into() }
        );
    }
}
