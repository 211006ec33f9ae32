//! XML adapter. The root element's children are the records; each record's
//! descendant elements carry field values, with nested elements addressed
//! by dot-joined paths like the JSON adapter.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use fleetledger_recon::RawRecord;

use crate::alias::{resolve_header, ColumnTarget};
use crate::error::AdapterError;
use crate::normalize::normalize_value;

pub fn parse(name: &str, bytes: &[u8], file_id: i64) -> Result<Vec<RawRecord>, AdapterError> {
    let content = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<RawRecord> = None;
    let mut text = String::new();
    let mut row_index = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                if stack.len() == 2 {
                    current = Some(RawRecord::new(file_id, row_index));
                }
                collect_attributes(current.as_mut(), &stack, &e);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let elem = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if stack.len() == 1 {
                    // self-closing record element, fields only in attributes
                    let mut record = RawRecord::new(file_id, row_index);
                    stack.push(elem);
                    collect_attributes(Some(&mut record), &stack, &e);
                    stack.pop();
                    if !record.fields.is_empty() || !record.extras.is_empty() {
                        records.push(record);
                    }
                    row_index += 1;
                } else if stack.len() >= 2 {
                    stack.push(elem);
                    collect_attributes(current.as_mut(), &stack, &e);
                    stack.pop();
                }
            }
            Ok(Event::Text(t)) => {
                let raw = String::from_utf8_lossy(&t);
                let piece =
                    unescape(&raw).map_err(|e| AdapterError::corrupt(name, e.to_string()))?;
                text.push_str(&piece);
            }
            Ok(Event::End(_)) => {
                match stack.len() {
                    0 | 1 => {}
                    2 => {
                        if let Some(record) = current.take() {
                            if !record.fields.is_empty() || !record.extras.is_empty() {
                                records.push(record);
                            }
                        }
                        row_index += 1;
                    }
                    _ => {
                        let value = text.trim();
                        if !value.is_empty() {
                            if let Some(record) = current.as_mut() {
                                assign(record, &stack[2..].join("."), value);
                            }
                        }
                    }
                }
                stack.pop();
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(AdapterError::corrupt(name, e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(AdapterError::corrupt(name, "truncated document"));
    }
    if records.is_empty() {
        return Err(AdapterError::Empty { name: name.to_string() });
    }
    Ok(records)
}

fn collect_attributes(record: Option<&mut RawRecord>, stack: &[String], e: &BytesStart<'_>) {
    let Some(record) = record else { return };
    if stack.len() < 2 {
        return;
    }
    let base = stack[2..].join(".");
    for attr in e.attributes().flatten() {
        let raw = String::from_utf8_lossy(&attr.value);
        let Ok(value) = unescape(&raw) else { continue };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let path = if base.is_empty() { key } else { format!("{base}.{key}") };
        assign(record, &path, value);
    }
}

fn assign(record: &mut RawRecord, path: &str, value: &str) {
    match resolve_header(path) {
        ColumnTarget::Canonical(field) => record.set(field, normalize_value(field, value)),
        ColumnTarget::Extra(name) => {
            record.extras.insert(name, value.to_string());
        }
        ColumnTarget::Skip => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetledger_recon::CanonicalField;

    #[test]
    fn root_children_are_records() {
        let bytes = b"<orders>\
            <order><order_number>A-1</order_number><price>10,5</price></order>\
            <order><order_number>A-2</order_number></order>\
        </orders>";
        let records = parse("a.xml", bytes, 1).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(CanonicalField::OrderNumber), Some("A-1"));
        assert_eq!(records[0].get(CanonicalField::OrderPrice), Some("10.50"));
        assert_eq!(records[0].row_index, 0);
        assert_eq!(records[1].row_index, 1);
    }

    #[test]
    fn nested_elements_use_dot_paths() {
        let bytes = b"<orders><order>\
            <order_number>A-1</order_number>\
            <payment><type>cash</type></payment>\
            <meta><terminal>T-9</terminal></meta>\
        </order></orders>";
        let records = parse("a.xml", bytes, 1).unwrap();
        assert_eq!(records[0].get(CanonicalField::PaymentType), Some("cash"));
        assert_eq!(
            records[0].extras.get("meta.terminal").map(String::as_str),
            Some("T-9")
        );
    }

    #[test]
    fn attributes_become_columns() {
        let bytes = b"<orders>\
            <order order_number=\"A-1\"><price>5</price></order>\
            <order order_number=\"A-2\"/>\
        </orders>";
        let records = parse("a.xml", bytes, 1).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(CanonicalField::OrderNumber), Some("A-1"));
        assert_eq!(records[0].get(CanonicalField::OrderPrice), Some("5.00"));
        assert_eq!(records[1].get(CanonicalField::OrderNumber), Some("A-2"));
    }

    #[test]
    fn entities_are_unescaped() {
        let bytes = b"<o><r><goods_name>Fish &amp; Chips</goods_name></r></o>";
        let records = parse("a.xml", bytes, 1).unwrap();
        assert_eq!(records[0].get(CanonicalField::GoodsName), Some("Fish & Chips"));
    }

    #[test]
    fn truncated_document_is_corrupt() {
        let err = parse("a.xml", b"<orders><order><order_number>A-1", 1).unwrap_err();
        assert!(matches!(err, AdapterError::Corrupt { .. }));
    }

    #[test]
    fn empty_root_is_empty() {
        assert_eq!(
            parse("a.xml", b"<orders></orders>", 1).unwrap_err(),
            AdapterError::Empty { name: "a.xml".into() }
        );
    }
}
