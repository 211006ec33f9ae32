//! Shared header-row to record mapping used by the CSV and XLSX adapters.

use fleetledger_recon::RawRecord;

use crate::alias::{resolve_headers, ColumnTarget};
use crate::normalize::normalize_value;

/// Map data rows onto records through a resolved header row. Rows with no
/// non-empty cell are dropped; `row_index` counts data rows from zero.
pub fn records_from_rows<I>(file_id: i64, headers: &[String], rows: I) -> Vec<RawRecord>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let targets = resolve_headers(headers);
    let mut records = Vec::new();

    for (row_index, row) in rows.into_iter().enumerate() {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut record = RawRecord::new(file_id, row_index);
        for (target, cell) in targets.iter().zip(row.iter()) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            match target {
                ColumnTarget::Canonical(field) => {
                    record.set(*field, normalize_value(*field, cell));
                }
                ColumnTarget::Extra(name) => {
                    record.extras.insert(name.clone(), cell.to_string());
                }
                ColumnTarget::Skip => {}
            }
        }
        records.push(record);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetledger_recon::CanonicalField;

    #[test]
    fn maps_known_headers_and_keeps_extras() {
        let headers = vec!["Order Number".to_string(), "Цена".into(), "Terminal".into()];
        let rows = vec![vec!["A-1".to_string(), "10,5".into(), "T-9".into()]];
        let records = records_from_rows(3, &headers, rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(CanonicalField::OrderNumber), Some("A-1"));
        assert_eq!(records[0].get(CanonicalField::OrderPrice), Some("10.50"));
        assert_eq!(records[0].extras.get("Terminal").map(String::as_str), Some("T-9"));
    }

    #[test]
    fn blank_rows_are_dropped_and_indexing_counts_all_data_rows() {
        let headers = vec!["order_number".to_string()];
        let rows = vec![
            vec!["A-1".to_string()],
            vec!["   ".to_string()],
            vec!["A-2".to_string()],
        ];
        let records = records_from_rows(1, &headers, rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_index, 0);
        assert_eq!(records[1].row_index, 2);
    }

    #[test]
    fn short_rows_are_fine() {
        let headers = vec!["order_number".to_string(), "address".into()];
        let rows = vec![vec!["A-1".to_string()]];
        let records = records_from_rows(1, &headers, rows);
        assert_eq!(records[0].get(CanonicalField::Address), None);
    }
}
