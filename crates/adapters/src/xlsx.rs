//! Excel adapter. Reads every worksheet; the first non-empty row of each
//! sheet is its header row.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use fleetledger_recon::RawRecord;

use crate::error::AdapterError;
use crate::tabular::records_from_rows;

pub fn parse(name: &str, bytes: &[u8], file_id: i64) -> Result<Vec<RawRecord>, AdapterError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| AdapterError::corrupt(name, e.to_string()))?;

    let mut records = Vec::new();
    let mut next_row = 0usize;
    for sheet_name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| AdapterError::corrupt(name, e.to_string()))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>())
            .skip_while(|row| row.iter().all(|c| c.trim().is_empty()));

        let Some(headers) = rows.next() else {
            continue; // blank sheet
        };

        let mut sheet_records = records_from_rows(file_id, &headers, rows);
        // row_index must stay unique across sheets of one workbook
        for record in &mut sheet_records {
            record.row_index += next_row;
        }
        if let Some(last) = sheet_records.last() {
            next_row = last.row_index + 1;
        }
        records.append(&mut sheet_records);
    }

    if records.is_empty() {
        return Err(AdapterError::Empty { name: name.to_string() });
    }
    Ok(records)
}

/// Render a cell the way the ledger's text formats would carry it. Excel
/// date serials become ISO timestamps, whole floats lose the ".0".
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => naive.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_rendering() {
        assert_eq!(cell_to_string(&Data::Float(42.0)), "42");
        assert_eq!(cell_to_string(&Data::Float(10.5)), "10.5");
    }

    #[test]
    fn empty_and_error_cells_are_blank() {
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = parse("a.xlsx", b"not a workbook", 1).unwrap_err();
        assert!(matches!(err, AdapterError::Corrupt { .. }));
    }
}
