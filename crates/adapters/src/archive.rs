//! ZIP archive adapter. Entries are re-detected and parsed individually,
//! including nested archives up to the depth budget. Expansion budgets
//! guard against zip bombs before any entry is fully decompressed.

use std::io::{Cursor, Read};

use fleetledger_recon::RawRecord;

use crate::error::AdapterError;

/// Nested archives beyond this depth are rejected (a zip inside a zip is
/// common with vendor exports, deeper nesting is not).
pub const MAX_DEPTH: usize = 2;
pub const MAX_ENTRIES: usize = 256;
/// Total decompressed size may not exceed this multiple of the archive size.
pub const MAX_EXPANSION_RATIO: u64 = 100;
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

pub fn parse(
    name: &str,
    bytes: &[u8],
    file_id: i64,
    depth: usize,
) -> Result<Vec<RawRecord>, AdapterError> {
    if depth >= MAX_DEPTH {
        return Err(AdapterError::ArchiveTooDeep { name: name.to_string(), max_depth: MAX_DEPTH });
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AdapterError::corrupt(name, e.to_string()))?;

    if archive.len() > MAX_ENTRIES {
        return Err(AdapterError::ArchiveTooManyEntries {
            name: name.to_string(),
            max_entries: MAX_ENTRIES,
        });
    }

    let expansion_budget = (bytes.len() as u64).saturating_mul(MAX_EXPANSION_RATIO);
    let mut decompressed_total = 0u64;
    let mut records = Vec::new();
    let mut next_row = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| AdapterError::corrupt(name, e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = format!("{name}/{}", entry.name());

        // declared sizes are checked before decompressing anything
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(AdapterError::ArchiveTooLarge {
                name: entry_name,
                detail: format!("entry declares {} bytes", entry.size()),
            });
        }
        decompressed_total = decompressed_total.saturating_add(entry.size());
        if decompressed_total > expansion_budget {
            return Err(AdapterError::ArchiveTooLarge {
                name: name.to_string(),
                detail: format!("decompressed size exceeds {MAX_EXPANSION_RATIO}x archive size"),
            });
        }

        let mut entry_bytes = Vec::with_capacity(entry.size() as usize);
        // limit guards against a lying size field
        let read = (&mut entry)
            .take(MAX_ENTRY_BYTES + 1)
            .read_to_end(&mut entry_bytes)
            .map_err(|e| AdapterError::io(&entry_name, e))?;
        if read as u64 > MAX_ENTRY_BYTES {
            return Err(AdapterError::ArchiveTooLarge {
                name: entry_name,
                detail: "entry larger than its declared size".to_string(),
            });
        }

        match crate::dispatch(&entry_name, &entry_bytes, file_id, depth + 1) {
            Ok(mut entry_records) => {
                for record in &mut entry_records {
                    record.row_index += next_row;
                }
                if let Some(last) = entry_records.last() {
                    next_row = last.row_index + 1;
                }
                records.append(&mut entry_records);
            }
            // a readme or empty sheet inside the archive is not an error
            Err(AdapterError::UnsupportedFormat { name }) => {
                log::warn!("skipping unsupported archive entry '{name}'");
            }
            Err(AdapterError::Empty { name }) => {
                log::warn!("skipping empty archive entry '{name}'");
            }
            Err(other) => return Err(other),
        }
    }

    if records.is_empty() {
        return Err(AdapterError::Empty { name: name.to_string() });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetledger_recon::CanonicalField;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, data) in entries {
                writer
                    .start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn mixed_entries_concatenate() {
        let bytes = zip_of(&[
            ("a.csv", b"order_number,price\nA-1,5\n"),
            ("b.json", br#"[{"order_number":"A-2"}]"#),
        ]);
        let records = parse("upload.zip", &bytes, 1, 0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(CanonicalField::OrderNumber), Some("A-1"));
        assert_eq!(records[1].get(CanonicalField::OrderNumber), Some("A-2"));
        // indices stay unique across entries
        assert_ne!(records[0].row_index, records[1].row_index);
    }

    #[test]
    fn unsupported_entries_are_skipped() {
        let bytes = zip_of(&[
            ("readme", &[0u8, 1, 2, 3][..]),
            ("a.csv", b"order_number\nA-1\n"),
        ]);
        let records = parse("upload.zip", &bytes, 1, 0).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn nested_archive_within_budget() {
        let inner = zip_of(&[("a.csv", b"order_number\nA-1\n")]);
        let outer = zip_of(&[("inner.zip", &inner)]);
        let records = parse("upload.zip", &outer, 1, 0).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn nesting_beyond_budget_is_rejected() {
        let level0 = zip_of(&[("a.csv", b"order_number\nA-1\n")]);
        let level1 = zip_of(&[("l0.zip", &level0)]);
        let level2 = zip_of(&[("l1.zip", &level1)]);
        let err = parse("upload.zip", &level2, 1, 0).unwrap_err();
        assert!(matches!(err, AdapterError::ArchiveTooDeep { .. }));
    }

    #[test]
    fn archive_of_junk_is_empty() {
        let bytes = zip_of(&[("readme", &[0u8, 1, 2][..])]);
        let err = parse("upload.zip", &bytes, 1, 0).unwrap_err();
        assert_eq!(err, AdapterError::Empty { name: "upload.zip".into() });
    }
}
