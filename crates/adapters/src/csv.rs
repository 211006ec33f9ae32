//! CSV/TSV adapter: delimiter sniffing, legacy-encoding fallback, header
//! aliasing.

use fleetledger_recon::RawRecord;

use crate::error::AdapterError;
use crate::tabular::records_from_rows;

pub fn parse(name: &str, bytes: &[u8], file_id: i64) -> Result<Vec<RawRecord>, AdapterError> {
    let content = decode_as_utf8(bytes);
    parse_with_delimiter(name, &content, sniff_delimiter(&content), file_id)
}

pub fn parse_tsv(name: &str, bytes: &[u8], file_id: i64) -> Result<Vec<RawRecord>, AdapterError> {
    let content = decode_as_utf8(bytes);
    parse_with_delimiter(name, &content, b'\t', file_id)
}

/// Decode bytes as UTF-8, falling back to Windows-1252 (common for
/// Excel-exported CSVs).
fn decode_as_utf8(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Detect the most likely field delimiter by checking consistency across the
/// first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line.
/// The delimiter that produces the most consistent field count (>1 field)
/// wins; higher field count breaks ties.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

fn parse_with_delimiter(
    name: &str,
    content: &str,
    delimiter: u8,
    file_id: i64,
) -> Result<Vec<RawRecord>, AdapterError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = reader.records();
    let headers: Vec<String> = match rows.next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        Some(Err(e)) => return Err(AdapterError::corrupt(name, e.to_string())),
        None => return Err(AdapterError::Empty { name: name.to_string() }),
    };

    let mut data = Vec::new();
    for result in rows {
        let record = result.map_err(|e| AdapterError::corrupt(name, e.to_string()))?;
        data.push(record.iter().map(str::to_string).collect());
    }

    let records = records_from_rows(file_id, &headers, data);
    if records.is_empty() {
        return Err(AdapterError::Empty { name: name.to_string() });
    }
    Ok(records)
}
