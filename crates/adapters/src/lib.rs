//! `fleetledger-adapters` — turns operator uploads into canonical records.
//!
//! One entry point, [`parse_upload`], detects the format from content and
//! routes to the matching adapter. Every adapter emits the same
//! [`RawRecord`] shape, so the reconciliation engine never sees format
//! differences.

pub mod alias;
pub mod archive;
pub mod csv;
pub mod detect;
pub mod error;
pub mod json;
pub mod normalize;
pub mod tabular;
pub mod xlsx;
pub mod xml;

use fleetledger_recon::RawRecord;

pub use detect::SourceFormat;
pub use error::AdapterError;

/// A fully parsed upload.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    pub format: SourceFormat,
    /// blake3 of the raw upload bytes; identical bytes always hash equal
    /// regardless of file name.
    pub content_hash: String,
    pub records: Vec<RawRecord>,
}

/// Parse one uploaded file into canonical records.
pub fn parse_upload(name: &str, bytes: &[u8], file_id: i64) -> Result<ParsedUpload, AdapterError> {
    let format = detect::detect(name, bytes)
        .ok_or_else(|| AdapterError::UnsupportedFormat { name: name.to_string() })?;
    let records = dispatch(name, bytes, file_id, 0)?;
    log::debug!("parsed '{name}' as {format}: {} records", records.len());
    Ok(ParsedUpload { format, content_hash: content_hash(bytes), records })
}

/// Hash of the raw upload bytes, used for exact-duplicate detection.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Route bytes to an adapter. `depth` tracks archive nesting.
pub(crate) fn dispatch(
    name: &str,
    bytes: &[u8],
    file_id: i64,
    depth: usize,
) -> Result<Vec<RawRecord>, AdapterError> {
    match detect::detect(name, bytes) {
        Some(SourceFormat::Csv) => csv::parse(name, bytes, file_id),
        Some(SourceFormat::Tsv) => csv::parse_tsv(name, bytes, file_id),
        Some(SourceFormat::Xlsx) => xlsx::parse(name, bytes, file_id),
        Some(SourceFormat::Json) => json::parse(name, bytes, file_id),
        Some(SourceFormat::Xml) => xml::parse(name, bytes, file_id),
        Some(SourceFormat::Archive) => archive::parse(name, bytes, file_id, depth),
        None => Err(AdapterError::UnsupportedFormat { name: name.to_string() }),
    }
}
