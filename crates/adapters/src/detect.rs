//! Content-first format detection. Extensions are only a tie-breaker:
//! operators routinely upload `.csv` files that are really Excel workbooks
//! and vice versa.

use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Xlsx,
    Json,
    Xml,
    Archive,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Xlsx => "xlsx",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the format from content, falling back to the extension for the
/// text formats that share no magic bytes.
pub fn detect(name: &str, bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(b"PK\x03\x04") {
        // XLSX workbooks and plain zip archives share the same magic;
        // only a workbook carries [Content_Types].xml.
        return Some(if is_xlsx_container(bytes) {
            SourceFormat::Xlsx
        } else {
            SourceFormat::Archive
        });
    }

    // Legacy .xls (OLE2 compound document), readable through calamine.
    if bytes.starts_with(&[0xd0, 0xcf, 0x11, 0xe0]) {
        return Some(SourceFormat::Xlsx);
    }

    let text_head = leading_text(bytes);
    match text_head.trim_start().as_bytes().first() {
        Some(b'{') | Some(b'[') => return Some(SourceFormat::Json),
        Some(b'<') => return Some(SourceFormat::Xml),
        _ => {}
    }

    let ext = name.rsplit('.').next().map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("csv") => Some(SourceFormat::Csv),
        Some("tsv") => Some(SourceFormat::Tsv),
        Some("txt") => Some(SourceFormat::Csv),
        Some("json") => Some(SourceFormat::Json),
        Some("xml") => Some(SourceFormat::Xml),
        Some("zip") => Some(SourceFormat::Archive),
        _ if looks_tabular(&text_head) => Some(SourceFormat::Csv),
        _ => None,
    }
}

fn is_xlsx_container(bytes: &[u8]) -> bool {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    let has_manifest = archive.by_name("[Content_Types].xml").is_ok();
    has_manifest
}

/// Decode up to the first 4 KiB as text, skipping a UTF-8 BOM.
fn leading_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let head = &bytes[..bytes.len().min(4096)];
    String::from_utf8_lossy(head).into_owned()
}

/// A file with no telling extension still counts as CSV when its first
/// lines split consistently on a common delimiter.
fn looks_tabular(head: &str) -> bool {
    let lines: Vec<&str> = head.lines().take(5).filter(|l| !l.is_empty()).collect();
    if lines.len() < 2 {
        return false;
    }
    [b'\t', b';', b',', b'|'].iter().any(|&delim| {
        let first = lines[0].bytes().filter(|&b| b == delim).count();
        first > 0 && lines.iter().all(|l| l.bytes().filter(|&b| b == delim).count() == first)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(names: &[&str]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for name in names {
                writer
                    .start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(b"x").unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn xlsx_vs_plain_zip() {
        let workbook = zip_with(&["[Content_Types].xml", "xl/workbook.xml"]);
        let archive = zip_with(&["orders.csv"]);
        assert_eq!(detect("a.xlsx", &workbook), Some(SourceFormat::Xlsx));
        assert_eq!(detect("a.zip", &archive), Some(SourceFormat::Archive));
        // content beats a lying extension
        assert_eq!(detect("a.csv", &workbook), Some(SourceFormat::Xlsx));
    }

    #[test]
    fn json_and_xml_by_leading_byte() {
        assert_eq!(detect("data.bin", b"  [{\"a\":1}]"), Some(SourceFormat::Json));
        assert_eq!(detect("data.bin", b"{\"a\":1}"), Some(SourceFormat::Json));
        assert_eq!(detect("data.bin", b"<orders><order/></orders>"), Some(SourceFormat::Xml));
    }

    #[test]
    fn bom_is_skipped() {
        assert_eq!(detect("d", b"\xef\xbb\xbf{\"a\":1}"), Some(SourceFormat::Json));
    }

    #[test]
    fn extension_fallback_for_text() {
        assert_eq!(detect("orders.csv", b"a,b\n1,2\n"), Some(SourceFormat::Csv));
        assert_eq!(detect("orders.tsv", b"a\tb\n1\t2\n"), Some(SourceFormat::Tsv));
    }

    #[test]
    fn consistent_delimiters_without_extension() {
        assert_eq!(detect("export", b"a;b;c\n1;2;3\n4;5;6\n"), Some(SourceFormat::Csv));
        assert_eq!(detect("export", &[0u8, 1, 2, 3]), None);
    }
}
