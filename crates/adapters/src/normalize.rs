//! Per-field value normalization applied by every adapter, so records from
//! a CSV and an XLSX export of the same ledger compare equal.

use chrono::{NaiveDate, NaiveDateTime};
use fleetledger_recon::CanonicalField;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Normalize one raw cell for its canonical field. Unparseable values pass
/// through trimmed, so nothing is silently dropped.
pub fn normalize_value(field: CanonicalField, raw: &str) -> String {
    let raw = raw.trim();
    if field == CanonicalField::OrderPrice {
        return normalize_price(raw);
    }
    if field.is_timestamp() {
        return normalize_timestamp(raw);
    }
    raw.to_string()
}

/// Strip currency symbols and grouping, unify the decimal separator.
/// `"1 250,50 UZS"` becomes `"1250.50"`.
fn normalize_price(raw: &str) -> String {
    let cleaned: String = raw
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(value) => format!("{value:.2}"),
        Err(_) => raw.to_string(),
    }
}

/// Parse the common export timestamp shapes into ISO 8601 seconds
/// precision. Date-only values get a midnight time.
fn normalize_timestamp(raw: &str) -> String {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return dt.format("%Y-%m-%dT%H:%M:%S").to_string();
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.format("%Y-%m-%dT00:00:00").to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_strips_currency_and_grouping() {
        assert_eq!(normalize_price("1 250,50 UZS"), "1250.50");
        assert_eq!(normalize_price("$12.5"), "12.50");
        assert_eq!(normalize_price("12"), "12.00");
    }

    #[test]
    fn price_unparseable_passes_through() {
        assert_eq!(normalize_price("free"), "free");
    }

    #[test]
    fn timestamps_unify_to_iso() {
        let expect = "2026-01-15T10:30:00";
        assert_eq!(normalize_timestamp("2026-01-15 10:30:00"), expect);
        assert_eq!(normalize_timestamp("15.01.2026 10:30"), expect);
        assert_eq!(normalize_timestamp("2026-01-15T10:30:00.000"), expect);
    }

    #[test]
    fn date_only_gets_midnight() {
        assert_eq!(normalize_timestamp("15.01.2026"), "2026-01-15T00:00:00");
    }

    #[test]
    fn equal_after_normalization_across_shapes() {
        let a = normalize_value(CanonicalField::CreationTime, "2026-01-15 10:30:00");
        let b = normalize_value(CanonicalField::CreationTime, "15.01.2026 10:30");
        assert_eq!(a, b);
    }

    #[test]
    fn plain_fields_only_trim() {
        assert_eq!(normalize_value(CanonicalField::GoodsName, "  Latte "), "Latte");
    }
}
