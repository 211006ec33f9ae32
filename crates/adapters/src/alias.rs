//! Source-column to canonical-field mapping.
//!
//! Vendor exports name the same attribute a dozen ways ("Order No.",
//! `order_id`, `номер_заказа`). Headers are normalized (lowercase, spaces
//! and dashes collapsed to underscores) and then looked up in a fixed alias
//! table. Unrecognized headers are kept verbatim as extras.

use fleetledger_recon::CanonicalField;

/// Aliases per canonical field, in normalized form. The canonical name
/// itself always matches and is not repeated here.
const ALIASES: &[(CanonicalField, &[&str])] = &[
    (CanonicalField::OrderNumber, &["order_id", "order_no", "номер_заказа", "заказ"]),
    (CanonicalField::MachineCode, &["machine_id", "machine", "код_автомата", "автомат"]),
    (CanonicalField::Address, &["machine_address", "location", "адрес"]),
    (CanonicalField::GoodsName, &["goods", "product", "product_name", "товар", "напиток"]),
    (CanonicalField::TasteName, &["taste", "flavor", "вкус"]),
    (CanonicalField::OrderType, &["type", "тип_заказа"]),
    (CanonicalField::OrderResource, &["resource", "source", "источник"]),
    (CanonicalField::OrderPrice, &["price", "amount", "цена", "сумма"]),
    (CanonicalField::CreationTime, &["created_at", "create_time", "date", "дата_создания"]),
    (CanonicalField::PayingTime, &["paid_at", "pay_time", "дата_оплаты"]),
    (CanonicalField::BrewingTime, &["brew_time", "время_приготовления"]),
    (CanonicalField::DeliveryTime, &["delivered_at", "время_выдачи"]),
    (CanonicalField::RefundTime, &["refunded_at", "время_возврата"]),
    (CanonicalField::PaymentStatus, &["pay_status", "статус_оплаты"]),
    (CanonicalField::BrewStatus, &["status", "статус_приготовления"]),
    (CanonicalField::PaymentType, &["payment_method", "pay_type", "тип_оплаты", "оплата"]),
    (CanonicalField::Reason, &["refund_reason", "причина"]),
];

/// How each position in a source row maps into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTarget {
    Canonical(CanonicalField),
    /// Unmapped column, kept under its original header.
    Extra(String),
    /// Blank header. The column is dropped.
    Skip,
}

/// Resolve one raw header cell.
pub fn resolve_header(raw: &str) -> ColumnTarget {
    let normalized = normalize_header(raw);
    if normalized.is_empty() {
        return ColumnTarget::Skip;
    }
    if let Some(field) = CanonicalField::from_name(&normalized) {
        return ColumnTarget::Canonical(field);
    }
    for (field, aliases) in ALIASES {
        if aliases.contains(&normalized.as_str()) {
            return ColumnTarget::Canonical(*field);
        }
    }
    ColumnTarget::Extra(raw.trim().to_string())
}

/// Resolve a whole header row once per file.
pub fn resolve_headers(headers: &[String]) -> Vec<ColumnTarget> {
    headers.iter().map(|h| resolve_header(h)).collect()
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' || c == '.' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_resolve_directly() {
        for field in CanonicalField::ALL {
            assert_eq!(resolve_header(field.as_str()), ColumnTarget::Canonical(field));
        }
    }

    #[test]
    fn aliases_and_case_variants() {
        assert_eq!(
            resolve_header("Order No."),
            ColumnTarget::Canonical(CanonicalField::OrderNumber)
        );
        assert_eq!(
            resolve_header("ORDER-ID"),
            ColumnTarget::Canonical(CanonicalField::OrderNumber)
        );
        assert_eq!(
            resolve_header("Номер заказа"),
            ColumnTarget::Canonical(CanonicalField::OrderNumber)
        );
        assert_eq!(
            resolve_header("Тип оплаты"),
            ColumnTarget::Canonical(CanonicalField::PaymentType)
        );
        assert_eq!(resolve_header("Цена"), ColumnTarget::Canonical(CanonicalField::OrderPrice));
    }

    #[test]
    fn unknown_headers_become_extras() {
        assert_eq!(
            resolve_header("Terminal Serial"),
            ColumnTarget::Extra("Terminal Serial".into())
        );
    }

    #[test]
    fn blank_headers_are_skipped() {
        assert_eq!(resolve_header("   "), ColumnTarget::Skip);
    }
}
