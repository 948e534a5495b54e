// src/services/parser.rs

//! Text and money parsing over extracted tables.
//!
//! The total-due policy is two-tier and determines billed amounts:
//! rows labelled `total` win; only when none exist does the largest
//! money value anywhere stand in for the total.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::models::{PropertyIdentity, Table};

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$?\s*((?:[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+)(?:\.[0-9]{2})?)")
        .expect("money pattern is valid")
});

/// Labels that are never accepted as an address value.
const HEADER_LABELS: &[&str] = &["property address", "property number"];

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rescale a money value to exactly two fraction digits.
pub fn to_money(mut value: Decimal) -> Decimal {
    value = value.round_dp(2);
    value.rescale(2);
    value
}

/// Zero with two fraction digits.
pub fn zero_money() -> Decimal {
    Decimal::new(0, 2)
}

/// Parse the first money-shaped substring of `text`.
pub fn parse_money(text: &str) -> Option<Decimal> {
    parse_money_with(&MONEY_RE, text)
}

/// Parse the first match of `pattern` as money.
///
/// Uses the first capture group when the pattern has one, the whole
/// match otherwise; everything but digits and dots is stripped.
pub fn parse_money_with(pattern: &Regex, text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }
    let captures = pattern.captures(text)?;
    let matched = captures.get(1).or_else(|| captures.get(0))?.as_str();
    let raw: String = matched
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<Decimal>().ok().map(to_money)
}

fn first_cell_is(row: &[String], label: &str) -> bool {
    row.first()
        .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(label))
}

fn label_of(cell: &str) -> String {
    cell.trim().trim_end_matches(':').trim().to_lowercase()
}

/// Total amount due across all tables.
///
/// Sums, per row whose first cell is `total`, the first money value found
/// scanning from the last cell backward. Without such rows the largest
/// money value anywhere is used; with no money at all the result is `0.00`.
pub fn derive_total_due(tables: &[Table]) -> Decimal {
    let totals: Vec<Decimal> = tables
        .iter()
        .flat_map(|table| table.rows.iter())
        .filter(|row| first_cell_is(row, "total"))
        .filter_map(|row| row.iter().rev().find_map(|cell| parse_money(cell)))
        .collect();

    if !totals.is_empty() {
        return to_money(totals.into_iter().sum());
    }

    tables
        .iter()
        .flat_map(|table| table.rows.iter())
        .flat_map(|row| row.iter())
        .filter_map(|cell| parse_money(cell))
        .max()
        .map(to_money)
        .unwrap_or_else(zero_money)
}

/// Property address found in the tables, or `fallback`.
pub fn derive_address(tables: &[Table], fallback: &str) -> String {
    for table in tables {
        let rows = &table.rows;

        // Label/value rows
        if let Some(value) = rows
            .iter()
            .filter(|row| row.len() >= 2 && label_of(&row[0]) == "property address")
            .map(|row| row[1].clone())
            .next()
        {
            return value;
        }

        // Header row with the value one row below
        if rows.len() >= 2 {
            for (idx, header) in rows[0].iter().enumerate() {
                if !header.to_lowercase().contains("property address") {
                    continue;
                }
                if let Some(candidate) = rows[1].get(idx).map(|c| c.trim()) {
                    let lowered = candidate.to_lowercase();
                    if !candidate.is_empty() && !HEADER_LABELS.contains(&lowered.as_str()) {
                        return candidate.to_string();
                    }
                }
            }
        }
    }

    fallback.to_string()
}

/// Identity fields from two-row header/value tables.
pub fn extract_identity(tables: &[Table]) -> PropertyIdentity {
    let mut identity = PropertyIdentity::default();

    for table in tables.iter().filter(|t| t.rows.len() == 2) {
        let (header, values) = (&table.rows[0], &table.rows[1]);
        for (idx, cell) in header.iter().enumerate() {
            let Some(value) = values.get(idx).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
                continue;
            };
            let cell = cell.to_lowercase();
            let slot = if cell.contains("property number") {
                &mut identity.property_number
            } else if cell.contains("tax map") {
                &mut identity.tax_map
            } else if cell.contains("property address") {
                &mut identity.property_address
            } else {
                continue;
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
    }

    identity
}

/// Due date from a `Due Date` label row.
pub fn derive_due_date(tables: &[Table]) -> Option<String> {
    tables
        .iter()
        .flat_map(|table| table.rows.iter())
        .find(|row| row.len() >= 2 && label_of(&row[0]).contains("due date"))
        .map(|row| row[1].trim().to_string())
        .filter(|value| !value.is_empty())
}
