// src/models/snapshot.rs

//! Extracted tables, property snapshots and per-item outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RunId;

/// Identifier assigned to a snapshot when it is committed.
pub type SnapshotId = u64;

/// One table row: the ordered, normalized texts of its cells.
pub type Row = Vec<String>;

/// A table extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Position of the table among all selector matches
    pub index: usize,

    /// Non-empty rows in document order
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(index: usize, rows: Vec<Row>) -> Self {
        Self { index, rows }
    }

    /// Build a table from string literals.
    pub fn from_rows(index: usize, rows: &[&[&str]]) -> Self {
        Self {
            index,
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }
}

/// Payment state of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidStatus {
    Paid,
    Unpaid,
}

impl PaidStatus {
    pub fn from_total(total_due: Decimal) -> Self {
        if total_due.is_zero() {
            PaidStatus::Paid
        } else {
            PaidStatus::Unpaid
        }
    }
}

impl fmt::Display for PaidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaidStatus::Paid => f.write_str("paid"),
            PaidStatus::Unpaid => f.write_str("unpaid"),
        }
    }
}

/// Identity fields found in a header/value table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyIdentity {
    pub property_number: Option<String>,
    pub tax_map: Option<String>,
    pub property_address: Option<String>,
}

/// A successfully extracted property, owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    /// Assigned on commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SnapshotId>,

    /// Assigned on commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Originating URL or item key
    pub source_reference: String,

    /// Account number carried by the source URL, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,

    /// Location after redirects
    pub final_url: String,

    /// Locations the item's navigation went through
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_chain: Vec<String>,

    pub address: String,

    /// Fixed-point, 2 fraction digits
    pub total_due: Decimal,

    pub paid_status: PaidStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_map: Option<String>,

    pub raw_tables: Vec<Table>,

    /// Produced by the page-level money fallback instead of table extraction
    #[serde(default)]
    pub degraded: bool,

    pub captured_at: DateTime<Utc>,
}

impl PropertySnapshot {
    /// Key used to find earlier snapshots of the same property.
    pub fn identity(&self) -> String {
        [
            self.account_number.as_deref(),
            self.property_number.as_deref(),
            self.tax_map.as_deref(),
            Some(self.address.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(self.source_reference.as_str())
        .to_string()
    }
}

/// Status of a single attempted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

/// Transient per-item result, aggregated into the run details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub status: ItemStatus,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_due: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_chain: Vec<String>,
}

impl ItemOutcome {
    pub fn success(snapshot: &PropertySnapshot) -> Self {
        Self {
            status: ItemStatus::Success,
            reference: snapshot.source_reference.clone(),
            label: None,
            error: None,
            address: Some(snapshot.address.clone()),
            total_due: Some(snapshot.total_due),
            redirect_chain: snapshot.redirect_chain.clone(),
        }
    }

    pub fn skipped(
        reference: impl Into<String>,
        label: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ItemStatus::Skipped,
            reference: reference.into(),
            label: Some(label.into()),
            error: Some(reason.into()),
            address: None,
            total_due: None,
            redirect_chain: Vec::new(),
        }
    }
}

/// Old-versus-new values for a property whose tracked fields changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub identity: String,
    pub address: String,
    pub old_total_due: Decimal,
    pub new_total_due: Decimal,
    pub old_paid_status: PaidStatus,
    pub new_paid_status: PaidStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_due_date: Option<String>,
}
