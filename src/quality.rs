//! Data-quality audit produced alongside every aggregation run.
//!
//! Nothing here fails a computation. Problems are collected as
//! [`AuditWarning`]s with stable codes so callers (and the gate) can decide
//! what is fatal for them.

use std::{collections::HashMap, fmt};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    data::{CellValue, is_truthy},
    resolver::ResolutionRecord,
};

pub const LOW_DATE_PARSE_RATE: f64 = 0.7;
pub const TOP_VALUES_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    ColumnNotFound,
    LowDateParseRate,
    NoRowsInRange,
    StageNeverTruthy,
    NoData,
    DataLimited,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::ColumnNotFound => "COLUMN_NOT_FOUND",
            WarningCode::LowDateParseRate => "LOW_DATE_PARSE_RATE",
            WarningCode::NoRowsInRange => "NO_ROWS_IN_RANGE",
            WarningCode::StageNeverTruthy => "STAGE_NEVER_TRUTHY",
            WarningCode::NoData => "NO_DATA",
            WarningCode::DataLimited => "DATA_LIMITED",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditWarning {
    pub code: WarningCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeColumnAudit {
    pub declared: String,
    pub resolved: Option<String>,
    pub total_rows: usize,
    pub parsed_rows: usize,
    pub in_range_rows: usize,
    /// Share of rows whose date parsed.
    pub parse_rate: f64,
    /// Share of parsed dates inside the requested range.
    pub in_range_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagAudit {
    pub declared: String,
    pub resolved: Option<String>,
    pub non_null: usize,
    pub truthy: usize,
    pub top_values: Vec<ValueCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub time: Option<TimeColumnAudit>,
    pub flags: Vec<FlagAudit>,
    pub resolutions: Vec<ResolutionRecord>,
    pub warnings: Vec<AuditWarning>,
}

impl DataQualityReport {
    pub fn warn(&mut self, code: WarningCode, message: impl Into<String>, column: Option<&str>) {
        let message = message.into();
        warn!("{code}: {message}");
        self.warnings.push(AuditWarning {
            code,
            message,
            column: column.map(str::to_string),
        });
    }

    pub fn has_warning(&self, code: WarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn warnings_with(&self, code: WarningCode) -> impl Iterator<Item = &AuditWarning> {
        self.warnings.iter().filter(move |w| w.code == code)
    }

    /// Keeps the first record per declared name and raises `COLUMN_NOT_FOUND`
    /// for unresolved ones.
    pub fn record_resolution(&mut self, record: &ResolutionRecord, usage: &str) {
        if self
            .resolutions
            .iter()
            .any(|existing| existing.declared == record.declared)
        {
            return;
        }
        self.resolutions.push(record.clone());
        if !record.is_resolved() {
            let mut message = format!(
                "{usage} column '{}' not found; tried {}",
                record.declared,
                record.attempted.join(", ")
            );
            if !record.candidates.is_empty() {
                message.push_str(&format!(
                    "; ambiguous candidates: {}",
                    record.candidates.join(", ")
                ));
            }
            self.warn(WarningCode::ColumnNotFound, message, Some(&record.declared));
        }
    }
}

/// Audits one stage/flag column over the rows in range.
pub fn audit_flag<'a, I>(declared: &str, resolved: Option<&str>, values: I) -> FlagAudit
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut non_null = 0;
    let mut truthy = 0;
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for value in values {
        if value.is_null() {
            continue;
        }
        non_null += 1;
        if is_truthy(value) {
            truthy += 1;
        }
        let first_seen = counts.len();
        counts
            .entry(value.display_key().into_owned())
            .or_insert((0, first_seen))
            .0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    FlagAudit {
        declared: declared.to_string(),
        resolved: resolved.map(str::to_string),
        non_null,
        truthy,
        top_values: ranked
            .into_iter()
            .take(TOP_VALUES_LIMIT)
            .map(|(value, (count, _))| ValueCount { value, count })
            .collect(),
    }
}
