//! In-memory row sets.
//!
//! A [`Dataset`] is what the row-fetch collaborator hands to the pipeline: the
//! declared column names plus the (bounded) records. CSV input is decoded
//! through [`crate::io_utils`] and every field is coerced with
//! [`CellValue::from_raw`].

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    capabilities::schema_fingerprint,
    data::{CellValue, NULL_CELL, Row},
    io_utils,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Set when the source held more rows than the configured ceiling.
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
    pub max_rows: Option<usize>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: UTF_8,
            max_rows: None,
        }
    }
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    /// Builds a dataset from raw string records, coercing each field.
    pub fn from_records(headers: &[String], records: &[Vec<String>]) -> Self {
        let columns = unique_headers(headers);
        let rows = records
            .iter()
            .map(|record| build_row(&columns, record))
            .collect();
        Self::new(columns, rows)
    }

    pub fn load_csv(path: &Path, options: &CsvOptions) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let headers = io_utils::reader_headers(&mut reader, options.encoding)
            .with_context(|| format!("Reading headers from {path:?}"))?;
        let columns = unique_headers(&headers);

        let mut rows = Vec::new();
        let mut truncated = false;
        for (row_idx, record) in reader.byte_records().enumerate() {
            if let Some(limit) = options.max_rows
                && row_idx >= limit
            {
                truncated = true;
                break;
            }
            let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
            let decoded = io_utils::decode_record(&record, options.encoding)
                .with_context(|| format!("Decoding row {}", row_idx + 2))?;
            rows.push(build_row(&columns, &decoded));
        }
        if truncated {
            warn!(
                "Row ceiling of {} reached while reading {:?}; remaining rows ignored",
                rows.len(),
                path
            );
        }
        debug!(
            "Loaded {} row(s) across {} column(s) from {:?}",
            rows.len(),
            columns.len(),
            path
        );
        Ok(Self {
            columns,
            rows,
            truncated,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fingerprint(&self) -> String {
        schema_fingerprint(&self.columns)
    }

    pub fn values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(column).unwrap_or(&NULL_CELL))
    }
}

fn build_row(columns: &[String], record: &[String]) -> Row {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let raw = record.get(idx).map(String::as_str).unwrap_or("");
            (column.clone(), CellValue::from_raw(raw))
        })
        .collect()
}

/// Blank headers get a positional name and duplicates a numeric suffix so
/// every column stays addressable by name.
fn unique_headers(headers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let trimmed = header.trim();
            let base = if trimmed.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                trimmed.to_string()
            };
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.to_ascii_lowercase()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}
