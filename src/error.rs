use serde::Serialize;
use thiserror::Error;

use crate::catalog::TabType;

/// Structural failures that stop a layout from being emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileError {
    #[error("widget catalog is invalid: {0}")]
    InvalidCatalog(String),
    #[error("mandatory tab `{0}` is missing")]
    MissingTab(TabType),
    #[error("mandatory tab `{0}` has no widgets")]
    EmptyTab(TabType),
    #[error("compiled layout has no widgets")]
    NoWidgets,
    #[error("duplicate widget id `{0}`")]
    DuplicateWidgetId(String),
}

/// Failures raised by the row-fetch collaborator.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("dataset `{0}` not found")]
    DatasetNotFound(String),
    #[error("fetching rows for `{dataset}` failed: {message}")]
    Fetch { dataset: String, message: String },
    #[error("background task failed: {0}")]
    Task(String),
}
