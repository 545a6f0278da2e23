//! Publish-time smoke check.
//!
//! A compiled layout only ships after a live round trip through the data path:
//! an aggregate probe (the full aggregation plan derived from the layout) and a
//! details probe (a small page of raw rows) run concurrently, and every widget
//! must find a payload of the right shape in the result. Any problem becomes a
//! human-readable block reason; there is no partial pass.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::{
    aggregate::{
        AggregationOptions, AggregationOutcome, AggregationPlan, AggregationResult, DateRange,
        compute_aggregations_with,
    },
    capabilities::schema_fingerprint,
    catalog::WidgetType,
    data::{NULL_CELL, Row, parse_date},
    dataset::{CsvOptions, Dataset},
    error::GatewayError,
    layout::{CompiledLayout, validate_layout},
    quality::WarningCode,
};

pub const DETAILS_PROBE_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardRef {
    pub id: String,
    /// Dataset reference understood by the row source.
    pub dataset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl RowFilter {
    /// Case-insensitive comparison against the cell's display form.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(&self.column).unwrap_or(&NULL_CELL);
        let actual = cell.display_key().to_lowercase();
        let expected = self.value.to_lowercase();
        match self.op {
            FilterOp::Eq => actual == expected,
            FilterOp::Contains => actual.contains(&expected),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    #[serde(default)]
    pub range: Option<DateRange>,
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn apply(&self, mut dataset: Dataset) -> Dataset {
        let range = self.range.zip(self.time_column.as_deref());
        dataset.rows.retain(|row| {
            if let Some((range, column)) = range {
                let in_range = parse_date(row.get(column).unwrap_or(&NULL_CELL))
                    .is_some_and(|date| range.contains(date));
                if !in_range {
                    return false;
                }
            }
            self.filters.iter().all(|filter| filter.matches(row))
        });
        if let Some(limit) = self.limit {
            dataset.rows.truncate(limit);
        }
        dataset
    }
}

/// Fetches the bounded row set behind a dataset reference.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, dataset: &str, query: &RowQuery) -> Result<Dataset, GatewayError>;
}

/// The two probes the gate issues.
#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn aggregate(
        &self,
        dashboard: &DashboardRef,
        plan: &AggregationPlan,
        range: Option<DateRange>,
    ) -> Result<AggregationOutcome, GatewayError>;

    async fn details(&self, dashboard: &DashboardRef, query: &RowQuery) -> Result<Dataset, GatewayError>;
}

/// Resolves dataset references to CSV files under a root directory.
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    root: PathBuf,
    options: CsvOptions,
}

impl CsvRowSource {
    pub fn new(root: impl Into<PathBuf>, options: CsvOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    fn path_for(&self, dataset: &str) -> PathBuf {
        let candidate = Path::new(dataset);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

#[async_trait]
impl RowSource for CsvRowSource {
    async fn fetch_rows(&self, dataset: &str, query: &RowQuery) -> Result<Dataset, GatewayError> {
        let path = self.path_for(dataset);
        if !path.is_file() {
            return Err(GatewayError::DatasetNotFound(dataset.to_string()));
        }
        let options = self.options;
        let loaded = task::spawn_blocking(move || Dataset::load_csv(&path, &options))
            .await
            .map_err(|err| GatewayError::Task(err.to_string()))?
            .map_err(|err| GatewayError::Fetch {
                dataset: dataset.to_string(),
                message: format!("{err:#}"),
            })?;
        Ok(query.apply(loaded))
    }
}

/// Runs the aggregation engine in-process over rows from `S`.
#[derive(Debug, Clone)]
pub struct LocalGateway<S> {
    source: S,
    options: AggregationOptions,
}

impl<S: RowSource> LocalGateway<S> {
    pub fn new(source: S, options: AggregationOptions) -> Self {
        Self { source, options }
    }
}

#[async_trait]
impl<S: RowSource> DataGateway for LocalGateway<S> {
    async fn aggregate(
        &self,
        dashboard: &DashboardRef,
        plan: &AggregationPlan,
        range: Option<DateRange>,
    ) -> Result<AggregationOutcome, GatewayError> {
        let dataset = self
            .source
            .fetch_rows(&dashboard.dataset, &RowQuery::default())
            .await?;
        Ok(compute_aggregations_with(
            &dataset,
            plan,
            range.as_ref(),
            &self.options,
        ))
    }

    async fn details(&self, dashboard: &DashboardRef, query: &RowQuery) -> Result<Dataset, GatewayError> {
        self.source.fetch_rows(&dashboard.dataset, query).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub block_reasons: Vec<String>,
}

pub async fn run_gate_check<G>(gateway: &G, dashboard: &DashboardRef, layout: &CompiledLayout) -> GateVerdict
where
    G: DataGateway + ?Sized,
{
    let mut reasons: Vec<String> = validate_layout(layout)
        .into_iter()
        .map(|err| format!("layout: {err}"))
        .collect();
    for widget in layout.widgets().filter(|w| !w.binding.unresolved.is_empty()) {
        reasons.push(format!(
            "widget '{}' binds unresolved column(s): {}",
            widget.id,
            widget.binding.unresolved.join(", ")
        ));
    }

    let plan = AggregationPlan::from_layout(layout);
    let details_query = RowQuery {
        limit: Some(DETAILS_PROBE_LIMIT),
        ..RowQuery::default()
    };
    debug!(
        "Probing dashboard '{}' with {} KPI(s), {} series, {} ranking(s)",
        dashboard.id,
        plan.kpis.len(),
        plan.series.len(),
        plan.rankings.len()
    );
    let (aggregate, details) = tokio::join!(
        gateway.aggregate(dashboard, &plan, None),
        gateway.details(dashboard, &details_query)
    );

    match details {
        Err(err) => reasons.push(format!("details probe failed: {err}")),
        Ok(rows) => {
            if rows.is_empty() {
                reasons.push("details probe returned no rows".to_string());
            }
            if !layout.fingerprint.is_empty() && schema_fingerprint(&rows.columns) != layout.fingerprint {
                reasons.push(format!(
                    "dataset '{}' columns changed since the layout was compiled",
                    dashboard.dataset
                ));
            }
        }
    }

    match aggregate {
        Err(err) => reasons.push(format!("aggregate probe failed: {err}")),
        Ok(outcome) => {
            let quality = &outcome.quality;
            if quality.has_warning(WarningCode::NoData) {
                reasons.push("aggregate probe returned no data".to_string());
            }
            for warning in quality.warnings_with(WarningCode::ColumnNotFound) {
                reasons.push(format!("unresolved column: {}", warning.message));
            }
            let bound: Vec<f64> = outcome
                .result
                .kpis
                .iter()
                .filter(|kpi| kpi.column.is_some() && kpi.resolved)
                .map(|kpi| kpi.value)
                .collect();
            if !bound.is_empty() && bound.iter().all(|value| *value == 0.0) {
                reasons.push("every KPI evaluated to zero".to_string());
            }
            reasons.extend(render_shape_gaps(layout, &outcome.result));
        }
    }

    for reason in &reasons {
        warn!("Gate blocked '{}': {}", dashboard.id, reason);
    }
    let passed = reasons.is_empty();
    info!(
        "Gate check for '{}' {}",
        dashboard.id,
        if passed { "passed" } else { "failed" }
    );
    GateVerdict {
        passed,
        block_reasons: reasons,
    }
}

/// Widgets whose binding produced no payload of the shape they render.
pub fn render_shape_gaps(layout: &CompiledLayout, result: &AggregationResult) -> Vec<String> {
    let mut gaps = Vec::new();
    for widget in layout.widgets() {
        let has_payload = match widget.widget_type {
            WidgetType::StatusCard | WidgetType::KpiCard | WidgetType::CurrencyKpi => {
                result.kpi(&widget.id).is_some()
            }
            WidgetType::LineChart | WidgetType::AreaChart => result
                .series
                .get(&widget.id)
                .is_some_and(|points| !points.is_empty()),
            WidgetType::FunnelChart => !result.funnel.is_empty(),
            WidgetType::BarChart | WidgetType::Ranking => {
                let prefix = format!("{}:", widget.id);
                result
                    .rankings
                    .iter()
                    .any(|(id, entries)| (*id == widget.id || id.starts_with(&prefix)) && !entries.is_empty())
            }
            WidgetType::Table => !widget.binding.columns.is_empty(),
        };
        if !has_payload {
            gaps.push(format!(
                "widget '{}' ({}) has no data to render",
                widget.id, widget.widget_type
            ));
        }
    }
    gaps
}
