//! Full-dataset aggregation: KPIs, funnel, time series and rankings.
//!
//! Every declared column is resolved against the live dataset on each call
//! (see [`crate::resolver`]); an unresolved column degrades its output to zero
//! and adds a `COLUMN_NOT_FOUND` warning to the [`DataQualityReport`] instead of
//! aborting the run. Value semantics (truthiness, numbers, dates) come from
//! [`crate::data`] so every call site agrees.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    path::Path,
};

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    capabilities::Role,
    catalog::WidgetType,
    data::{CellValue, NULL_CELL, Row, is_truthy, parse_date, to_number},
    dataset::Dataset,
    io_utils,
    layout::{CompiledLayout, DEFAULT_RANKING_LIMIT},
    quality::{
        DataQualityReport, LOW_DATE_PARSE_RATE, TimeColumnAudit, WarningCode, audit_flag,
    },
    resolver::{ResolutionRecord, resolve_column},
};

pub const DEFAULT_MAX_ROWS: usize = 50_000;
pub const EMPTY_GROUP_KEY: &str = "(empty)";
pub const ROW_COUNT_SERIES: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Sum,
    Count,
    CountDistinct,
    Avg,
    TruthyCount,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Count => "count",
            AggregationKind::CountDistinct => "count_distinct",
            AggregationKind::Avg => "avg",
            AggregationKind::TruthyCount => "truthy_count",
        }
    }

    /// Natural aggregation for a column of the given role.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Metric | Role::Currency => AggregationKind::Sum,
            Role::Percent => AggregationKind::Avg,
            Role::StageFlag => AggregationKind::TruthyCount,
            Role::Time => AggregationKind::Count,
            Role::Id | Role::Dimension | Role::Text => AggregationKind::CountDistinct,
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    #[default]
    Day,
    Week,
    Month,
}

impl TimeGrain {
    /// First calendar day of the bucket holding `date`. Weeks start on the
    /// ISO Monday.
    pub fn bucket(self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeGrain::Day => date,
            TimeGrain::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            TimeGrain::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: String,
    /// `None` counts rows.
    #[serde(default)]
    pub column: Option<String>,
    pub aggregation: AggregationKind,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesDefinition {
    pub chart_id: String,
    /// Empty counts rows per bucket.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Falls back to the aggregation of a KPI over the same column, then sum.
    #[serde(default)]
    pub aggregation: Option<AggregationKind>,
    #[serde(default)]
    pub grain: TimeGrain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingDefinition {
    pub id: String,
    pub dimension: String,
    /// `None` ranks by row count.
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default = "default_reducer")]
    pub reducer: AggregationKind,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_reducer() -> AggregationKind {
    AggregationKind::Sum
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPlan {
    pub time_column: Option<String>,
    pub kpis: Vec<KpiDefinition>,
    /// Stage columns in funnel order.
    pub funnel: Vec<String>,
    pub series: Vec<SeriesDefinition>,
    pub rankings: Vec<RankingDefinition>,
}

impl AggregationPlan {
    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_yaml(path)
    }

    /// Derives the plan from the widget bindings of a compiled layout.
    pub fn from_layout(layout: &CompiledLayout) -> Self {
        let mut plan = AggregationPlan {
            time_column: layout.time_column.clone(),
            funnel: layout.funnel_stages.clone(),
            ..AggregationPlan::default()
        };
        for widget in layout.widgets() {
            let binding = &widget.binding;
            match widget.widget_type {
                WidgetType::StatusCard | WidgetType::KpiCard | WidgetType::CurrencyKpi => {
                    plan.kpis.push(KpiDefinition {
                        id: widget.id.clone(),
                        column: binding.columns.first().cloned(),
                        aggregation: binding.aggregation.unwrap_or(AggregationKind::Count),
                        label: Some(widget.title.clone()),
                    });
                }
                WidgetType::LineChart | WidgetType::AreaChart => {
                    let grain = widget
                        .config
                        .get("grain")
                        .and_then(|g| serde_json::from_value(g.clone()).ok())
                        .unwrap_or_default();
                    plan.series.push(SeriesDefinition {
                        chart_id: widget.id.clone(),
                        columns: binding.columns.clone(),
                        aggregation: binding.aggregation,
                        grain,
                    });
                }
                WidgetType::FunnelChart => {
                    if plan.funnel.is_empty() {
                        plan.funnel = binding.columns.clone();
                    }
                }
                WidgetType::BarChart | WidgetType::Ranking => {
                    let Some(dimension) = binding.dimension.clone() else {
                        continue;
                    };
                    let reducer = binding.aggregation.unwrap_or(AggregationKind::Count);
                    if binding.columns.len() <= 1 {
                        plan.rankings.push(RankingDefinition {
                            id: widget.id.clone(),
                            dimension,
                            metric: binding.columns.first().cloned(),
                            reducer,
                            limit: binding.limit,
                        });
                    } else {
                        for column in &binding.columns {
                            plan.rankings.push(RankingDefinition {
                                id: format!("{}:{}", widget.id, column),
                                dimension: dimension.clone(),
                                metric: Some(column.clone()),
                                reducer,
                                limit: binding.limit,
                            });
                        }
                    }
                }
                WidgetType::Table => {}
            }
        }
        plan
    }
}

/// Inclusive calendar range; the end date covers its whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiValue {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_column: Option<String>,
    pub aggregation: AggregationKind,
    pub value: f64,
    pub non_null: usize,
    pub truthy: usize,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub count: usize,
    /// `count / previous count`; absent for the first stage and whenever the
    /// previous stage is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub bucket: NaiveDate,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub key: String,
    pub value: f64,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub kpis: Vec<KpiValue>,
    pub funnel: Vec<FunnelStep>,
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
    pub rankings: BTreeMap<String, Vec<RankingEntry>>,
    pub rows_considered: usize,
    pub rows_in_range: usize,
}

impl AggregationResult {
    pub fn kpi(&self, id: &str) -> Option<&KpiValue> {
        self.kpis.iter().find(|kpi| kpi.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub result: AggregationResult,
    pub quality: DataQualityReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationOptions {
    pub max_rows: usize,
    pub ranking_limit: usize,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            ranking_limit: DEFAULT_RANKING_LIMIT,
        }
    }
}

/// Running state for one aggregation over a stream of cells.
#[derive(Debug, Default)]
struct Accumulator {
    rows: usize,
    non_null: usize,
    truthy: usize,
    numeric: usize,
    sum: f64,
    distinct: Option<HashSet<String>>,
}

impl Accumulator {
    fn new(kind: AggregationKind) -> Self {
        Self {
            distinct: (kind == AggregationKind::CountDistinct).then(HashSet::new),
            ..Self::default()
        }
    }

    fn push(&mut self, value: &CellValue) {
        self.rows += 1;
        if value.is_null() {
            return;
        }
        self.non_null += 1;
        if is_truthy(value) {
            self.truthy += 1;
        }
        // Non-finite numbers are skipped; to_number never yields them.
        if let Some(number) = to_number(value) {
            self.sum += number;
            self.numeric += 1;
        }
        if let Some(distinct) = &mut self.distinct {
            distinct.insert(value.display_key().into_owned());
        }
    }

    fn value(&self, kind: AggregationKind) -> f64 {
        match kind {
            AggregationKind::Sum => self.sum,
            AggregationKind::Count => self.non_null as f64,
            AggregationKind::CountDistinct => {
                self.distinct.as_ref().map_or(0, HashSet::len) as f64
            }
            AggregationKind::Avg => {
                if self.numeric == 0 {
                    0.0
                } else {
                    self.sum / self.numeric as f64
                }
            }
            AggregationKind::TruthyCount => self.truthy as f64,
        }
    }
}

pub fn compute_aggregations(
    dataset: &Dataset,
    plan: &AggregationPlan,
    range: Option<&DateRange>,
) -> AggregationOutcome {
    compute_aggregations_with(dataset, plan, range, &AggregationOptions::default())
}

pub fn compute_aggregations_with(
    dataset: &Dataset,
    plan: &AggregationPlan,
    range: Option<&DateRange>,
    options: &AggregationOptions,
) -> AggregationOutcome {
    let mut quality = DataQualityReport::default();
    let columns = &dataset.columns;

    let ceiling = options.max_rows.min(dataset.rows.len());
    let rows = &dataset.rows[..ceiling];
    if dataset.truncated || dataset.rows.len() > options.max_rows {
        quality.warn(
            WarningCode::DataLimited,
            format!(
                "Only the first {} row(s) were aggregated; results may be incomplete",
                rows.len()
            ),
            None,
        );
    }
    if rows.is_empty() {
        quality.warn(WarningCode::NoData, "Dataset has no rows", None);
    }

    let time_column = plan.time_column.as_deref().and_then(|declared| {
        let record = resolve_column(declared, columns);
        quality.record_resolution(&record, "Time");
        record.resolved
    });

    let filtered = filter_rows(rows, plan, time_column.as_deref(), range, &mut quality);
    debug!(
        "{} of {} row(s) fall in range",
        filtered.len(),
        rows.len()
    );

    let mut result = AggregationResult {
        rows_considered: rows.len(),
        rows_in_range: filtered.len(),
        ..AggregationResult::default()
    };

    for kpi in &plan.kpis {
        result
            .kpis
            .push(compute_kpi(kpi, columns, &filtered, &mut quality));
    }

    result.funnel = compute_funnel(&plan.funnel, columns, &filtered, &mut quality);

    if let Some(time_column) = time_column.as_deref() {
        for series in &plan.series {
            let points = compute_series(series, plan, time_column, columns, &filtered, &mut quality);
            result.series.insert(series.chart_id.clone(), points);
        }
    } else if !plan.series.is_empty() {
        debug!("No time column resolved; {} series left empty", plan.series.len());
        for series in &plan.series {
            result.series.insert(series.chart_id.clone(), Vec::new());
        }
    }

    for ranking in &plan.rankings {
        let entries = compute_ranking(ranking, columns, &filtered, options, &mut quality);
        result.rankings.insert(ranking.id.clone(), entries);
    }

    info!(
        "Aggregated {} KPI(s), {} funnel stage(s), {} series, {} ranking(s) over {} row(s)",
        result.kpis.len(),
        result.funnel.len(),
        result.series.len(),
        result.rankings.len(),
        result.rows_in_range
    );
    AggregationOutcome { result, quality }
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a CellValue {
    row.get(column).unwrap_or(&NULL_CELL)
}

/// Rows that survive the date filter, paired with their parsed date.
fn filter_rows<'a>(
    rows: &'a [Row],
    plan: &AggregationPlan,
    time_column: Option<&str>,
    range: Option<&DateRange>,
    quality: &mut DataQualityReport,
) -> Vec<(&'a Row, Option<NaiveDate>)> {
    let Some(time_column) = time_column else {
        return rows.iter().map(|row| (row, None)).collect();
    };

    let mut parsed = 0usize;
    let mut in_range = 0usize;
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let date = parse_date(cell(row, time_column));
        match (date, range) {
            (Some(date), Some(range)) => {
                parsed += 1;
                if range.contains(date) {
                    in_range += 1;
                    kept.push((row, Some(date)));
                }
            }
            (Some(date), None) => {
                parsed += 1;
                in_range += 1;
                kept.push((row, Some(date)));
            }
            (None, Some(_)) => {}
            (None, None) => kept.push((row, None)),
        }
    }

    let total = rows.len();
    let parse_rate = if total == 0 { 0.0 } else { parsed as f64 / total as f64 };
    let in_range_rate = if parsed == 0 { 0.0 } else { in_range as f64 / parsed as f64 };
    if total > 0 && parse_rate < LOW_DATE_PARSE_RATE {
        quality.warn(
            WarningCode::LowDateParseRate,
            format!(
                "Only {:.0}% of '{}' values parse as dates",
                parse_rate * 100.0,
                time_column
            ),
            Some(time_column),
        );
    }
    if parsed > 0 && in_range == 0 {
        quality.warn(
            WarningCode::NoRowsInRange,
            format!("{parsed} row(s) have dates in '{time_column}' but none fall in the requested range"),
            Some(time_column),
        );
    }
    quality.time = Some(TimeColumnAudit {
        declared: plan.time_column.clone().unwrap_or_default(),
        resolved: Some(time_column.to_string()),
        total_rows: total,
        parsed_rows: parsed,
        in_range_rows: in_range,
        parse_rate,
        in_range_rate,
    });
    kept
}

fn resolve_for(
    declared: &str,
    columns: &[String],
    usage: &str,
    quality: &mut DataQualityReport,
) -> ResolutionRecord {
    let record = resolve_column(declared, columns);
    quality.record_resolution(&record, usage);
    record
}

fn compute_kpi(
    kpi: &KpiDefinition,
    columns: &[String],
    rows: &[(&Row, Option<NaiveDate>)],
    quality: &mut DataQualityReport,
) -> KpiValue {
    let mut value = KpiValue {
        id: kpi.id.clone(),
        label: kpi.label.clone(),
        column: kpi.column.clone(),
        resolved_column: None,
        aggregation: kpi.aggregation,
        value: 0.0,
        non_null: 0,
        truthy: 0,
        resolved: true,
    };
    let Some(declared) = kpi.column.as_deref() else {
        value.value = rows.len() as f64;
        value.non_null = rows.len();
        return value;
    };
    let record = resolve_for(declared, columns, "KPI", quality);
    let Some(column) = record.resolved else {
        value.resolved = false;
        return value;
    };
    let mut acc = Accumulator::new(kpi.aggregation);
    for (row, _) in rows {
        acc.push(cell(row, &column));
    }
    value.value = acc.value(kpi.aggregation);
    value.non_null = acc.non_null;
    value.truthy = acc.truthy;
    value.resolved_column = Some(column);
    value
}

fn compute_funnel(
    stages: &[String],
    columns: &[String],
    rows: &[(&Row, Option<NaiveDate>)],
    quality: &mut DataQualityReport,
) -> Vec<FunnelStep> {
    let mut steps: Vec<FunnelStep> = Vec::with_capacity(stages.len());
    for declared in stages {
        let record = resolve_for(declared, columns, "Funnel stage", quality);
        let count = match record.resolved.as_deref() {
            Some(column) => {
                let audit = audit_flag(
                    declared,
                    Some(column),
                    rows.iter().map(|(row, _)| cell(row, column)),
                );
                if !rows.is_empty() && audit.truthy == 0 {
                    quality.warn(
                        WarningCode::StageNeverTruthy,
                        format!(
                            "Stage '{column}' is never truthy across {} row(s)",
                            rows.len()
                        ),
                        Some(column),
                    );
                }
                let truthy = audit.truthy;
                quality.flags.push(audit);
                truthy
            }
            None => {
                quality.flags.push(audit_flag(declared, None, std::iter::empty()));
                0
            }
        };
        let conversion_rate = steps
            .last()
            .and_then(|previous| (previous.count > 0).then(|| count as f64 / previous.count as f64));
        steps.push(FunnelStep {
            stage: declared.clone(),
            column: record.resolved,
            count,
            conversion_rate,
        });
    }
    steps
}

fn compute_series(
    series: &SeriesDefinition,
    plan: &AggregationPlan,
    time_column: &str,
    columns: &[String],
    rows: &[(&Row, Option<NaiveDate>)],
    quality: &mut DataQualityReport,
) -> Vec<SeriesPoint> {
    let mut resolved: Vec<(String, String, AggregationKind)> = Vec::new();
    for declared in &series.columns {
        let record = resolve_for(declared, columns, "Series", quality);
        if let Some(column) = record.resolved {
            let aggregation = series
                .aggregation
                .or_else(|| {
                    plan.kpis
                        .iter()
                        .find(|kpi| kpi.column.as_deref() == Some(declared.as_str()))
                        .map(|kpi| kpi.aggregation)
                })
                .unwrap_or(AggregationKind::Sum);
            resolved.push((declared.clone(), column, aggregation));
        }
    }
    let count_rows = series.columns.is_empty();

    let mut buckets: BTreeMap<NaiveDate, Vec<Accumulator>> = BTreeMap::new();
    for (row, date) in rows {
        let Some(date) = date.or_else(|| parse_date(cell(row, time_column))) else {
            continue;
        };
        let slots = buckets.entry(series.grain.bucket(date)).or_insert_with(|| {
            if count_rows {
                vec![Accumulator::default()]
            } else {
                resolved
                    .iter()
                    .map(|(_, _, aggregation)| Accumulator::new(*aggregation))
                    .collect()
            }
        });
        if count_rows {
            slots[0].rows += 1;
            continue;
        }
        for (slot, (_, column, _)) in slots.iter_mut().zip(&resolved) {
            slot.push(cell(row, column));
        }
    }

    buckets
        .into_iter()
        .map(|(bucket, slots)| {
            let values = if count_rows {
                BTreeMap::from([(ROW_COUNT_SERIES.to_string(), slots[0].rows as f64)])
            } else {
                slots
                    .iter()
                    .zip(&resolved)
                    .map(|(slot, (declared, _, aggregation))| {
                        (declared.clone(), slot.value(*aggregation))
                    })
                    .collect()
            };
            SeriesPoint { bucket, values }
        })
        .collect()
}

fn compute_ranking(
    ranking: &RankingDefinition,
    columns: &[String],
    rows: &[(&Row, Option<NaiveDate>)],
    options: &AggregationOptions,
    quality: &mut DataQualityReport,
) -> Vec<RankingEntry> {
    let Some(dimension) = resolve_for(&ranking.dimension, columns, "Ranking dimension", quality).resolved
    else {
        return Vec::new();
    };
    let metric = match ranking.metric.as_deref() {
        Some(declared) => match resolve_for(declared, columns, "Ranking metric", quality).resolved {
            Some(column) => Some(column),
            None => return Vec::new(),
        },
        None => None,
    };

    let mut order: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Accumulator)> = Vec::new();
    for (row, _) in rows {
        let raw = cell(row, &dimension);
        let key = if raw.is_null() {
            EMPTY_GROUP_KEY.to_string()
        } else {
            raw.display_key().into_owned()
        };
        let idx = *order.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Accumulator::new(ranking.reducer)));
            groups.len() - 1
        });
        let acc = &mut groups[idx].1;
        match &metric {
            Some(column) => acc.push(cell(row, column)),
            None => acc.rows += 1,
        }
    }

    let mut entries: Vec<RankingEntry> = groups
        .into_iter()
        .map(|(key, acc)| RankingEntry {
            value: if metric.is_none() {
                acc.rows as f64
            } else {
                acc.value(ranking.reducer)
            },
            rows: acc.rows,
            key,
        })
        .collect();
    // Stable: equal values keep first-seen order.
    entries.sort_by(|a, b| b.value.total_cmp(&a.value));
    entries.truncate(ranking.limit.unwrap_or(options.ranking_limit));
    entries
}
