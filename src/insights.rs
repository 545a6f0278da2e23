//! Statistical insights over a row set: data-quality issues, funnel
//! bottlenecks, period-over-period swings and per-day outliers.
//!
//! The engine is deterministic: `today` is injected through
//! [`InsightOptions`] and every intermediate collection is ordered, so calling
//! [`generate_insights`] twice on the same input yields the same report.
//!
//! Detectors are independent and additive. Each contributes insights, quality
//! issues, or both; the health score is derived from the quality issues alone.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    capabilities::{CapabilitiesProfile, Role, detect_capabilities, is_cost_like, is_volume_like},
    config::InsightSettings,
    data::{CellValue, NULL_CELL, Row, is_truthy, parse_date, to_number},
    dataset::Dataset,
    resolver::resolve_column,
};

const MISSING_DATE_PENALTY: u32 = 2;
const MISSING_DATE_PENALTY_CAP: u32 = 20;
const STALE_WARNING_PENALTY: u32 = 10;
const STALE_CRITICAL_PENALTY: u32 = 25;
const ZERO_COST_PENALTY: u32 = 5;
const ZERO_COST_PENALTY_CAP: u32 = 20;
const MIN_OUTLIER_DAYS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Problem,
    Opportunity,
    Action,
    Anomaly,
    Bottleneck,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Problem => "problem",
            InsightKind::Opportunity => "opportunity",
            InsightKind::Action => "action",
            InsightKind::Anomaly => "anomaly",
            InsightKind::Bottleneck => "bottleneck",
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration order is severity order: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub kind: InsightKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    MissingDates,
    StaleData,
    ZeroCostWithVolume,
    UnresolvedDateColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStageStat {
    pub column: String,
    pub total: f64,
    /// Percent lost from the previous stage; absent for the first stage and
    /// when the previous total is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelAnalysis {
    pub stages: Vec<FunnelStageStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_dropoff_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub insights: Vec<Insight>,
    pub data_quality: Vec<QualityIssue>,
    pub health_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_analysis: Option<FunnelAnalysis>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightOptions {
    pub today: NaiveDate,
    pub settings: InsightSettings,
}

impl InsightOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            settings: InsightSettings::default(),
        }
    }
}

/// Numeric column chosen for analysis together with how its cells read.
#[derive(Debug, Clone)]
struct NumericColumn {
    name: String,
    role: Role,
}

impl NumericColumn {
    fn value(&self, cell: &CellValue) -> Option<f64> {
        if self.role == Role::StageFlag {
            return (!cell.is_null()).then(|| if is_truthy(cell) { 1.0 } else { 0.0 });
        }
        to_number(cell)
    }

    fn total(&self, rows: &[Row]) -> f64 {
        rows.iter()
            .filter_map(|row| self.value(cell(row, &self.name)))
            .sum()
    }

    /// Funnel candidates exclude money and ratio columns.
    fn is_funnel_candidate(&self) -> bool {
        matches!(self.role, Role::Metric | Role::StageFlag)
    }
}

/// Running mean and sample standard deviation.
#[derive(Debug, Default)]
struct SeriesStats {
    count: usize,
    sum: f64,
    sum_squares: f64,
}

impl SeriesStats {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn std_dev(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let mean = self.mean()?;
        let variance =
            (self.sum_squares - self.count as f64 * mean * mean) / (self.count as f64 - 1.0);
        Some(variance.max(0.0).sqrt())
    }
}

#[derive(Default)]
struct Findings {
    insights: Vec<Insight>,
    issues: Vec<QualityIssue>,
    missing_days: u32,
    stale_penalty: u32,
    zero_cost_rows: u32,
    funnel: Option<FunnelAnalysis>,
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a CellValue {
    row.get(column).unwrap_or(&NULL_CELL)
}

pub fn generate_insights(
    current: &Dataset,
    previous: Option<&Dataset>,
    date_column: Option<&str>,
    options: &InsightOptions,
) -> InsightsReport {
    let settings = &options.settings;
    let caps = detect_capabilities(&current.columns, &current.rows);
    let mut findings = Findings::default();

    let date_column = match date_column {
        Some(declared) => {
            let record = resolve_column(declared, &current.columns);
            if record.resolved.is_none() {
                findings.issues.push(QualityIssue {
                    kind: QualityIssueKind::UnresolvedDateColumn,
                    severity: Severity::Warning,
                    message: format!(
                        "Date column '{declared}' not found; tried {}",
                        record.attempted.join(", ")
                    ),
                    dates: Vec::new(),
                    rows: None,
                });
            }
            record.resolved
        }
        None => caps.time_column.clone(),
    };
    let numeric = numeric_columns(&caps, current, date_column.as_deref());
    debug!(
        "Insights over {} row(s); date column {:?}; {} numeric column(s)",
        current.len(),
        date_column,
        numeric.len()
    );

    if let Some(date_column) = date_column.as_deref() {
        let dates: Vec<NaiveDate> = current
            .rows
            .iter()
            .filter_map(|row| parse_date(cell(row, date_column)))
            .sorted()
            .dedup()
            .collect();
        detect_missing_dates(&dates, &mut findings);
        detect_stale_data(&dates, options.today, settings, &mut findings);
    }
    detect_zero_cost(current, &numeric, &mut findings);
    detect_bottleneck(current, &numeric, settings, &mut findings);
    if let Some(previous) = previous {
        detect_period_changes(current, previous, &numeric, settings, &mut findings);
    }
    if let Some(date_column) = date_column.as_deref() {
        detect_outliers(current, date_column, &numeric, settings, &mut findings);
    }
    derive_action(&mut findings);

    findings.insights.sort_by_key(|insight| insight.priority);
    let health_score = health_score(&findings);
    info!(
        "Generated {} insight(s) and {} data-quality issue(s); health score {}",
        findings.insights.len(),
        findings.issues.len(),
        health_score
    );
    InsightsReport {
        insights: findings.insights,
        data_quality: findings.issues,
        health_score,
        funnel_analysis: findings.funnel,
    }
}

/// Measure columns whose non-null values are all numeric, in dataset order.
fn numeric_columns(
    caps: &CapabilitiesProfile,
    dataset: &Dataset,
    date_column: Option<&str>,
) -> Vec<NumericColumn> {
    caps.columns
        .iter()
        .filter(|profile| Some(profile.name.as_str()) != date_column)
        .filter(|profile| profile.role.is_measure())
        .map(|profile| NumericColumn {
            name: profile.name.clone(),
            role: profile.role,
        })
        .filter(|column| {
            let mut non_null = dataset.values(&column.name).filter(|v| !v.is_null()).peekable();
            non_null.peek().is_some() && non_null.all(|v| column.value(v).is_some())
        })
        .collect()
}

fn detect_missing_dates(dates: &[NaiveDate], findings: &mut Findings) {
    let mut missing = Vec::new();
    for (earlier, later) in dates.iter().tuple_windows() {
        let mut day = earlier.succ_opt();
        while let Some(current) = day {
            if current >= *later {
                break;
            }
            missing.push(current);
            day = current.succ_opt();
        }
    }
    if missing.is_empty() {
        return;
    }
    findings.missing_days = u32::try_from(missing.len()).unwrap_or(u32::MAX);
    findings.issues.push(QualityIssue {
        kind: QualityIssueKind::MissingDates,
        severity: Severity::Warning,
        message: format!("{} day(s) have no records", missing.len()),
        dates: missing,
        rows: None,
    });
}

fn detect_stale_data(
    dates: &[NaiveDate],
    today: NaiveDate,
    settings: &InsightSettings,
    findings: &mut Findings,
) {
    let Some(latest) = dates.last() else {
        return;
    };
    let age = (today - *latest).num_days();
    let (severity, penalty) = if age > settings.stale_critical_days {
        (Severity::Critical, STALE_CRITICAL_PENALTY)
    } else if age > settings.stale_warning_days {
        (Severity::Warning, STALE_WARNING_PENALTY)
    } else {
        return;
    };
    findings.stale_penalty = penalty;
    findings.issues.push(QualityIssue {
        kind: QualityIssueKind::StaleData,
        severity,
        message: format!("Most recent record is from {latest}, {age} day(s) ago"),
        dates: vec![*latest],
        rows: None,
    });
}

fn detect_zero_cost(dataset: &Dataset, numeric: &[NumericColumn], findings: &mut Findings) {
    let costs: Vec<&NumericColumn> = numeric.iter().filter(|c| is_cost_like(&c.name)).collect();
    let volumes: Vec<&NumericColumn> = numeric
        .iter()
        .filter(|c| is_volume_like(&c.name) && !is_cost_like(&c.name))
        .collect();
    if costs.is_empty() || volumes.is_empty() {
        return;
    }
    let rows = dataset
        .rows
        .iter()
        .filter(|row| {
            costs
                .iter()
                .any(|c| c.value(cell(row, &c.name)) == Some(0.0))
                && volumes
                    .iter()
                    .any(|v| v.value(cell(row, &v.name)).is_some_and(|n| n > 0.0))
        })
        .count();
    if rows == 0 {
        return;
    }
    let cost_names = costs.iter().map(|c| c.name.as_str()).join(", ");
    findings.zero_cost_rows = u32::try_from(rows).unwrap_or(u32::MAX);
    findings.issues.push(QualityIssue {
        kind: QualityIssueKind::ZeroCostWithVolume,
        severity: Severity::Warning,
        message: format!("{rows} row(s) report volume with zero {cost_names}"),
        dates: Vec::new(),
        rows: Some(rows),
    });
    findings.insights.push(Insight {
        id: "anomaly:zero_cost".to_string(),
        kind: InsightKind::Anomaly,
        priority: Priority::High,
        title: "Volume recorded without cost".to_string(),
        description: format!(
            "{rows} row(s) have leads or volume but a zero value in {cost_names}"
        ),
        metric: costs.first().map(|c| c.name.clone()),
        before: None,
        after: None,
        change_pct: None,
        suggested_action: Some("Check that spend is being imported for every day".to_string()),
    });
}

fn detect_bottleneck(
    dataset: &Dataset,
    numeric: &[NumericColumn],
    settings: &InsightSettings,
    findings: &mut Findings,
) {
    let mut totals: Vec<(String, f64)> = numeric
        .iter()
        .filter(|c| c.is_funnel_candidate())
        .map(|c| (c.name.clone(), c.total(&dataset.rows)))
        .collect();
    if totals.len() < 2 {
        return;
    }
    // Volume order stands in for stage order; ties keep dataset order.
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut stages: Vec<FunnelStageStat> = Vec::with_capacity(totals.len());
    let mut worst: Option<(usize, f64)> = None;
    for (idx, (column, total)) in totals.into_iter().enumerate() {
        let dropoff_pct = stages
            .last()
            .filter(|previous| previous.total > 0.0)
            .map(|previous| (1.0 - total / previous.total) * 100.0);
        if let Some(dropoff) = dropoff_pct
            && worst.is_none_or(|(_, current)| dropoff > current)
        {
            worst = Some((idx, dropoff));
        }
        stages.push(FunnelStageStat {
            column,
            total,
            dropoff_pct,
        });
    }

    if let Some((idx, dropoff)) = worst
        && dropoff > settings.bottleneck_threshold_pct
    {
        let stage = &stages[idx];
        let previous = &stages[idx - 1];
        let priority = if dropoff > settings.bottleneck_critical_pct {
            Priority::Critical
        } else {
            Priority::High
        };
        findings.insights.push(Insight {
            id: format!("bottleneck:{}", stage.column),
            kind: InsightKind::Bottleneck,
            priority,
            title: format!("Largest drop-off before {}", stage.column),
            description: format!(
                "{:.1}% of volume is lost between {} ({}) and {} ({})",
                dropoff, previous.column, previous.total, stage.column, stage.total
            ),
            metric: Some(stage.column.clone()),
            before: Some(previous.total),
            after: Some(stage.total),
            change_pct: Some(-dropoff),
            suggested_action: Some(format!(
                "Review what happens between {} and {}",
                previous.column, stage.column
            )),
        });
    }

    findings.funnel = Some(FunnelAnalysis {
        worst_stage: worst.map(|(idx, _)| stages[idx].column.clone()),
        worst_dropoff_pct: worst.map(|(_, dropoff)| dropoff),
        stages,
    });
}

fn detect_period_changes(
    current: &Dataset,
    previous: &Dataset,
    numeric: &[NumericColumn],
    settings: &InsightSettings,
    findings: &mut Findings,
) {
    for column in numeric {
        if !previous.columns.contains(&column.name) {
            continue;
        }
        let after = column.total(&current.rows);
        let before = column.total(&previous.rows);
        if before == 0.0 {
            continue;
        }
        let change = (after - before) / before.abs() * 100.0;
        let magnitude = change.abs();
        let cost = is_cost_like(&column.name);
        let favorable = if cost { change < 0.0 } else { change > 0.0 };
        let direction = if change > 0.0 { "up" } else { "down" };

        let (kind, priority, action) = if favorable && magnitude > settings.change_threshold_pct {
            let priority = if magnitude > 50.0 {
                Priority::Medium
            } else {
                Priority::Low
            };
            (
                InsightKind::Opportunity,
                priority,
                format!("Find what drove {} {direction} and repeat it", column.name),
            )
        } else if !favorable && magnitude > settings.problem_threshold_pct {
            let priority = if magnitude <= 50.0 {
                Priority::Medium
            } else if magnitude <= 100.0 {
                Priority::High
            } else {
                Priority::Critical
            };
            (
                InsightKind::Problem,
                priority,
                format!("Investigate why {} moved {direction}", column.name),
            )
        } else {
            continue;
        };

        findings.insights.push(Insight {
            id: format!("{kind}:{}", column.name),
            kind,
            priority,
            title: format!("{} {direction} {magnitude:.1}%", column.name),
            description: format!(
                "{} went from {before} to {after} compared with the previous period",
                column.name
            ),
            metric: Some(column.name.clone()),
            before: Some(before),
            after: Some(after),
            change_pct: Some(change),
            suggested_action: Some(action),
        });
    }
}

fn detect_outliers(
    dataset: &Dataset,
    date_column: &str,
    numeric: &[NumericColumn],
    settings: &InsightSettings,
    findings: &mut Findings,
) {
    for column in numeric.iter().take(settings.outlier_columns) {
        let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for row in &dataset.rows {
            let Some(date) = parse_date(cell(row, date_column)) else {
                continue;
            };
            if let Some(value) = column.value(cell(row, &column.name)) {
                *daily.entry(date).or_insert(0.0) += value;
            }
        }
        if daily.len() < MIN_OUTLIER_DAYS {
            continue;
        }
        let mut stats = SeriesStats::default();
        daily.values().for_each(|value| stats.add(*value));
        let (Some(mean), Some(std_dev)) = (stats.mean(), stats.std_dev()) else {
            continue;
        };
        if std_dev == 0.0 {
            continue;
        }
        let outliers: Vec<(NaiveDate, f64)> = daily
            .iter()
            .filter(|(_, value)| (**value - mean).abs() > settings.outlier_sigma * std_dev)
            .map(|(date, value)| (*date, *value))
            .collect();
        if outliers.is_empty() || outliers.len() > settings.max_outlier_days {
            if !outliers.is_empty() {
                debug!(
                    "{} outlier day(s) in '{}' exceed the anomaly limit",
                    outliers.len(),
                    column.name
                );
            }
            continue;
        }
        let listed = outliers
            .iter()
            .map(|(date, value)| format!("{date} ({value})"))
            .join(", ");
        findings.insights.push(Insight {
            id: format!("anomaly:outlier:{}", column.name),
            kind: InsightKind::Anomaly,
            priority: Priority::Medium,
            title: format!("Unusual daily {}", column.name),
            description: format!(
                "{listed} deviate more than {}σ from the daily mean of {mean:.1}",
                settings.outlier_sigma
            ),
            metric: Some(column.name.clone()),
            before: Some(mean),
            after: outliers.first().map(|(_, value)| *value),
            change_pct: None,
            suggested_action: Some("Confirm those days were recorded correctly".to_string()),
        });
    }
}

/// Adds one critical action pointing at the most severe problem or
/// bottleneck; the first one found wins a tie.
fn derive_action(findings: &mut Findings) {
    let target = findings
        .insights
        .iter()
        .filter(|i| matches!(i.kind, InsightKind::Problem | InsightKind::Bottleneck))
        .min_by_key(|i| i.priority);
    let Some(target) = target else {
        return;
    };
    let action = Insight {
        id: format!("action:{}", target.id),
        kind: InsightKind::Action,
        priority: Priority::Critical,
        title: format!("Recommended: {}", target.title),
        description: target.description.clone(),
        metric: target.metric.clone(),
        before: target.before,
        after: target.after,
        change_pct: target.change_pct,
        suggested_action: target.suggested_action.clone(),
    };
    findings.insights.insert(0, action);
}

fn health_score(findings: &Findings) -> u8 {
    let missing = (findings.missing_days.saturating_mul(MISSING_DATE_PENALTY)).min(MISSING_DATE_PENALTY_CAP);
    let zero_cost = (findings.zero_cost_rows.saturating_mul(ZERO_COST_PENALTY)).min(ZERO_COST_PENALTY_CAP);
    let penalty = missing + zero_cost + findings.stale_penalty;
    100u32.saturating_sub(penalty).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn dataset(columns: &[&str], rows: Vec<Vec<String>>) -> Dataset {
        let headers: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Dataset::from_records(&headers, &rows)
    }

    #[test]
    fn missing_days_are_listed_strictly_between_gaps() {
        let mut findings = Findings::default();
        detect_missing_dates(
            &[date("2024-03-01"), date("2024-03-02"), date("2024-03-05")],
            &mut findings,
        );
        assert_eq!(findings.issues[0].dates, vec![date("2024-03-03"), date("2024-03-04")]);
        assert_eq!(findings.missing_days, 2);
    }

    #[test]
    fn staleness_escalates_with_age() {
        let settings = InsightSettings::default();
        let latest = [date("2024-03-01")];
        let mut fresh = Findings::default();
        detect_stale_data(&latest, date("2024-03-04"), &settings, &mut fresh);
        assert!(fresh.issues.is_empty());
        let mut warning = Findings::default();
        detect_stale_data(&latest, date("2024-03-05"), &settings, &mut warning);
        assert_eq!(warning.issues[0].severity, Severity::Warning);
        let mut critical = Findings::default();
        detect_stale_data(&latest, date("2024-03-09"), &settings, &mut critical);
        assert_eq!(critical.issues[0].severity, Severity::Critical);
        assert_eq!(critical.stale_penalty, STALE_CRITICAL_PENALTY);
    }

    #[test]
    fn health_penalties_are_capped() {
        let findings = Findings {
            missing_days: 50,
            zero_cost_rows: 50,
            stale_penalty: STALE_CRITICAL_PENALTY,
            ..Findings::default()
        };
        assert_eq!(health_score(&findings), 35);
        assert_eq!(health_score(&Findings::default()), 100);
    }

    #[test]
    fn single_spike_is_an_outlier() {
        let mut rows: Vec<Vec<String>> = (1..=10)
            .map(|day| vec![format!("2024-03-{day:02}"), "10".to_string()])
            .collect();
        rows[9][1] = "100".to_string();
        let data = dataset(&["dia", "leads"], rows);
        let report = generate_insights(&data, None, Some("dia"), &InsightOptions::new(date("2024-03-10")));
        let outlier = report
            .insights
            .iter()
            .find(|i| i.id == "anomaly:outlier:leads")
            .expect("outlier insight");
        assert_eq!(outlier.after, Some(100.0));
    }

    #[test]
    fn cost_drop_is_an_opportunity() {
        let current = dataset(&["custo", "leads"], vec![vec!["50".into(), "10".into()]]);
        let previous = dataset(&["custo", "leads"], vec![vec!["100".into(), "10".into()]]);
        let report = generate_insights(
            &current,
            Some(&previous),
            None,
            &InsightOptions::new(date("2024-03-10")),
        );
        let insight = report
            .insights
            .iter()
            .find(|i| i.metric.as_deref() == Some("custo"))
            .unwrap();
        assert_eq!(insight.kind, InsightKind::Opportunity);
        assert_eq!(insight.change_pct, Some(-50.0));
    }
}
