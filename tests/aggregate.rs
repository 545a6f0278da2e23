mod common;

use adaptive_dash::{
    aggregate::{
        AggregationKind, AggregationOptions, AggregationPlan, DateRange, KpiDefinition,
        RankingDefinition, SeriesDefinition, TimeGrain, compute_aggregations,
        compute_aggregations_with,
    },
    capabilities::detect_capabilities,
    layout::compile_layout,
    quality::WarningCode,
};
use chrono::NaiveDate;
use common::{FUNNEL_STAGES, TestWorkspace, daily_totals, dataset, stage_funnel};

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn kpi(id: &str, column: Option<&str>, aggregation: AggregationKind) -> KpiDefinition {
    KpiDefinition {
        id: id.to_string(),
        column: column.map(str::to_string),
        aggregation,
        label: None,
    }
}

#[test]
fn sum_covers_every_row_without_a_range() {
    let data = daily_totals();
    let plan = AggregationPlan {
        time_column: Some("dia".into()),
        kpis: vec![kpi("leads", Some("leads_total"), AggregationKind::Sum)],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let expected: f64 = (10..=19).map(f64::from).sum();
    assert_eq!(outcome.result.kpi("leads").unwrap().value, expected);
    assert_eq!(outcome.result.rows_in_range, 10);
    assert!(outcome.quality.warnings.is_empty());
}

#[test]
fn unresolvable_kpi_reports_zero_and_column_not_found() {
    let data = daily_totals();
    let plan = AggregationPlan {
        kpis: vec![kpi("sales", Some("Vendas"), AggregationKind::Sum)],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let value = outcome.result.kpi("sales").unwrap();
    assert_eq!(value.value, 0.0);
    assert!(!value.resolved);
    let warning = outcome
        .quality
        .warnings_with(WarningCode::ColumnNotFound)
        .next()
        .expect("column warning");
    assert!(warning.message.contains("'Vendas'"));
    assert!(warning.message.contains("st_vendas"));
    assert!(!outcome.quality.resolutions[0].is_resolved());
}

#[test]
fn inclusive_range_keeps_both_endpoints() {
    let data = daily_totals();
    let plan = AggregationPlan {
        time_column: Some("dia".into()),
        kpis: vec![kpi("rows", None, AggregationKind::Count)],
        ..AggregationPlan::default()
    };
    let range = DateRange::new(day("2024-03-03"), day("2024-03-05"));
    let outcome = compute_aggregations(&data, &plan, Some(&range));
    assert_eq!(outcome.result.kpi("rows").unwrap().value, 3.0);
    let audit = outcome.quality.time.as_ref().expect("time audit");
    assert_eq!(audit.parsed_rows, 10);
    assert_eq!(audit.in_range_rows, 3);
}

#[test]
fn range_outside_data_warns_no_rows_in_range() {
    let data = daily_totals();
    let plan = AggregationPlan {
        time_column: Some("dia".into()),
        kpis: vec![kpi("rows", None, AggregationKind::Count)],
        ..AggregationPlan::default()
    };
    let range = DateRange::new(day("2025-01-01"), day("2025-01-31"));
    let outcome = compute_aggregations(&data, &plan, Some(&range));
    assert_eq!(outcome.result.kpi("rows").unwrap().value, 0.0);
    assert!(outcome.quality.has_warning(WarningCode::NoRowsInRange));
}

#[test]
fn funnel_counts_truthy_rows_and_conversion() {
    let data = stage_funnel();
    let plan = AggregationPlan {
        funnel: FUNNEL_STAGES.iter().map(|s| s.to_string()).collect(),
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let counts: Vec<usize> = outcome.result.funnel.iter().map(|s| s.count).collect();
    assert_eq!(counts, vec![100, 80, 50, 30, 10]);
    assert_eq!(outcome.result.funnel[0].conversion_rate, None);
    assert_eq!(outcome.result.funnel[3].conversion_rate, Some(0.6));
    assert_eq!(outcome.quality.flags.len(), 5);
}

#[test]
fn conversion_after_an_empty_stage_is_undefined() {
    let rows = (0..4)
        .map(|idx| vec!["0".to_string(), (idx % 2).to_string()])
        .collect();
    let data = dataset(&["st_agendado", "st_venda"], rows);
    let plan = AggregationPlan {
        funnel: vec!["agendado".into(), "venda".into()],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    assert_eq!(outcome.result.funnel[0].count, 0);
    assert_eq!(outcome.result.funnel[1].count, 2);
    assert_eq!(outcome.result.funnel[1].conversion_rate, None);
    assert!(outcome.quality.has_warning(WarningCode::StageNeverTruthy));
}

#[test]
fn series_bucket_by_week() {
    let data = daily_totals();
    let plan = AggregationPlan {
        time_column: Some("dia".into()),
        series: vec![SeriesDefinition {
            chart_id: "trend".into(),
            columns: vec!["leads_total".into()],
            aggregation: Some(AggregationKind::Sum),
            grain: TimeGrain::Week,
        }],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let points = &outcome.result.series["trend"];
    // 2024-03-01 is a Friday and 2024-03-10 a Sunday.
    let buckets: Vec<NaiveDate> = points.iter().map(|p| p.bucket).collect();
    assert_eq!(buckets, vec![day("2024-02-26"), day("2024-03-04")]);
    assert_eq!(points[0].values["leads_total"], 10.0 + 11.0 + 12.0);
    assert_eq!(points[1].values["leads_total"], (13..=19).map(f64::from).sum::<f64>());
}

#[test]
fn rankings_respect_the_limit() {
    let data = stage_funnel();
    let plan = AggregationPlan {
        rankings: vec![RankingDefinition {
            id: "by_canal".into(),
            dimension: "canal".into(),
            metric: Some("st_venda".into()),
            reducer: AggregationKind::TruthyCount,
            limit: Some(1),
        }],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let entries = &outcome.result.rankings["by_canal"];
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "google");
    assert_eq!(entries[0].value, 5.0);
    assert_eq!(entries[0].rows, 50);
}

#[test]
fn row_ceiling_marks_results_as_limited() {
    let data = daily_totals();
    let plan = AggregationPlan {
        kpis: vec![kpi("rows", None, AggregationKind::Count)],
        ..AggregationPlan::default()
    };
    let options = AggregationOptions {
        max_rows: 4,
        ..AggregationOptions::default()
    };
    let outcome = compute_aggregations_with(&data, &plan, None, &options);
    assert_eq!(outcome.result.kpi("rows").unwrap().value, 4.0);
    assert!(outcome.quality.has_warning(WarningCode::DataLimited));
}

#[test]
fn empty_dataset_warns_no_data() {
    let data = dataset(&["dia", "leads_total"], Vec::new());
    let plan = AggregationPlan {
        kpis: vec![kpi("leads", Some("leads_total"), AggregationKind::Sum)],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    assert!(outcome.quality.has_warning(WarningCode::NoData));
}

#[test]
fn plan_derived_from_layout_covers_every_data_widget() {
    let data = stage_funnel();
    let caps = detect_capabilities(&data.columns, &data.rows);
    let layout = compile_layout(&caps, None).layout.expect("layout");
    let plan = AggregationPlan::from_layout(&layout);
    assert_eq!(plan.time_column.as_deref(), Some("dia"));
    assert_eq!(plan.funnel, FUNNEL_STAGES.to_vec());
    assert!(!plan.kpis.is_empty());
    assert!(!plan.series.is_empty());
    assert!(plan.rankings.iter().any(|r| r.dimension == "canal"));

    let outcome = compute_aggregations(&data, &plan, None);
    assert!(
        outcome
            .quality
            .warnings_with(WarningCode::ColumnNotFound)
            .next()
            .is_none()
    );
}

#[test]
fn plans_load_from_yaml() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "aggregation.yml",
        "time_column: dia\nkpis:\n  - id: leads\n    column: leads_total\n    aggregation: sum\nseries:\n  - chart_id: trend\n    columns: [leads_total]\n    grain: month\n",
    );
    let plan = AggregationPlan::load(&path).expect("load plan");
    assert_eq!(plan.kpis[0].aggregation, AggregationKind::Sum);
    assert_eq!(plan.series[0].grain, TimeGrain::Month);
    assert!(plan.rankings.is_empty());
}

#[test]
fn mostly_unparseable_dates_raise_low_parse_rate() {
    let rows = ["2024-03-01", "sem data", "??", "pendente"]
        .iter()
        .map(|d| vec![d.to_string(), "1".to_string()])
        .collect();
    let data = dataset(&["dia", "leads"], rows);
    let plan = AggregationPlan {
        time_column: Some("dia".into()),
        kpis: vec![kpi("leads", Some("leads"), AggregationKind::Sum)],
        ..AggregationPlan::default()
    };
    let outcome = compute_aggregations(&data, &plan, None);
    let warning = outcome
        .quality
        .warnings_with(WarningCode::LowDateParseRate)
        .next()
        .expect("low parse rate warning");
    assert_eq!(warning.column.as_deref(), Some("dia"));
    assert!(warning.message.contains("25%"));
    let time = outcome.quality.time.as_ref().expect("time audit");
    assert_eq!(time.parsed_rows, 1);
    assert_eq!(time.total_rows, 4);
}
