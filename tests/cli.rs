mod common;

use std::fs;

use adaptive_dash::{
    aggregate::AggregationOutcome, capabilities::CapabilitiesProfile, gate::GateVerdict,
    insights::InsightsReport, resolver::ResolutionRecord,
};
use assert_cmd::Command;
use common::{TestWorkspace, daily_totals, stage_funnel, to_csv};
use predicates::str::contains;

fn cli() -> Command {
    Command::cargo_bin("adaptive-dash").expect("binary exists")
}

fn stdout_json<T: serde::de::DeserializeOwned>(output: &[u8]) -> T {
    serde_json::from_slice(output).expect("stdout is JSON")
}

#[test]
fn probe_reads_custom_delimiter() {
    let workspace = TestWorkspace::new();
    let csv = to_csv(&daily_totals()).replace(',', ";");
    let path = workspace.write("daily.csv", &csv);

    let output = cli()
        .args(["probe", "-i", path.to_str().unwrap(), "--delimiter", ";"])
        .output()
        .expect("run probe");
    assert!(output.status.success());
    let profile: CapabilitiesProfile = stdout_json(&output.stdout);
    assert!(profile.has_time);
    assert_eq!(profile.stage_flags_count(), 0);
    assert_eq!(profile.row_count, 10);
}

#[test]
fn compile_then_aggregate_from_layout() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("funnel.csv", &stage_funnel());
    let outcome_path = workspace.path().join("outcome.json");

    cli()
        .args([
            "compile",
            "-i",
            csv_path.to_str().unwrap(),
            "-o",
            outcome_path.to_str().unwrap(),
        ])
        .assert()
        .success();
    let outcome: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&outcome_path).expect("read outcome")).unwrap();
    let layout_path = workspace.path().join("layout.json");
    fs::write(&layout_path, outcome["layout"].to_string()).expect("write layout");

    let output = cli()
        .args([
            "aggregate",
            "-i",
            csv_path.to_str().unwrap(),
            "--layout",
            layout_path.to_str().unwrap(),
            "--start",
            "2024-03-01",
            "--end",
            "2024-03-05",
        ])
        .output()
        .expect("run aggregate");
    assert!(output.status.success());
    let aggregated: AggregationOutcome = stdout_json(&output.stdout);
    assert_eq!(aggregated.result.rows_in_range, 50);
    assert_eq!(aggregated.result.funnel.len(), 5);
}

#[test]
fn compile_outcome_lists_trace_steps() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("daily.csv", &daily_totals());

    let output = cli()
        .args(["compile", "-i", csv_path.to_str().unwrap()])
        .output()
        .expect("run compile");
    assert!(output.status.success());
    let outcome: serde_json::Value = stdout_json(&output.stdout);
    let steps: Vec<&str> = outcome["trace"]["steps"]
        .as_array()
        .expect("trace steps")
        .iter()
        .map(|step| step["name"].as_str().unwrap())
        .collect();
    assert_eq!(steps.first(), Some(&"validate_catalog"));
    assert_eq!(steps.last(), Some(&"validate_layout"));
    assert_eq!(outcome["layout"]["tabs"].as_array().unwrap().len(), 2);
}

#[test]
fn resolve_reports_each_declared_column() {
    let output = cli()
        .args([
            "resolve",
            "Vendas",
            "leads",
            "--columns",
            "dia,leads_total,venda_total",
        ])
        .output()
        .expect("run resolve");
    assert!(output.status.success());
    let records: Vec<ResolutionRecord> = stdout_json(&output.stdout);
    assert!(!records[0].is_resolved());
    assert_eq!(records[1].resolved.as_deref(), Some("leads_total"));
}

#[test]
fn resolve_requires_a_column_source() {
    cli()
        .args(["resolve", "Vendas"])
        .assert()
        .failure()
        .stderr(contains("--input"));
}

#[test]
fn aggregate_range_needs_both_ends() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("daily.csv", &daily_totals());
    let plan_path = workspace.write("plan.yml", "kpis:\n  - id: rows\n    aggregation: count\n");
    cli()
        .args([
            "aggregate",
            "-i",
            csv_path.to_str().unwrap(),
            "--plan",
            plan_path.to_str().unwrap(),
            "--start",
            "2024-03-01",
        ])
        .assert()
        .failure()
        .stderr(contains("--end"));
}

#[test]
fn settings_file_caps_aggregated_rows() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("daily.csv", &daily_totals());
    let plan_path = workspace.write("plan.yml", "kpis:\n  - id: rows\n    aggregation: count\n");
    let config_path = workspace.write("settings.yml", "aggregation:\n  max_rows: 3\n");

    let output = cli()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "aggregate",
            "-i",
            csv_path.to_str().unwrap(),
            "--plan",
            plan_path.to_str().unwrap(),
        ])
        .output()
        .expect("run aggregate");
    assert!(output.status.success());
    let aggregated: AggregationOutcome = stdout_json(&output.stdout);
    assert_eq!(aggregated.result.kpi("rows").unwrap().value, 3.0);
    assert!(
        aggregated
            .quality
            .warnings
            .iter()
            .any(|w| w.code.as_str() == "DATA_LIMITED")
    );
}

#[test]
fn insights_use_the_given_reference_day() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("funnel.csv", &stage_funnel());

    let output = cli()
        .args([
            "insights",
            "-i",
            csv_path.to_str().unwrap(),
            "--today",
            "2024-03-20",
        ])
        .output()
        .expect("run insights");
    assert!(output.status.success());
    let report: InsightsReport = stdout_json(&output.stdout);
    assert_eq!(report.health_score, 75);
    assert!(report.insights.iter().any(|i| i.id == "bottleneck:st_venda"));
}

#[test]
fn gate_passes_then_blocks_after_schema_change() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("funnel.csv", &stage_funnel());
    let outcome_path = workspace.path().join("outcome.json");
    cli()
        .args([
            "compile",
            "-i",
            csv_path.to_str().unwrap(),
            "-o",
            outcome_path.to_str().unwrap(),
        ])
        .assert()
        .success();
    let outcome: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&outcome_path).unwrap()).unwrap();
    let layout_path = workspace.path().join("layout.json");
    fs::write(&layout_path, outcome["layout"].to_string()).unwrap();

    let output = cli()
        .args([
            "gate",
            "--layout",
            layout_path.to_str().unwrap(),
            "-i",
            csv_path.to_str().unwrap(),
        ])
        .output()
        .expect("run gate");
    assert!(output.status.success());
    let verdict: GateVerdict = stdout_json(&output.stdout);
    assert!(verdict.passed);

    let mut shrunk = stage_funnel();
    shrunk.columns.retain(|column| column != "st_venda");
    fs::write(&csv_path, to_csv(&shrunk)).unwrap();
    cli()
        .args([
            "gate",
            "--layout",
            layout_path.to_str().unwrap(),
            "-i",
            csv_path.to_str().unwrap(),
            "--dashboard-id",
            "weekly",
        ])
        .assert()
        .failure()
        .stdout(contains("columns changed"))
        .stderr(contains("Gate check failed"));
}

#[test]
fn summary_flag_prints_a_table() {
    let workspace = TestWorkspace::new();
    let csv_path = workspace.write_dataset("daily.csv", &daily_totals());
    cli()
        .args(["probe", "-i", csv_path.to_str().unwrap(), "--summary"])
        .assert()
        .success()
        .stdout(contains("column"))
        .stdout(contains("leads_total  metric"));
}
