pub mod aggregate;
pub mod capabilities;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod gate;
pub mod insights;
pub mod io_utils;
pub mod layout;
pub mod quality;
pub mod resolver;
pub mod table;
pub mod trace;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    aggregate::{AggregationOutcome, AggregationPlan, DateRange, compute_aggregations_with},
    capabilities::{CapabilitiesProfile, detect_capabilities_with},
    cli::{Cli, Commands, InputArgs, OutputArgs},
    config::Settings,
    data::format_number,
    dataset::{CsvOptions, Dataset},
    gate::{CsvRowSource, DashboardRef, GateVerdict, LocalGateway, run_gate_check},
    insights::{InsightOptions, InsightsReport, generate_insights},
    layout::{CompileOutcome, CompiledLayout, DashboardPlan, compile_layout},
    resolver::{ResolutionRecord, resolve_column},
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("adaptive_dash", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())
        .context("Loading settings")?;
    match cli.command {
        Commands::Probe(args) => handle_probe(&args, &settings),
        Commands::Compile(args) => handle_compile(&args, &settings),
        Commands::Resolve(args) => handle_resolve(&args),
        Commands::Aggregate(args) => handle_aggregate(&args, &settings),
        Commands::Insights(args) => handle_insights(&args, &settings),
        Commands::Gate(args) => handle_gate(&args, &settings),
    }
}

fn csv_options(input: &InputArgs, settings: &Settings) -> Result<CsvOptions> {
    Ok(CsvOptions {
        delimiter: input.delimiter,
        encoding: io_utils::resolve_encoding(input.input_encoding.as_deref())?,
        max_rows: Some(settings.aggregation.max_rows),
    })
}

fn load_dataset(input: &InputArgs, settings: &Settings) -> Result<Dataset> {
    let options = csv_options(input, settings)?;
    Dataset::load_csv(&input.input, &options)
        .with_context(|| format!("Loading dataset from {:?}", input.input))
}

fn detect(dataset: &Dataset, sample_rows: usize) -> CapabilitiesProfile {
    detect_capabilities_with(&dataset.columns, &dataset.rows, sample_rows)
}

fn emit<T: serde::Serialize>(output: &OutputArgs, value: &T, summary: impl FnOnce() -> TextTable) -> Result<()> {
    if output.summary {
        summary().print();
        if let Some(path) = output.output.as_deref() {
            io_utils::write_json(Some(path), value)?;
        }
        Ok(())
    } else {
        io_utils::write_json(output.output.as_deref(), value)
    }
}

fn handle_probe(args: &cli::ProbeArgs, settings: &Settings) -> Result<()> {
    info!(
        "Probing '{}' with delimiter '{}'",
        args.input.input.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(&args.input.input, args.input.delimiter))
    );
    let dataset = load_dataset(&args.input, settings)?;
    let sample_rows = args.sample_rows.unwrap_or(settings.detector.sample_rows);
    let profile = detect(&dataset, sample_rows);
    info!(
        "Detected {} column(s): time={:?}, {} stage flag(s), {} dimension(s), {} measure(s)",
        profile.columns.len(),
        profile.time_column,
        profile.stage_flags_count(),
        profile.dimensions.len(),
        profile.measure_count()
    );
    emit(&args.output, &profile, || {
        let mut table = TextTable::new(["column", "role", "source"]);
        for column in &profile.columns {
            table.push([
                column.name.clone(),
                column.role.to_string(),
                format!("{:?}", column.source).to_lowercase(),
            ]);
        }
        table
    })
}

fn handle_compile(args: &cli::CompileArgs, settings: &Settings) -> Result<()> {
    let dataset = load_dataset(&args.input, settings)?;
    let profile = detect(&dataset, args.sample_rows.unwrap_or(settings.detector.sample_rows));
    let plan = match &args.plan {
        Some(path) => Some(
            DashboardPlan::load(path).with_context(|| format!("Loading plan from {path:?}"))?,
        ),
        None => None,
    };
    let outcome = compile_layout(&profile, plan.as_ref());
    for warning in &outcome.warnings {
        debug!("Compile warning: {warning}");
    }
    emit(&args.output, &outcome, || layout_summary(&outcome))?;
    if !outcome.succeeded() {
        bail!("Layout compilation failed: {}", outcome.errors.join("; "));
    }
    Ok(())
}

fn layout_summary(outcome: &CompileOutcome) -> TextTable {
    let mut table = TextTable::new(["tab", "widget", "type", "requested", "title"]);
    if let Some(layout) = &outcome.layout {
        for tab in &layout.tabs {
            for widget in &tab.widgets {
                table.push([
                    tab.tab_type.to_string(),
                    widget.id.clone(),
                    widget.widget_type.to_string(),
                    widget
                        .requested_type
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    widget.title.clone(),
                ]);
            }
        }
    }
    table
}

fn handle_resolve(args: &cli::ResolveArgs) -> Result<()> {
    let columns = match &args.input {
        Some(path) => {
            let delimiter = io_utils::resolve_input_delimiter(path, args.delimiter);
            let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
            let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
            io_utils::reader_headers(&mut reader, encoding)
                .with_context(|| format!("Reading headers from {path:?}"))?
        }
        None => args.columns.iter().map(|c| c.trim().to_string()).collect(),
    };
    let records: Vec<ResolutionRecord> = args
        .declared
        .iter()
        .map(|declared| resolve_column(declared, &columns))
        .collect();
    let unresolved = records.iter().filter(|r| !r.is_resolved()).count();
    info!(
        "Resolved {} of {} declared column(s)",
        records.len() - unresolved,
        records.len()
    );
    emit(&args.output, &records, || {
        let mut table = TextTable::new(["declared", "resolved", "strategy", "candidates"]);
        for record in &records {
            table.push([
                record.declared.clone(),
                record.resolved.clone().unwrap_or_else(|| "-".to_string()),
                record
                    .strategy
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_default(),
                record.candidates.join(", "),
            ]);
        }
        table
    })
}

fn handle_aggregate(args: &cli::AggregateArgs, settings: &Settings) -> Result<()> {
    let plan = match (&args.plan, &args.layout) {
        (Some(path), _) => {
            AggregationPlan::load(path).with_context(|| format!("Loading plan from {path:?}"))?
        }
        (None, Some(path)) => {
            let layout = CompiledLayout::load(path)
                .with_context(|| format!("Loading layout from {path:?}"))?;
            AggregationPlan::from_layout(&layout)
        }
        (None, None) => return Err(anyhow!("Either --plan or --layout is required")),
    };
    let range = match (args.start, args.end) {
        (Some(start), Some(end)) if start > end => {
            bail!("Range start {start} is after range end {end}")
        }
        (Some(start), Some(end)) => Some(DateRange::new(start, end)),
        _ => None,
    };
    let dataset = load_dataset(&args.input, settings)?;
    let outcome = compute_aggregations_with(
        &dataset,
        &plan,
        range.as_ref(),
        &settings.aggregation.options(),
    );
    emit(&args.output, &outcome, || aggregation_summary(&outcome))
}

fn aggregation_summary(outcome: &AggregationOutcome) -> TextTable {
    let mut table = TextTable::new(["kpi", "label", "aggregation", "value", "resolved"]);
    for kpi in &outcome.result.kpis {
        table.push([
            kpi.id.clone(),
            kpi.label.clone().unwrap_or_default(),
            kpi.aggregation.to_string(),
            format_number(kpi.value),
            kpi.resolved.to_string(),
        ]);
    }
    for warning in &outcome.quality.warnings {
        table.push([
            warning.code.to_string(),
            warning.message.clone(),
            String::new(),
            String::new(),
            String::new(),
        ]);
    }
    table
}

fn handle_insights(args: &cli::InsightsArgs, settings: &Settings) -> Result<()> {
    let current = load_dataset(&args.input, settings)?;
    let previous = match &args.previous {
        Some(path) => {
            let previous_input = InputArgs {
                input: path.clone(),
                ..args.input.clone()
            };
            Some(load_dataset(&previous_input, settings)?)
        }
        None => None,
    };
    let today = args
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let options = InsightOptions {
        today,
        settings: settings.insights.clone(),
    };
    let report = generate_insights(
        &current,
        previous.as_ref(),
        args.date_column.as_deref(),
        &options,
    );
    emit(&args.output, &report, || insights_summary(&report))
}

fn insights_summary(report: &InsightsReport) -> TextTable {
    let mut table = TextTable::new(["priority", "kind", "title"]);
    for insight in &report.insights {
        table.push([
            insight.priority.to_string(),
            insight.kind.to_string(),
            insight.title.clone(),
        ]);
    }
    table.push([
        "health".to_string(),
        "score".to_string(),
        report.health_score.to_string(),
    ]);
    table
}

fn handle_gate(args: &cli::GateArgs, settings: &Settings) -> Result<()> {
    let layout = CompiledLayout::load(&args.layout)
        .with_context(|| format!("Loading layout from {:?}", args.layout))?;
    let options = csv_options(&args.input, settings)?;
    let gateway = LocalGateway::new(CsvRowSource::new(".", options), settings.aggregation.options());
    let dashboard = DashboardRef {
        id: args.dashboard_id.clone(),
        dataset: dataset_ref(&args.input.input),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    let verdict: GateVerdict = runtime.block_on(run_gate_check(&gateway, &dashboard, &layout));
    emit(&args.output, &verdict, || {
        let mut table = TextTable::new(["gate", "reason"]);
        if verdict.passed {
            table.push(["passed", ""]);
        }
        for reason in &verdict.block_reasons {
            table.push(["blocked", reason.as_str()]);
        }
        table
    })?;
    if !verdict.passed {
        bail!(
            "Gate check failed with {} block reason(s)",
            verdict.block_reasons.len()
        );
    }
    Ok(())
}

fn dataset_ref(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
