use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Compile adaptive dashboards, aggregations and insights from arbitrary CSV data",
    long_about = None
)]
pub struct Cli {
    /// Optional YAML settings file (detector, aggregation and insight thresholds)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect column roles and dataset capabilities
    Probe(ProbeArgs),
    /// Compile a dashboard layout for a dataset
    Compile(CompileArgs),
    /// Resolve declared column names against a dataset's columns
    Resolve(ResolveArgs),
    /// Compute KPIs, funnel, series and rankings with a data-quality audit
    Aggregate(AggregateArgs),
    /// Generate statistical insights and a health score
    Insights(InsightsArgs),
    /// Run the publish-time gate check for a compiled layout
    Gate(GateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Destination for the JSON payload (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Print a table summary instead of JSON on stdout
    #[arg(long)]
    pub summary: bool,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Rows sampled for role inference (overrides the settings file)
    #[arg(long)]
    pub sample_rows: Option<usize>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct CompileArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Authored dashboard plan (YAML or JSON) merged with the heuristics
    #[arg(long)]
    pub plan: Option<PathBuf>,
    /// Rows sampled for role inference (overrides the settings file)
    #[arg(long)]
    pub sample_rows: Option<usize>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "columns"])))]
pub struct ResolveArgs {
    /// Declared column names to resolve
    #[arg(required = true)]
    pub declared: Vec<String>,
    /// Read the actual column names from this CSV header
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,
    /// Comma-separated list of actual column names
    #[arg(short = 'C', long, value_delimiter = ',')]
    pub columns: Vec<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("definition").required(true).args(["plan", "layout"])))]
pub struct AggregateArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Aggregation plan (YAML or JSON)
    #[arg(long)]
    pub plan: Option<PathBuf>,
    /// Compiled layout JSON; the plan is derived from its widgets
    #[arg(long)]
    pub layout: Option<PathBuf>,
    /// First day of the range (inclusive), YYYY-MM-DD
    #[arg(long, value_parser = parse_day, requires = "end")]
    pub start: Option<NaiveDate>,
    /// Last day of the range (inclusive), YYYY-MM-DD
    #[arg(long, value_parser = parse_day, requires = "start")]
    pub end: Option<NaiveDate>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct InsightsArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Previous-period CSV for period-over-period comparison
    #[arg(long)]
    pub previous: Option<PathBuf>,
    /// Date column (detected when omitted)
    #[arg(long = "date-column")]
    pub date_column: Option<String>,
    /// Reference day for staleness checks, YYYY-MM-DD (defaults to today)
    #[arg(long, value_parser = parse_day)]
    pub today: Option<NaiveDate>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct GateArgs {
    /// Compiled layout JSON to check
    #[arg(long)]
    pub layout: PathBuf,
    #[command(flatten)]
    pub input: InputArgs,
    /// Dashboard identifier used in block reasons
    #[arg(long = "dashboard-id", default_value = "local")]
    pub dashboard_id: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_day(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|err| format!("Expected YYYY-MM-DD, got '{value}': {err}"))
}
