//! Layout compiler: turns a [`CapabilitiesProfile`] (and optionally an authored
//! [`DashboardPlan`]) into tabs of positioned widgets.
//!
//! Widget substitution never fails: an unsupported widget walks its catalog
//! fallback chain until it lands on something the dataset can render. Layout
//! compilation can fail, but only when the assembled result breaks a structural
//! invariant (see [`validate_layout`]); in that case no layout is returned.

use std::{collections::HashSet, path::Path};

use anyhow::Result;
use heck::ToTitleCase;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    aggregate::AggregationKind,
    capabilities::{CapabilitiesProfile, Role, is_cost_like},
    catalog::{Discard, DiscardKind, TabType, WidgetType, resolve_widget, tab_catalog, validate_catalog},
    error::CompileError,
    io_utils,
    resolver::{FLAG_PREFIX, resolve_column},
    trace::{CompilationTrace, StepStatus},
};

/// Bumped whenever generated layouts change shape.
pub const COMPILER_VERSION: &str = "3";
pub const GRID_COLUMNS: u8 = 12;
pub const TABLE_PAGE_SIZE: u32 = 50;
pub const DEFAULT_RANKING_LIMIT: usize = 10;

const MIN_OVERVIEW_KPIS: usize = 2;
const MAX_OVERVIEW_KPIS: usize = 8;
const MAX_EXPLORE_RANKINGS: usize = 3;
const MAX_BREAKDOWNS: usize = 3;
const MAX_FILTER_DIMENSIONS: usize = 3;
const MAX_AREA_SERIES: usize = 3;

const STEP_VALIDATE_CATALOG: &str = "validate_catalog";
const STEP_SELECT_TABS: &str = "select_tabs";
const STEP_RESOLVE_PLAN: &str = "resolve_plan";
const STEP_GENERATE_WIDGETS: &str = "generate_widgets";
const STEP_DERIVE_FILTERS: &str = "derive_filters";
const STEP_ASSEMBLE: &str = "assemble";
const STEP_VALIDATE_LAYOUT: &str = "validate_layout";

const STEPS: [&str; 7] = [
    STEP_VALIDATE_CATALOG,
    STEP_SELECT_TABS,
    STEP_RESOLVE_PLAN,
    STEP_GENERATE_WIDGETS,
    STEP_DERIVE_FILTERS,
    STEP_ASSEMBLE,
    STEP_VALIDATE_LAYOUT,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u16,
    pub w: u8,
    pub h: u8,
}

/// What a widget reads from the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetBinding {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Declared columns the resolver could not map onto the dataset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_type: Option<WidgetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub title: String,
    pub position: Position,
    #[serde(default)]
    pub binding: WidgetBinding,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(rename = "type")]
    pub tab_type: TabType,
    pub title: String,
    pub widgets: Vec<Widget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    DateRange { column: String },
    Select { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledLayout {
    pub compiler_version: String,
    pub fingerprint: String,
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub funnel_stages: Vec<String>,
}

impl CompiledLayout {
    pub fn tab(&self, tab_type: TabType) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.tab_type == tab_type)
    }

    pub fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.tabs.iter().flat_map(|tab| tab.widgets.iter())
    }

    pub fn widget_count(&self) -> usize {
        self.tabs.iter().map(|tab| tab.widgets.len()).sum()
    }

    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_yaml(path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileOutcome {
    pub layout: Option<CompiledLayout>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub discards: Vec<Discard>,
    pub trace: CompilationTrace,
}

impl CompileOutcome {
    pub fn succeeded(&self) -> bool {
        self.layout.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedKpi {
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default = "default_kpi_aggregation")]
    pub aggregation: AggregationKind,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_kpi_aggregation() -> AggregationKind {
    AggregationKind::Sum
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChart {
    pub widget: WidgetType,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub aggregation: Option<AggregationKind>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tab: Option<TabType>,
}

/// Authored dashboard intent. Merged with the heuristics, never a replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardPlan {
    pub kpis: Vec<PlannedKpi>,
    pub charts: Vec<PlannedChart>,
    /// Funnel stage columns in the authored order.
    pub funnel: Vec<String>,
}

impl DashboardPlan {
    /// Reads a plan from YAML (JSON is accepted as a YAML subset).
    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_yaml(path)
    }
}

/// Per-compilation widget id counter. Ids are `w1`, `w2`, … and restart for
/// every compilation.
#[derive(Debug, Default)]
pub struct WidgetIdSequence {
    issued: u32,
}

impl WidgetIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("w{}", self.issued)
    }

    pub fn issued(&self) -> u32 {
        self.issued
    }
}

/// Row-major packer for a fixed-width grid.
#[derive(Debug, Default)]
struct GridPacker {
    x: u8,
    y: u16,
    row_height: u8,
}

impl GridPacker {
    fn place(&mut self, (w, h): (u8, u8)) -> Position {
        let w = w.clamp(1, GRID_COLUMNS);
        if self.x + w > GRID_COLUMNS {
            self.x = 0;
            self.y += u16::from(self.row_height);
            self.row_height = 0;
        }
        let position = Position {
            x: self.x,
            y: self.y,
            w,
            h,
        };
        self.x += w;
        self.row_height = self.row_height.max(h);
        position
    }
}

struct WidgetRequest {
    widget: WidgetType,
    title: String,
    binding: WidgetBinding,
    config: Map<String, Value>,
}

impl WidgetRequest {
    fn new(widget: WidgetType, title: impl Into<String>) -> Self {
        Self {
            widget,
            title: title.into(),
            binding: WidgetBinding::default(),
            config: Map::new(),
        }
    }

    fn columns(mut self, columns: Vec<String>) -> Self {
        self.binding.columns = columns;
        self
    }

    fn aggregation(mut self, aggregation: AggregationKind) -> Self {
        self.binding.aggregation = Some(aggregation);
        self
    }

    fn dimension(mut self, dimension: Option<String>) -> Self {
        self.binding.dimension = dimension;
        self
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }
}

/// Plan entries after column resolution.
#[derive(Default)]
struct ResolvedPlan {
    kpis: Vec<WidgetRequest>,
    charts: Vec<(TabType, WidgetRequest)>,
}

struct Compiler<'a> {
    caps: &'a CapabilitiesProfile,
    ids: WidgetIdSequence,
    discards: Vec<Discard>,
    warnings: Vec<String>,
    enabled: Vec<TabType>,
    stages: Vec<String>,
}

pub fn compile_layout(caps: &CapabilitiesProfile, plan: Option<&DashboardPlan>) -> CompileOutcome {
    let mut trace = CompilationTrace::new(STEPS);

    trace.start(STEP_VALIDATE_CATALOG);
    let violations = validate_catalog();
    if !violations.is_empty() {
        trace.finish(STEP_VALIDATE_CATALOG, StepStatus::Error);
        trace.skip_pending();
        return CompileOutcome {
            errors: violations
                .into_iter()
                .map(|v| CompileError::InvalidCatalog(v).to_string())
                .collect(),
            trace,
            ..CompileOutcome::default()
        };
    }
    trace.finish(STEP_VALIDATE_CATALOG, StepStatus::Done);

    let mut compiler = Compiler {
        caps,
        ids: WidgetIdSequence::new(),
        discards: Vec::new(),
        warnings: Vec::new(),
        enabled: Vec::new(),
        stages: caps.stage_flags.clone(),
    };

    trace.start(STEP_SELECT_TABS);
    let tab_discards = compiler.select_tabs();
    trace.record_discards(STEP_SELECT_TABS, &tab_discards);
    compiler.discards.extend(tab_discards);
    trace.finish(STEP_SELECT_TABS, StepStatus::Done);

    trace.start(STEP_RESOLVE_PLAN);
    let resolved_plan = match plan {
        Some(plan) => {
            let warnings_before = compiler.warnings.len();
            let resolved = compiler.resolve_plan(plan);
            for warning in &compiler.warnings[warnings_before..] {
                trace.record_warning(STEP_RESOLVE_PLAN, warning.clone());
            }
            trace.finish(STEP_RESOLVE_PLAN, StepStatus::Done);
            resolved
        }
        None => {
            trace.finish(STEP_RESOLVE_PLAN, StepStatus::Skipped);
            ResolvedPlan::default()
        }
    };

    trace.start(STEP_GENERATE_WIDGETS);
    let discards_before = compiler.discards.len();
    let tabs = compiler.generate_tabs(resolved_plan);
    trace.record_discards(STEP_GENERATE_WIDGETS, &compiler.discards[discards_before..]);
    trace.finish(STEP_GENERATE_WIDGETS, StepStatus::Done);

    trace.start(STEP_DERIVE_FILTERS);
    let filters = derive_filters(caps);
    trace.finish(STEP_DERIVE_FILTERS, StepStatus::Done);

    trace.start(STEP_ASSEMBLE);
    let layout = CompiledLayout {
        compiler_version: COMPILER_VERSION.to_string(),
        fingerprint: caps.fingerprint.clone(),
        tabs,
        filters,
        time_column: caps.time_column.clone(),
        funnel_stages: compiler.stages.clone(),
    };
    trace.finish(STEP_ASSEMBLE, StepStatus::Done);

    trace.start(STEP_VALIDATE_LAYOUT);
    let errors = validate_layout(&layout);
    let Compiler {
        discards, warnings, ..
    } = compiler;
    if !errors.is_empty() {
        trace.finish(STEP_VALIDATE_LAYOUT, StepStatus::Error);
        for error in &errors {
            warn!("Layout rejected: {error}");
        }
        return CompileOutcome {
            layout: None,
            errors: errors.iter().map(ToString::to_string).collect(),
            warnings,
            discards,
            trace,
        };
    }
    trace.finish(STEP_VALIDATE_LAYOUT, StepStatus::Done);

    info!(
        "Compiled {} tab(s) with {} widget(s); {} substitution(s), {} warning(s)",
        layout.tabs.len(),
        layout.widget_count(),
        discards.len(),
        warnings.len()
    );
    CompileOutcome {
        layout: Some(layout),
        errors: Vec::new(),
        warnings,
        discards,
        trace,
    }
}

impl Compiler<'_> {
    fn select_tabs(&mut self) -> Vec<Discard> {
        let mut discards = Vec::new();
        for spec in tab_catalog() {
            if spec.always_enabled {
                self.enabled.push(spec.tab);
                continue;
            }
            match spec.requires.unmet_reason(self.caps) {
                None => self.enabled.push(spec.tab),
                Some(reason) => {
                    debug!("Tab '{}' disabled: {}", spec.tab, reason);
                    discards.push(Discard {
                        kind: DiscardKind::Tab,
                        requested: spec.tab.as_str().to_string(),
                        fallback: spec.fallback.map(|t| t.as_str().to_string()),
                        reason,
                        tab: None,
                    });
                }
            }
        }
        discards
    }

    fn is_enabled(&self, tab: TabType) -> bool {
        self.enabled.contains(&tab)
    }

    fn resolve_plan(&mut self, plan: &DashboardPlan) -> ResolvedPlan {
        let mut resolved = ResolvedPlan::default();

        let mut stages = Vec::new();
        for declared in &plan.funnel {
            if let Some(column) = self.resolve_plan_column("funnel stage", declared) {
                if !stages.contains(&column) {
                    stages.push(column);
                }
            }
        }
        for detected in &self.caps.stage_flags {
            if !stages.contains(detected) {
                stages.push(detected.clone());
            }
        }
        self.stages = stages;

        for kpi in &plan.kpis {
            let mut binding = WidgetBinding {
                aggregation: Some(kpi.aggregation),
                ..WidgetBinding::default()
            };
            let mut widget = WidgetType::KpiCard;
            if let Some(declared) = &kpi.column {
                match self.resolve_plan_column("KPI", declared) {
                    Some(column) => {
                        if self.caps.role_of(&column) == Some(Role::Currency) {
                            widget = WidgetType::CurrencyKpi;
                        }
                        binding.columns.push(column);
                    }
                    None => {
                        binding.columns.push(declared.clone());
                        binding.unresolved.push(declared.clone());
                    }
                }
            }
            let title = kpi
                .label
                .clone()
                .or_else(|| kpi.column.as_deref().map(humanize))
                .unwrap_or_else(|| "Records".to_string());
            resolved.kpis.push(WidgetRequest {
                widget,
                title,
                binding,
                config: Map::new(),
            });
        }
        if resolved.kpis.len() > MAX_OVERVIEW_KPIS {
            for dropped in resolved.kpis.split_off(MAX_OVERVIEW_KPIS) {
                let message = format!(
                    "Plan KPI '{}' dropped; the overview holds at most {MAX_OVERVIEW_KPIS} KPI cards",
                    dropped.title
                );
                warn!("{message}");
                self.warnings.push(message);
            }
        }

        for chart in &plan.charts {
            let mut binding = WidgetBinding {
                aggregation: chart.aggregation,
                ..WidgetBinding::default()
            };
            for declared in &chart.columns {
                match self.resolve_plan_column("chart", declared) {
                    Some(column) => binding.columns.push(column),
                    None => {
                        binding.columns.push(declared.clone());
                        binding.unresolved.push(declared.clone());
                    }
                }
            }
            if let Some(declared) = &chart.dimension {
                match self.resolve_plan_column("chart dimension", declared) {
                    Some(column) => binding.dimension = Some(column),
                    None => {
                        binding.dimension = Some(declared.clone());
                        binding.unresolved.push(declared.clone());
                    }
                }
            }
            let requested_tab = chart.tab.unwrap_or(TabType::Overview);
            let tab = if self.is_enabled(requested_tab) {
                requested_tab
            } else {
                self.warnings.push(format!(
                    "Plan chart '{}' targets disabled tab '{}'; placed on overview",
                    chart.widget, requested_tab
                ));
                TabType::Overview
            };
            let title = chart.title.clone().unwrap_or_else(|| {
                binding
                    .columns
                    .first()
                    .map(|c| humanize(c))
                    .unwrap_or_else(|| chart.widget.as_str().to_title_case())
            });
            resolved.charts.push((
                tab,
                WidgetRequest {
                    widget: chart.widget,
                    title,
                    binding,
                    config: Map::new(),
                },
            ));
        }
        resolved
    }

    fn resolve_plan_column(&mut self, what: &str, declared: &str) -> Option<String> {
        let record = resolve_column(declared, &self.caps.column_names());
        if record.is_resolved() {
            return record.resolved;
        }
        let mut message = format!(
            "Plan {what} column '{declared}' not found (tried: {})",
            record.attempted.join(", ")
        );
        if !record.candidates.is_empty() {
            message.push_str(&format!("; candidates: {}", record.candidates.join(", ")));
        }
        warn!("{message}");
        self.warnings.push(message);
        None
    }

    fn generate_tabs(&mut self, plan: ResolvedPlan) -> Vec<Tab> {
        let ResolvedPlan {
            kpis: plan_kpis,
            charts: mut plan_charts,
        } = plan;
        let mut plan_kpis = Some(plan_kpis);
        let mut tabs = Vec::with_capacity(self.enabled.len());
        for tab in self.enabled.clone() {
            let mut requests = match tab {
                TabType::Overview => self.overview_requests(plan_kpis.take().unwrap_or_default()),
                TabType::Time => self.time_requests(),
                TabType::Funnel => self.funnel_requests(),
                TabType::Explore => self.explore_requests(),
                TabType::Efficiency => self.efficiency_requests(),
                TabType::Table => self.table_requests(),
            };
            let (mine, rest): (Vec<_>, Vec<_>) =
                plan_charts.drain(..).partition(|(target, _)| *target == tab);
            plan_charts = rest;
            // Plan charts land ahead of the trailing table on the data tab.
            let insert_at = if tab == TabType::Table { 0 } else { requests.len() };
            for (offset, (_, request)) in mine.into_iter().enumerate() {
                requests.insert(insert_at + offset, request);
            }

            let mut packer = GridPacker::default();
            let widgets = requests
                .into_iter()
                .map(|request| self.place(tab, &mut packer, request))
                .collect();
            tabs.push(Tab {
                tab_type: tab,
                title: tab.title().to_string(),
                widgets,
            });
        }
        tabs
    }

    fn place(&mut self, tab: TabType, packer: &mut GridPacker, request: WidgetRequest) -> Widget {
        let resolution = resolve_widget(request.widget, self.caps, Some(tab));
        let effective = resolution.effective;
        let substituted = resolution.substituted();
        if substituted {
            debug!(
                "Widget '{}' on tab '{}' replaced by '{}'",
                request.widget, tab, effective
            );
        }
        let fallback_reason = resolution.reason().map(str::to_string);
        self.discards.extend(resolution.discards);

        let mut binding = request.binding;
        self.adapt_binding(effective, &mut binding);
        let mut config = base_config(effective, &binding);
        if let Value::Object(map) = &mut config {
            map.extend(request.config);
            if !binding.unresolved.is_empty() {
                map.insert("unresolved".to_string(), json!(binding.unresolved));
            }
        }

        Widget {
            id: self.ids.next_id(),
            widget_type: effective,
            requested_type: substituted.then_some(request.widget),
            fallback_reason,
            title: request.title,
            position: packer.place(effective.footprint()),
            binding,
            config,
        }
    }

    /// Fills binding slots the effective widget needs but the request left empty.
    fn adapt_binding(&self, widget: WidgetType, binding: &mut WidgetBinding) {
        match widget {
            WidgetType::BarChart | WidgetType::Ranking => {
                if binding.dimension.is_none() {
                    binding.dimension = self.caps.dimensions.first().cloned();
                }
                if binding.aggregation.is_none() {
                    binding.aggregation = Some(match binding.columns.first() {
                        Some(column) => self.aggregation_for(column),
                        None => AggregationKind::Count,
                    });
                }
                if widget == WidgetType::Ranking && binding.limit.is_none() {
                    binding.limit = Some(DEFAULT_RANKING_LIMIT);
                }
            }
            WidgetType::LineChart | WidgetType::AreaChart => {
                if binding.columns.is_empty()
                    && let Some((column, _)) = self.caps.measure_columns().into_iter().next()
                {
                    binding.columns.push(column);
                }
                if binding.aggregation.is_none() {
                    binding.aggregation = binding
                        .columns
                        .first()
                        .map(|column| self.aggregation_for(column));
                }
            }
            WidgetType::KpiCard | WidgetType::CurrencyKpi => {
                if binding.aggregation.is_none() {
                    binding.aggregation = Some(AggregationKind::Count);
                }
            }
            WidgetType::FunnelChart => {
                if binding.columns.is_empty() {
                    binding.columns = self.stages.clone();
                }
                binding.aggregation = Some(AggregationKind::TruthyCount);
            }
            WidgetType::Table => {
                if binding.columns.is_empty() {
                    binding.columns = self.caps.column_names();
                }
            }
            WidgetType::StatusCard => {}
        }
    }

    fn aggregation_for(&self, column: &str) -> AggregationKind {
        self.caps
            .role_of(column)
            .map(AggregationKind::for_role)
            .unwrap_or(AggregationKind::Sum)
    }

    fn overview_requests(&self, plan_kpis: Vec<WidgetRequest>) -> Vec<WidgetRequest> {
        let caps = self.caps;
        let mut requests = vec![
            WidgetRequest::new(WidgetType::StatusCard, "Dataset status")
                .aggregation(AggregationKind::Count)
                .with("row_count", json!(caps.row_count)),
        ];

        let mut kpis: Vec<WidgetRequest> = plan_kpis;
        let mut taken: HashSet<(String, AggregationKind)> = kpis
            .iter()
            .filter_map(|k| {
                Some((k.binding.columns.first()?.clone(), k.binding.aggregation?))
            })
            .collect();
        if kpis.len() < MAX_OVERVIEW_KPIS {
            kpis.insert(
                0,
                WidgetRequest::new(WidgetType::KpiCard, "Records").aggregation(AggregationKind::Count),
            );
        }
        for (column, role) in caps.measure_columns() {
            if kpis.len() >= MAX_OVERVIEW_KPIS {
                break;
            }
            let aggregation = AggregationKind::for_role(role);
            if !taken.insert((column.clone(), aggregation)) {
                continue;
            }
            kpis.push(kpi_request(&column, role, aggregation));
        }
        let distinct_sources = caps.id_column.iter().chain(caps.dimensions.iter());
        for column in distinct_sources {
            if kpis.len() >= MIN_OVERVIEW_KPIS {
                break;
            }
            kpis.push(
                WidgetRequest::new(WidgetType::KpiCard, format!("Distinct {}", humanize(column)))
                    .columns(vec![column.clone()])
                    .aggregation(AggregationKind::CountDistinct),
            );
        }
        // Non-null counts keep text-only datasets at the minimum card count.
        for column in caps.column_names() {
            if kpis.len() >= MIN_OVERVIEW_KPIS {
                break;
            }
            if kpis.iter().any(|k| k.binding.columns.first() == Some(&column)) {
                continue;
            }
            kpis.push(
                WidgetRequest::new(WidgetType::KpiCard, format!("Filled {}", humanize(&column)))
                    .columns(vec![column])
                    .aggregation(AggregationKind::Count),
            );
        }
        kpis.truncate(MAX_OVERVIEW_KPIS);
        requests.extend(kpis);

        if !self.stages.is_empty() {
            requests.push(
                WidgetRequest::new(WidgetType::FunnelChart, "Funnel").columns(self.stages.clone()),
            );
        } else {
            let measure = caps.measure_columns().into_iter().next();
            let columns = measure.iter().map(|(c, _)| c.clone()).collect();
            let title = match caps.dimensions.first() {
                Some(dimension) => format!("By {}", humanize(dimension)),
                None => "Breakdown".to_string(),
            };
            requests.push(
                WidgetRequest::new(WidgetType::BarChart, title)
                    .columns(columns)
                    .dimension(caps.dimensions.first().cloned()),
            );
        }

        if caps.has_time && !self.is_enabled(TabType::Time) {
            requests.push(WidgetRequest::new(WidgetType::LineChart, "Trend"));
        }

        if let Some(dimension) = caps.dimensions.first() {
            requests.push(self.ranking_request(dimension));
        }
        requests
    }

    fn time_requests(&self) -> Vec<WidgetRequest> {
        let caps = self.caps;
        let mut requests = vec![
            WidgetRequest::new(WidgetType::LineChart, "Stages over time")
                .columns(self.stages.clone())
                .aggregation(AggregationKind::TruthyCount),
        ];
        let volumes: Vec<String> = caps
            .metrics
            .iter()
            .chain(caps.currency_columns.iter())
            .take(MAX_AREA_SERIES)
            .cloned()
            .collect();
        if let Some(first) = volumes.first() {
            requests.push(
                WidgetRequest::new(WidgetType::LineChart, format!("{} trend", humanize(first)))
                    .columns(vec![first.clone()]),
            );
            requests.push(
                WidgetRequest::new(WidgetType::AreaChart, "Volume mix")
                    .columns(volumes.clone())
                    .aggregation(AggregationKind::Sum),
            );
        }
        requests
    }

    fn funnel_requests(&self) -> Vec<WidgetRequest> {
        let caps = self.caps;
        let mut requests = vec![
            WidgetRequest::new(WidgetType::FunnelChart, "Conversion funnel")
                .columns(self.stages.clone())
                .with("show_conversion", json!(true)),
        ];
        for stage in &self.stages {
            requests.push(
                WidgetRequest::new(WidgetType::KpiCard, humanize(stage))
                    .columns(vec![stage.clone()])
                    .aggregation(AggregationKind::TruthyCount),
            );
        }
        for dimension in caps.dimensions.iter().take(MAX_BREAKDOWNS) {
            requests.push(
                WidgetRequest::new(WidgetType::BarChart, format!("Stages by {}", humanize(dimension)))
                    .columns(self.stages.clone())
                    .aggregation(AggregationKind::TruthyCount)
                    .dimension(Some(dimension.clone()))
                    .with("stacked", json!(true)),
            );
        }
        requests
    }

    fn explore_requests(&self) -> Vec<WidgetRequest> {
        self.caps
            .dimensions
            .iter()
            .take(MAX_EXPLORE_RANKINGS)
            .map(|dimension| self.ranking_request(dimension))
            .collect()
    }

    fn efficiency_requests(&self) -> Vec<WidgetRequest> {
        let caps = self.caps;
        let mut requests: Vec<WidgetRequest> = caps
            .currency_columns
            .iter()
            .take(MAX_OVERVIEW_KPIS)
            .map(|column| kpi_request(column, Role::Currency, AggregationKind::Sum))
            .collect();
        let cost = caps
            .currency_columns
            .iter()
            .find(|c| is_cost_like(c))
            .or_else(|| caps.currency_columns.first());
        if let Some(cost) = cost {
            requests.push(
                WidgetRequest::new(WidgetType::LineChart, format!("{} trend", humanize(cost)))
                    .columns(vec![cost.clone()])
                    .aggregation(AggregationKind::Sum),
            );
        }
        requests
    }

    fn table_requests(&self) -> Vec<WidgetRequest> {
        vec![WidgetRequest::new(WidgetType::Table, "All records").columns(self.caps.column_names())]
    }

    fn ranking_request(&self, dimension: &str) -> WidgetRequest {
        let metric = self
            .caps
            .metrics
            .iter()
            .chain(self.caps.currency_columns.iter())
            .next();
        let (columns, aggregation) = match metric {
            Some(metric) => (vec![metric.clone()], AggregationKind::Sum),
            None => (Vec::new(), AggregationKind::Count),
        };
        let mut request = WidgetRequest::new(WidgetType::Ranking, format!("Top {}", humanize(dimension)))
            .columns(columns)
            .aggregation(aggregation)
            .dimension(Some(dimension.to_string()));
        request.binding.limit = Some(DEFAULT_RANKING_LIMIT);
        request
    }
}

fn kpi_request(column: &str, role: Role, aggregation: AggregationKind) -> WidgetRequest {
    let (widget, format) = match role {
        Role::Currency => (WidgetType::CurrencyKpi, "currency"),
        Role::Percent => (WidgetType::KpiCard, "percent"),
        _ => (WidgetType::KpiCard, "number"),
    };
    WidgetRequest::new(widget, humanize(column))
        .columns(vec![column.to_string()])
        .aggregation(aggregation)
        .with("format", json!(format))
}

fn base_config(widget: WidgetType, binding: &WidgetBinding) -> Value {
    match widget {
        WidgetType::Table => json!({
            "paginated": true,
            "page_size": TABLE_PAGE_SIZE,
            "searchable": true,
            "exportable": true,
        }),
        WidgetType::FunnelChart => json!({ "show_conversion": true }),
        WidgetType::LineChart | WidgetType::AreaChart => json!({ "grain": "day" }),
        WidgetType::Ranking => json!({ "limit": binding.limit.unwrap_or(DEFAULT_RANKING_LIMIT) }),
        WidgetType::BarChart => json!({ "orientation": "vertical" }),
        WidgetType::KpiCard | WidgetType::CurrencyKpi | WidgetType::StatusCard => json!({}),
    }
}

/// Display title for a column: flag prefix dropped, words title-cased.
pub fn humanize(column: &str) -> String {
    let trimmed = column.strip_prefix(FLAG_PREFIX).unwrap_or(column);
    trimmed.to_title_case()
}

pub fn derive_filters(caps: &CapabilitiesProfile) -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(column) = &caps.time_column {
        filters.push(Filter::DateRange {
            column: column.clone(),
        });
    }
    filters.extend(
        caps.dimensions
            .iter()
            .take(MAX_FILTER_DIMENSIONS)
            .map(|column| Filter::Select {
                column: column.clone(),
            }),
    );
    filters
}

/// Structural checks every emitted layout must pass.
pub fn validate_layout(layout: &CompiledLayout) -> Vec<CompileError> {
    let mut errors = Vec::new();
    for mandatory in [TabType::Overview, TabType::Table] {
        match layout.tab(mandatory) {
            None => errors.push(CompileError::MissingTab(mandatory)),
            Some(tab) if tab.widgets.is_empty() => errors.push(CompileError::EmptyTab(mandatory)),
            Some(_) => {}
        }
    }
    if layout.widget_count() == 0 {
        errors.push(CompileError::NoWidgets);
    }
    let mut ids = HashSet::new();
    for widget in layout.widgets() {
        if !ids.insert(widget.id.as_str()) {
            errors.push(CompileError::DuplicateWidgetId(widget.id.clone()));
        }
    }
    errors
}
