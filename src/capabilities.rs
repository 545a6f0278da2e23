//! Capability detection: assigns every dataset column a semantic [`Role`] and
//! summarizes what the dataset can power.
//!
//! ## Classification
//!
//! Column names are normalized to snake_case with accents folded, then tested
//! against [`ROLE_RULES`], an ordered table evaluated in fixed priority
//! (time > id > currency > percent > stage-flag > dimension > metric). A stage
//! flag rule additionally requires that at least half of the sampled non-null
//! values look boolean; when they do not, evaluation moves on to the next rule.
//!
//! Columns no rule claims are classified from the shape of their sampled
//! values (UUIDs, numbers, ISO dates, low-cardinality text). Anything else is
//! [`Role::Text`] and appears in none of the typed lists.
//!
//! ## Funnel order
//!
//! Stage-flag columns are ordered by [`FUNNEL_VOCABULARY`] so that funnel
//! positions line up across datasets whose literal column names differ.

use std::{
    collections::HashSet,
    fmt,
    sync::OnceLock,
};

use heck::ToSnakeCase;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::data::{CellValue, NULL_CELL, Row, is_boolean_like, looks_like_iso_date, to_number};

pub const DEFAULT_SAMPLE_ROWS: usize = 100;
pub const UNKNOWN_STAGE_ORDER: usize = 999;

const STAGE_BOOLEAN_MIN_RATIO: f64 = 0.5;
const SHAPE_MIN_RATIO: f64 = 0.8;
const DIMENSION_MAX_DISTINCT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Time,
    Id,
    Currency,
    Percent,
    StageFlag,
    Dimension,
    Metric,
    Text,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Time => "time",
            Role::Id => "id",
            Role::Currency => "currency",
            Role::Percent => "percent",
            Role::StageFlag => "stage_flag",
            Role::Dimension => "dimension",
            Role::Metric => "metric",
            Role::Text => "text",
        }
    }

    /// Roles whose values are summed, averaged or counted as measures.
    pub fn is_measure(&self) -> bool {
        matches!(
            self,
            Role::Metric | Role::Currency | Role::Percent | Role::StageFlag
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Name,
    Values,
}

/// One row of the classification table. `patterns` and `excludes` are matched
/// against the normalized column name.
#[derive(Debug)]
pub struct RoleRule {
    pub role: Role,
    pub patterns: &'static [&'static str],
    pub excludes: &'static [&'static str],
    pub requires_boolean_values: bool,
}

pub static ROLE_RULES: &[RoleRule] = &[
    RoleRule {
        role: Role::Time,
        patterns: &[
            r"^(dia|data|date|day|dt|timestamp|datetime|periodo|period|mes|month|semana|week)$",
            r"(^|_)(data|date|dia|dt|timestamp|datetime)(_|$)",
            r"_(at|em)$",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
    RoleRule {
        role: Role::Id,
        patterns: &[
            r"^(id|uuid|guid|codigo|cod|key|chave)$",
            r"(^|_)(id|uuid|guid)$",
            r"^id_",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
    RoleRule {
        role: Role::Currency,
        patterns: &[
            r"(^|_)(valor|valores|receita|receitas|revenue|faturamento|custo|custos|cost|costs|spend|gasto|gastos|investimento|investment|preco|price|amount|ticket|cpl|cpa|cac|cpc|brl|usd|budget|orcamento)(_|$)",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
    RoleRule {
        role: Role::Percent,
        patterns: &[
            r"(^|_)(taxa|rate|percent|percentual|porcentagem|pct|perc|ratio|conversao|conversion|ctr|share)(_|$)",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
    RoleRule {
        role: Role::StageFlag,
        patterns: &[
            r"^(st|flag|fl|is|has|etapa|stage)_",
            r"(^|_)(entrada|lead|qualificad[oa]s?|qualified|mql|sql|agendad[oa]s?|agendamento|scheduled|realizad[oa]s?|compareceu|comparecimento|attended|proposta|proposal|venda|vendas|ganho|won|fechad[oa]s?|closed|perdid[oa]s?|lost)(_|$)",
        ],
        excludes: &[
            r"(^|_)(total|totais|qtd|quantidade|count|contagem|soma|sum|num|numero|media|avg)(_|$)",
        ],
        requires_boolean_values: true,
    },
    RoleRule {
        role: Role::Dimension,
        patterns: &[
            r"(^|_)(canal|channel|origem|origin|source|fonte|campanha|campaign|categoria|category|tipo|type|status|situacao|regiao|region|cidade|city|estado|state|uf|pais|country|produto|product|vendedor|seller|consultor|responsavel|owner|segmento|segment|plataforma|platform|midia|medium|unidade|unit|grupo|group)(_|$)",
            r"^utm_",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
    RoleRule {
        role: Role::Metric,
        patterns: &[
            r"(^|_)(total|totais|qtd|quantidade|qty|quantity|count|contagem|numero|num|volume|leads|vendas|clicks|cliques|impressoes|impressions|visitas|visits|sessions|sessoes|views|score|pontos|soma|sum|media|avg|conversoes|conversions)(_|$)",
        ],
        excludes: &[],
        requires_boolean_values: false,
    },
];

const COST_PATTERN: &str = r"(^|_)(custo|custos|cost|costs|spend|gasto|gastos|investimento|investment|cpl|cpc|cpa|cac|budget|orcamento)(_|$)";
const VOLUME_PATTERN: &str = r"(^|_)(lead|leads|contato|contatos|cadastro|cadastros|volume|inscritos|signups|entradas)(_|$)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Entry,
    Qualified,
    Scheduled,
    Attended,
    Proposal,
    Won,
    Lost,
}

/// Canonical funnel order with the substrings that identify each stage.
pub static FUNNEL_VOCABULARY: &[(FunnelStage, &[&str])] = &[
    (FunnelStage::Entry, &["entrada", "lead", "entry", "novo"]),
    (FunnelStage::Qualified, &["qualific", "qualified", "mql", "sql"]),
    (FunnelStage::Scheduled, &["agend", "scheduled", "marcad", "meeting"]),
    (FunnelStage::Attended, &["realiz", "comparec", "attended", "show"]),
    (FunnelStage::Proposal, &["propost", "proposal"]),
    (FunnelStage::Won, &["venda", "ganho", "won", "fechad", "closed", "sale"]),
    (FunnelStage::Lost, &["perdid", "lost", "descart"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub role: Role,
    pub source: RoleSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitiesProfile {
    pub columns: Vec<ColumnProfile>,
    pub has_time: bool,
    pub time_column: Option<String>,
    /// Stage-flag columns in canonical funnel order.
    pub stage_flags: Vec<String>,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub currency_columns: Vec<String>,
    pub percent_columns: Vec<String>,
    pub id_column: Option<String>,
    pub row_count: usize,
    pub fingerprint: String,
}

impl CapabilitiesProfile {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn role_of(&self, column: &str) -> Option<Role> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.role)
    }

    pub fn stage_flags_count(&self) -> usize {
        self.stage_flags.len()
    }

    /// Metric, currency, percent and stage columns together.
    pub fn measure_count(&self) -> usize {
        self.metrics.len()
            + self.currency_columns.len()
            + self.percent_columns.len()
            + self.stage_flags.len()
    }

    /// Measure columns in KPI preference order.
    pub fn measure_columns(&self) -> Vec<(String, Role)> {
        let mut measures = Vec::with_capacity(self.measure_count());
        measures.extend(self.metrics.iter().map(|c| (c.clone(), Role::Metric)));
        measures.extend(
            self.currency_columns
                .iter()
                .map(|c| (c.clone(), Role::Currency)),
        );
        measures.extend(self.stage_flags.iter().map(|c| (c.clone(), Role::StageFlag)));
        measures.extend(
            self.percent_columns
                .iter()
                .map(|c| (c.clone(), Role::Percent)),
        );
        measures
    }

    /// True when `columns` no longer hash to the fingerprint captured here.
    pub fn has_drifted<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        schema_fingerprint(columns) != self.fingerprint
    }
}

struct CompiledRule {
    role: Role,
    patterns: Vec<Regex>,
    excludes: Vec<Regex>,
    requires_boolean_values: bool,
}

impl CompiledRule {
    fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(normalized))
            && !self.excludes.iter().any(|re| re.is_match(normalized))
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static role pattern must compile")
}

fn compiled_rules() -> &'static [CompiledRule] {
    static RULES: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        ROLE_RULES
            .iter()
            .map(|rule| CompiledRule {
                role: rule.role,
                patterns: rule.patterns.iter().map(|p| compile(p)).collect(),
                excludes: rule.excludes.iter().map(|p| compile(p)).collect(),
                requires_boolean_values: rule.requires_boolean_values,
            })
            .collect()
    })
}

fn cost_regex() -> &'static Regex {
    static COST: OnceLock<Regex> = OnceLock::new();
    COST.get_or_init(|| compile(COST_PATTERN))
}

fn volume_regex() -> &'static Regex {
    static VOLUME: OnceLock<Regex> = OnceLock::new();
    VOLUME.get_or_init(|| compile(VOLUME_PATTERN))
}

/// Lowercase snake_case with accents folded and `%` spelled out.
pub fn normalize_column_name(name: &str) -> String {
    let spelled = name.replace('%', " pct ");
    let folded: String = spelled.chars().map(fold_accent).collect();
    folded.to_snake_case()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        other => other,
    }
}

pub fn is_cost_like(column: &str) -> bool {
    cost_regex().is_match(&normalize_column_name(column))
}

pub fn is_volume_like(column: &str) -> bool {
    volume_regex().is_match(&normalize_column_name(column))
}

/// Position of a stage column in [`FUNNEL_VOCABULARY`], or
/// [`UNKNOWN_STAGE_ORDER`] when no keyword matches.
pub fn funnel_order(column: &str) -> usize {
    let normalized = normalize_column_name(column);
    FUNNEL_VOCABULARY
        .iter()
        .position(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .unwrap_or(UNKNOWN_STAGE_ORDER)
}

pub fn funnel_stage_of(column: &str) -> Option<FunnelStage> {
    FUNNEL_VOCABULARY
        .get(funnel_order(column))
        .map(|(stage, _)| *stage)
}

/// SHA-256 (hex) over the sorted, de-duplicated column names. Order of the
/// input does not matter.
pub fn schema_fingerprint<S: AsRef<str>>(columns: &[S]) -> String {
    let mut names: Vec<&str> = columns.iter().map(AsRef::as_ref).collect();
    names.sort_unstable();
    names.dedup();
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

pub fn detect_capabilities<S: AsRef<str>>(column_names: &[S], rows: &[Row]) -> CapabilitiesProfile {
    detect_capabilities_with(column_names, rows, DEFAULT_SAMPLE_ROWS)
}

/// Classifies `column_names` using at most `sample_limit` leading rows.
/// `row_count` reports every row passed in.
pub fn detect_capabilities_with<S: AsRef<str>>(
    column_names: &[S],
    rows: &[Row],
    sample_limit: usize,
) -> CapabilitiesProfile {
    let sample = &rows[..rows.len().min(sample_limit)];
    let mut seen = HashSet::new();
    let mut profile = CapabilitiesProfile {
        row_count: rows.len(),
        fingerprint: schema_fingerprint(column_names),
        ..CapabilitiesProfile::default()
    };

    for name in column_names.iter().map(AsRef::as_ref) {
        if !seen.insert(name) {
            continue;
        }
        let values: Vec<&CellValue> = sample
            .iter()
            .map(|row| row.get(name).unwrap_or(&NULL_CELL))
            .collect();
        let column = classify_column(name, &values);
        debug!(
            "Column '{}' classified as {} (by {:?})",
            column.name, column.role, column.source
        );
        match column.role {
            Role::Time => {
                if profile.time_column.is_none() {
                    profile.time_column = Some(column.name.clone());
                }
            }
            Role::Id => {
                if profile.id_column.is_none() {
                    profile.id_column = Some(column.name.clone());
                }
            }
            Role::Currency => profile.currency_columns.push(column.name.clone()),
            Role::Percent => profile.percent_columns.push(column.name.clone()),
            Role::StageFlag => profile.stage_flags.push(column.name.clone()),
            Role::Dimension => profile.dimensions.push(column.name.clone()),
            Role::Metric => profile.metrics.push(column.name.clone()),
            Role::Text => {}
        }
        profile.columns.push(column);
    }

    profile.has_time = profile.time_column.is_some();
    // Stable sort keeps input order among stages sharing a vocabulary slot.
    profile.stage_flags.sort_by_key(|column| funnel_order(column));
    profile
}

pub fn classify_column(name: &str, values: &[&CellValue]) -> ColumnProfile {
    let normalized = normalize_column_name(name);
    for rule in compiled_rules() {
        if !rule.matches(&normalized) {
            continue;
        }
        if rule.requires_boolean_values && !boolean_ratio_met(values) {
            debug!(
                "Column '{name}' matched {} by name but values are not boolean-like",
                rule.role
            );
            continue;
        }
        return ColumnProfile {
            name: name.to_string(),
            role: rule.role,
            source: RoleSource::Name,
        };
    }
    ColumnProfile {
        name: name.to_string(),
        role: infer_role_from_values(values),
        source: RoleSource::Values,
    }
}

fn boolean_ratio_met(values: &[&CellValue]) -> bool {
    let non_null: Vec<&&CellValue> = values.iter().filter(|v| !v.is_null()).collect();
    if non_null.is_empty() {
        return false;
    }
    let boolean_like = non_null.iter().filter(|v| is_boolean_like(v)).count();
    boolean_like as f64 / non_null.len() as f64 >= STAGE_BOOLEAN_MIN_RATIO
}

fn infer_role_from_values(values: &[&CellValue]) -> Role {
    let non_null: Vec<&CellValue> = values.iter().copied().filter(|v| !v.is_null()).collect();
    if non_null.is_empty() {
        return Role::Text;
    }
    let total = non_null.len() as f64;
    let ratio = |count: usize| count as f64 / total;

    let uuid_like = non_null.iter().filter(|v| is_uuid_like(v)).count();
    if ratio(uuid_like) >= SHAPE_MIN_RATIO {
        return Role::Id;
    }
    let numeric = non_null
        .iter()
        .filter(|v| !matches!(v, CellValue::Bool(_)) && to_number(v).is_some())
        .count();
    if ratio(numeric) >= SHAPE_MIN_RATIO {
        return Role::Metric;
    }
    let dates = non_null.iter().filter(|v| looks_like_iso_date(v)).count();
    if ratio(dates) >= SHAPE_MIN_RATIO {
        return Role::Time;
    }
    let distinct: HashSet<_> = non_null.iter().map(|v| v.display_key()).collect();
    if distinct.len() > 1 && distinct.len() <= DIMENSION_MAX_DISTINCT {
        return Role::Dimension;
    }
    Role::Text
}

fn is_uuid_like(value: &CellValue) -> bool {
    match value {
        CellValue::Text(text) => {
            let trimmed = text.trim().trim_matches(|c| matches!(c, '{' | '}'));
            Uuid::parse_str(trimmed).is_ok()
        }
        _ => false,
    }
}
