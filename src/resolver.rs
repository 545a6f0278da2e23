//! Maps a declared column reference onto the dataset's live column names.
//!
//! Strategies run in a fixed order and stop at the first success:
//!
//! 1. case-insensitive exact match,
//! 2. exact match after toggling the `st_` flag prefix,
//! 3. the static [`COLUMN_SYNONYMS`] table (each spelling bare and prefixed),
//! 4. substring match in either direction, accepted only when unique.
//!
//! Exact and alias matches always win over partial ones, so a stale reference
//! never silently binds to a merely similar column.

use log::debug;
use serde::{Deserialize, Serialize};

pub const FLAG_PREFIX: &str = "st_";

/// Canonical business term followed by the spellings seen in real datasets.
pub static COLUMN_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "entrada",
        &["entrada", "entradas", "lead", "leads", "novo_lead", "entry"],
    ),
    (
        "qualificado",
        &["qualificado", "qualificados", "qualificada", "qualified", "mql", "sql"],
    ),
    (
        "agendado",
        &["agendado", "agendados", "agendamento", "reuniao_agendada", "scheduled", "meeting"],
    ),
    (
        "realizado",
        &["realizado", "realizados", "reuniao_realizada", "compareceu", "attended", "show"],
    ),
    ("proposta", &["proposta", "propostas", "proposta_enviada", "proposal"]),
    (
        "venda",
        &["venda", "vendas", "ganho", "fechado", "fechamento", "won", "sale", "sales", "closed"],
    ),
    ("perdido", &["perdido", "perdidos", "perda", "lost", "descartado"]),
    (
        "created_at",
        &["created_at", "data", "data_criacao", "dt_criacao", "criado_em", "dia", "date"],
    ),
    ("valor", &["valor", "valor_venda", "receita", "faturamento", "revenue", "amount"]),
    ("custo", &["custo", "custos", "investimento", "gasto", "spend", "cost"]),
    ("canal", &["canal", "origem", "fonte", "source", "utm_source", "channel"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Exact,
    PrefixToggle,
    Alias,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub declared: String,
    pub resolved: Option<String>,
    pub strategy: Option<ResolutionStrategy>,
    /// Every name tried, in order, lowercased.
    pub attempted: Vec<String>,
    /// Columns that matched partially; populated only on failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl ResolutionRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn resolved_or_declared(&self) -> &str {
        self.resolved.as_deref().unwrap_or(&self.declared)
    }
}

pub fn resolve_column<S: AsRef<str>>(declared: &str, actual_columns: &[S]) -> ResolutionRecord {
    let needle = declared.trim().to_lowercase();
    let mut record = ResolutionRecord {
        declared: declared.to_string(),
        resolved: None,
        strategy: None,
        attempted: Vec::new(),
        candidates: Vec::new(),
    };
    if needle.is_empty() {
        return record;
    }

    record.attempted.push(needle.clone());
    if let Some(found) = find_exact(&needle, actual_columns) {
        return record.succeed(found, ResolutionStrategy::Exact);
    }

    let toggled = toggle_prefix(&needle);
    record.attempted.push(toggled.clone());
    if let Some(found) = find_exact(&toggled, actual_columns) {
        return record.succeed(found, ResolutionStrategy::PrefixToggle);
    }

    let bare = needle.strip_prefix(FLAG_PREFIX).unwrap_or(&needle);
    for (canonical, spellings) in COLUMN_SYNONYMS {
        if *canonical != bare && !spellings.contains(&bare) {
            continue;
        }
        for spelling in spellings.iter() {
            for variant in [spelling.to_string(), format!("{FLAG_PREFIX}{spelling}")] {
                if record.attempted.contains(&variant) {
                    continue;
                }
                let hit = find_exact(&variant, actual_columns);
                record.attempted.push(variant);
                if let Some(found) = hit {
                    return record.succeed(found, ResolutionStrategy::Alias);
                }
            }
        }
    }

    let candidates: Vec<String> = actual_columns
        .iter()
        .map(AsRef::as_ref)
        .filter(|column| {
            let lowered = column.to_lowercase();
            lowered.contains(&needle) || needle.contains(&lowered)
        })
        .map(str::to_string)
        .collect();
    if candidates.len() == 1 {
        let found = candidates[0].clone();
        return record.succeed(found, ResolutionStrategy::Partial);
    }

    debug!(
        "Column '{}' unresolved after {} attempt(s); {} partial candidate(s)",
        declared,
        record.attempted.len(),
        candidates.len()
    );
    record.candidates = candidates;
    record
}

impl ResolutionRecord {
    fn succeed(mut self, column: String, strategy: ResolutionStrategy) -> Self {
        debug!(
            "Column '{}' resolved to '{}' via {:?}",
            self.declared, column, strategy
        );
        self.resolved = Some(column);
        self.strategy = Some(strategy);
        self
    }
}

fn find_exact<S: AsRef<str>>(needle: &str, columns: &[S]) -> Option<String> {
    columns
        .iter()
        .map(AsRef::as_ref)
        .find(|column| column.trim().to_lowercase() == needle)
        .map(str::to_string)
}

fn toggle_prefix(name: &str) -> String {
    match name.strip_prefix(FLAG_PREFIX) {
        Some(rest) => rest.to_string(),
        None => format!("{FLAG_PREFIX}{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_apply_in_order() {
        let columns = ["Dia", "st_agendado", "receita", "origem_lead"];
        assert_eq!(
            resolve_column("dia", &columns).strategy,
            Some(ResolutionStrategy::Exact)
        );
        let toggled = resolve_column("agendado", &columns);
        assert_eq!(toggled.resolved.as_deref(), Some("st_agendado"));
        assert_eq!(toggled.strategy, Some(ResolutionStrategy::PrefixToggle));
        let alias = resolve_column("valor", &columns);
        assert_eq!(alias.resolved.as_deref(), Some("receita"));
        assert_eq!(alias.strategy, Some(ResolutionStrategy::Alias));
        let partial = resolve_column("origem", &columns);
        assert_eq!(partial.resolved.as_deref(), Some("origem_lead"));
        assert_eq!(partial.strategy, Some(ResolutionStrategy::Partial));
    }

    #[test]
    fn ambiguous_partial_match_fails_with_candidates() {
        let columns = ["custo_meta", "custo_google"];
        let record = resolve_column("custo_", &columns);
        assert!(!record.is_resolved());
        assert_eq!(record.candidates, vec!["custo_meta", "custo_google"]);
    }
}
