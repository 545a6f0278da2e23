//! Static widget and tab catalog.
//!
//! Every widget and tab type declares the minimum capabilities it needs and a
//! single fallback type. The fallbacks form a directed acyclic graph whose
//! sinks have no requirements, so walking the chain from any type always ends
//! at something the dataset can render. [`validate_catalog`] checks that
//! property; the compiler refuses to run when it does not hold.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitiesProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    StatusCard,
    KpiCard,
    CurrencyKpi,
    FunnelChart,
    BarChart,
    LineChart,
    AreaChart,
    Ranking,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabType {
    Overview,
    Time,
    Funnel,
    Explore,
    Efficiency,
    Table,
}

/// Minimum capability thresholds. The default value requires nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub needs_time: bool,
    pub min_stage_flags: usize,
    pub min_dimensions: usize,
    pub min_measures: usize,
    pub min_currency: usize,
}

impl Requirements {
    pub const NONE: Requirements = Requirements {
        needs_time: false,
        min_stage_flags: 0,
        min_dimensions: 0,
        min_measures: 0,
        min_currency: 0,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    /// Describes the first unmet threshold, or `None` when all are met.
    pub fn unmet_reason(&self, caps: &CapabilitiesProfile) -> Option<String> {
        if self.needs_time && !caps.has_time {
            return Some("requires a time column".to_string());
        }
        if caps.stage_flags_count() < self.min_stage_flags {
            return Some(format!(
                "requires at least {} stage flag column(s), found {}",
                self.min_stage_flags,
                caps.stage_flags_count()
            ));
        }
        if caps.dimensions.len() < self.min_dimensions {
            return Some(format!(
                "requires at least {} dimension column(s), found {}",
                self.min_dimensions,
                caps.dimensions.len()
            ));
        }
        if caps.measure_count() < self.min_measures {
            return Some(format!(
                "requires at least {} measure column(s), found {}",
                self.min_measures,
                caps.measure_count()
            ));
        }
        if caps.currency_columns.len() < self.min_currency {
            return Some(format!(
                "requires at least {} currency column(s), found {}",
                self.min_currency,
                caps.currency_columns.len()
            ));
        }
        None
    }

    pub fn is_met(&self, caps: &CapabilitiesProfile) -> bool {
        self.unmet_reason(caps).is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetSpec {
    pub widget: WidgetType,
    pub requires: Requirements,
    pub fallback: Option<WidgetType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabSpec {
    pub tab: TabType,
    pub priority: u8,
    pub requires: Requirements,
    pub fallback: Option<TabType>,
    pub always_enabled: bool,
}

impl WidgetType {
    pub const ALL: [WidgetType; 9] = [
        WidgetType::StatusCard,
        WidgetType::KpiCard,
        WidgetType::CurrencyKpi,
        WidgetType::FunnelChart,
        WidgetType::BarChart,
        WidgetType::LineChart,
        WidgetType::AreaChart,
        WidgetType::Ranking,
        WidgetType::Table,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetType::StatusCard => "status_card",
            WidgetType::KpiCard => "kpi_card",
            WidgetType::CurrencyKpi => "currency_kpi",
            WidgetType::FunnelChart => "funnel_chart",
            WidgetType::BarChart => "bar_chart",
            WidgetType::LineChart => "line_chart",
            WidgetType::AreaChart => "area_chart",
            WidgetType::Ranking => "ranking",
            WidgetType::Table => "table",
        }
    }

    pub fn spec(self) -> WidgetSpec {
        let (requires, fallback) = match self {
            WidgetType::StatusCard => (Requirements::NONE, None),
            WidgetType::Table => (Requirements::NONE, None),
            WidgetType::KpiCard => (
                Requirements {
                    min_measures: 1,
                    ..Requirements::NONE
                },
                Some(WidgetType::StatusCard),
            ),
            WidgetType::CurrencyKpi => (
                Requirements {
                    min_currency: 1,
                    ..Requirements::NONE
                },
                Some(WidgetType::KpiCard),
            ),
            WidgetType::FunnelChart => (
                Requirements {
                    min_stage_flags: 3,
                    ..Requirements::NONE
                },
                Some(WidgetType::BarChart),
            ),
            WidgetType::BarChart => (
                Requirements {
                    min_dimensions: 1,
                    ..Requirements::NONE
                },
                Some(WidgetType::Table),
            ),
            WidgetType::LineChart => (
                Requirements {
                    needs_time: true,
                    min_measures: 1,
                    ..Requirements::NONE
                },
                Some(WidgetType::BarChart),
            ),
            WidgetType::AreaChart => (
                Requirements {
                    needs_time: true,
                    min_measures: 2,
                    ..Requirements::NONE
                },
                Some(WidgetType::LineChart),
            ),
            WidgetType::Ranking => (
                Requirements {
                    min_dimensions: 1,
                    ..Requirements::NONE
                },
                Some(WidgetType::Table),
            ),
        };
        WidgetSpec {
            widget: self,
            requires,
            fallback,
        }
    }

    /// Default grid footprint `(width, height)` on a 12-column grid.
    pub fn footprint(self) -> (u8, u8) {
        match self {
            WidgetType::StatusCard => (12, 1),
            WidgetType::KpiCard | WidgetType::CurrencyKpi => (3, 2),
            WidgetType::FunnelChart => (12, 4),
            WidgetType::BarChart
            | WidgetType::LineChart
            | WidgetType::AreaChart
            | WidgetType::Ranking => (6, 4),
            WidgetType::Table => (12, 8),
        }
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TabType {
    pub const ALL: [TabType; 6] = [
        TabType::Overview,
        TabType::Time,
        TabType::Funnel,
        TabType::Explore,
        TabType::Efficiency,
        TabType::Table,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TabType::Overview => "overview",
            TabType::Time => "time",
            TabType::Funnel => "funnel",
            TabType::Explore => "explore",
            TabType::Efficiency => "efficiency",
            TabType::Table => "table",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            TabType::Overview => "Overview",
            TabType::Time => "Trends",
            TabType::Funnel => "Funnel",
            TabType::Explore => "Explore",
            TabType::Efficiency => "Efficiency",
            TabType::Table => "Data",
        }
    }

    pub fn spec(self) -> TabSpec {
        let (priority, requires, fallback, always_enabled) = match self {
            TabType::Overview => (0, Requirements::NONE, None, true),
            // Stage volume over time; plain metric trends stay on the overview.
            TabType::Time => (
                1,
                Requirements {
                    needs_time: true,
                    min_stage_flags: 1,
                    ..Requirements::NONE
                },
                Some(TabType::Overview),
                false,
            ),
            TabType::Funnel => (
                2,
                Requirements {
                    min_stage_flags: 3,
                    ..Requirements::NONE
                },
                Some(TabType::Explore),
                false,
            ),
            TabType::Explore => (
                3,
                Requirements {
                    min_dimensions: 1,
                    ..Requirements::NONE
                },
                Some(TabType::Table),
                false,
            ),
            TabType::Efficiency => (
                4,
                Requirements {
                    min_currency: 1,
                    ..Requirements::NONE
                },
                Some(TabType::Overview),
                false,
            ),
            TabType::Table => (5, Requirements::NONE, None, true),
        };
        TabSpec {
            tab: self,
            priority,
            requires,
            fallback,
            always_enabled,
        }
    }
}

impl fmt::Display for TabType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn widget_catalog() -> Vec<WidgetSpec> {
    WidgetType::ALL.iter().map(|w| w.spec()).collect()
}

pub fn tab_catalog() -> Vec<TabSpec> {
    let mut tabs: Vec<TabSpec> = TabType::ALL.iter().map(|t| t.spec()).collect();
    tabs.sort_by_key(|spec| spec.priority);
    tabs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardKind {
    Widget,
    Tab,
}

/// A requested widget or tab that was replaced (or dropped) because the
/// dataset could not support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discard {
    pub kind: DiscardKind,
    pub requested: String,
    pub fallback: Option<String>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetResolution {
    pub requested: WidgetType,
    pub effective: WidgetType,
    pub discards: Vec<Discard>,
}

impl WidgetResolution {
    pub fn substituted(&self) -> bool {
        self.requested != self.effective
    }

    /// Reason recorded for the first substitution in the chain.
    pub fn reason(&self) -> Option<&str> {
        self.discards.first().map(|d| d.reason.as_str())
    }
}

/// Walks the fallback chain from `requested` until a type whose requirements
/// `caps` satisfies. Each hop is recorded as a [`Discard`].
pub fn resolve_widget(
    requested: WidgetType,
    caps: &CapabilitiesProfile,
    tab: Option<TabType>,
) -> WidgetResolution {
    let mut current = requested;
    let mut discards = Vec::new();
    for _ in 0..=WidgetType::ALL.len() {
        let spec = current.spec();
        let Some(reason) = spec.requires.unmet_reason(caps) else {
            return WidgetResolution {
                requested,
                effective: current,
                discards,
            };
        };
        let Some(next) = spec.fallback else {
            break;
        };
        discards.push(Discard {
            kind: DiscardKind::Widget,
            requested: current.as_str().to_string(),
            fallback: Some(next.as_str().to_string()),
            reason,
            tab,
        });
        current = next;
    }
    // Only reachable with a broken catalog, which validate_catalog rejects.
    WidgetResolution {
        requested,
        effective: WidgetType::Table,
        discards,
    }
}

/// Checks that every fallback chain terminates within a bounded number of
/// hops at a requirement-free type. Returns one message per violation.
pub fn validate_catalog() -> Vec<String> {
    let mut violations = Vec::new();
    for widget in WidgetType::ALL {
        if let Err(message) = walk_chain(widget, WidgetType::ALL.len(), |w| {
            let spec = w.spec();
            (spec.fallback, spec.requires)
        }) {
            violations.push(format!("widget '{widget}': {message}"));
        }
    }
    for tab in TabType::ALL {
        let spec = tab.spec();
        if spec.always_enabled && !spec.requires.is_empty() {
            violations.push(format!("tab '{tab}': always-enabled tab declares requirements"));
        }
        if let Err(message) = walk_chain(tab, TabType::ALL.len(), |t| {
            let spec = t.spec();
            (spec.fallback, spec.requires)
        }) {
            violations.push(format!("tab '{tab}': {message}"));
        }
    }
    violations
}

fn walk_chain<T, F>(start: T, max_hops: usize, step: F) -> Result<usize, String>
where
    T: Copy + PartialEq + fmt::Display,
    F: Fn(T) -> (Option<T>, Requirements),
{
    let mut current = start;
    for hops in 0..=max_hops {
        match step(current) {
            (None, requires) if requires.is_empty() => return Ok(hops),
            (None, _) => {
                return Err(format!(
                    "chain ends at '{current}', which still has requirements"
                ));
            }
            (Some(next), _) => current = next,
        }
    }
    Err(format!("fallback chain exceeds {max_hops} hops (cycle)"))
}

/// Number of hops from `widget` to its terminal fallback.
pub fn fallback_depth(widget: WidgetType) -> Option<usize> {
    walk_chain(widget, WidgetType::ALL.len(), |w| {
        let spec = w.spec();
        (spec.fallback, spec.requires)
    })
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(stages: usize, dims: usize, time: bool) -> CapabilitiesProfile {
        CapabilitiesProfile {
            has_time: time,
            time_column: time.then(|| "dia".to_string()),
            stage_flags: (0..stages).map(|i| format!("st_{i}")).collect(),
            dimensions: (0..dims).map(|i| format!("dim_{i}")).collect(),
            ..CapabilitiesProfile::default()
        }
    }

    #[test]
    fn shipped_catalog_is_valid() {
        assert!(validate_catalog().is_empty(), "{:?}", validate_catalog());
    }

    #[test]
    fn funnel_falls_back_through_bar_to_table() {
        let caps = caps_with(1, 0, false);
        let resolution = resolve_widget(WidgetType::FunnelChart, &caps, None);
        assert_eq!(resolution.effective, WidgetType::Table);
        assert_eq!(resolution.discards.len(), 2);
        assert_eq!(resolution.discards[0].requested, "funnel_chart");
        assert_eq!(resolution.discards[0].fallback.as_deref(), Some("bar_chart"));
        assert!(resolution.reason().unwrap().contains("stage flag"));
    }

    #[test]
    fn satisfied_widget_is_kept() {
        let caps = caps_with(4, 1, true);
        let resolution = resolve_widget(WidgetType::FunnelChart, &caps, Some(TabType::Funnel));
        assert!(!resolution.substituted());
        assert!(resolution.discards.is_empty());
    }

    #[test]
    fn tab_catalog_is_sorted_by_priority() {
        let order: Vec<TabType> = tab_catalog().iter().map(|t| t.tab).collect();
        assert_eq!(order.first(), Some(&TabType::Overview));
        assert_eq!(order.last(), Some(&TabType::Table));
    }
}
