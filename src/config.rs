//! Runtime settings. Every field has a default, so a missing file or a file
//! setting only some keys still loads.

use std::path::Path;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{AggregationOptions, DEFAULT_MAX_ROWS},
    capabilities::DEFAULT_SAMPLE_ROWS,
    io_utils,
    layout::DEFAULT_RANKING_LIMIT,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector: DetectorSettings,
    pub aggregation: AggregationSettings,
    pub insights: InsightSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub sample_rows: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub max_rows: usize,
    pub ranking_limit: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            ranking_limit: DEFAULT_RANKING_LIMIT,
        }
    }
}

impl AggregationSettings {
    pub fn options(&self) -> AggregationOptions {
        AggregationOptions {
            max_rows: self.max_rows,
            ranking_limit: self.ranking_limit,
        }
    }
}

/// Thresholds for the insight detectors. Percentages are whole numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightSettings {
    pub stale_warning_days: i64,
    pub stale_critical_days: i64,
    pub change_threshold_pct: f64,
    pub problem_threshold_pct: f64,
    pub bottleneck_threshold_pct: f64,
    pub bottleneck_critical_pct: f64,
    pub outlier_sigma: f64,
    pub max_outlier_days: usize,
    pub outlier_columns: usize,
}

impl Default for InsightSettings {
    fn default() -> Self {
        Self {
            stale_warning_days: 3,
            stale_critical_days: 7,
            change_threshold_pct: 20.0,
            problem_threshold_pct: 30.0,
            bottleneck_threshold_pct: 50.0,
            bottleneck_critical_pct: 70.0,
            outlier_sigma: 2.0,
            max_outlier_days: 3,
            outlier_columns: 5,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Settings = io_utils::read_yaml(path)?;
        debug!("Loaded settings from {path:?}: {settings:?}");
        Ok(settings)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let settings: Settings =
            serde_yaml::from_str("aggregation:\n  max_rows: 10\ninsights:\n  outlier_sigma: 3\n").unwrap();
        assert_eq!(settings.aggregation.max_rows, 10);
        assert_eq!(settings.aggregation.ranking_limit, DEFAULT_RANKING_LIMIT);
        assert_eq!(settings.insights.outlier_sigma, 3.0);
        assert_eq!(settings.insights.stale_critical_days, 7);
        assert_eq!(settings.detector.sample_rows, DEFAULT_SAMPLE_ROWS);
    }
}
