#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use adaptive_dash::dataset::Dataset;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes `dataset` as comma-separated text under `name`.
    pub fn write_dataset(&self, name: &str, dataset: &Dataset) -> PathBuf {
        self.write(name, &to_csv(dataset))
    }
}

pub fn dataset(columns: &[&str], rows: Vec<Vec<String>>) -> Dataset {
    let headers: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    Dataset::from_records(&headers, &rows)
}

/// Ten days of `[dia, leads_total, venda_total]` with leads 10..=19.
pub fn daily_totals() -> Dataset {
    let rows = (1..=10)
        .map(|day| {
            vec![
                format!("2024-03-{day:02}"),
                (9 + day).to_string(),
                (day % 3).to_string(),
            ]
        })
        .collect();
    dataset(&["dia", "leads_total", "venda_total"], rows)
}

pub const FUNNEL_STAGES: [&str; 5] = [
    "st_entrada",
    "st_qualificado",
    "st_agendado",
    "st_realizado",
    "st_venda",
];

/// 100 leads with stage counts 100, 80, 50, 30, 10 plus a `canal` dimension.
pub fn stage_funnel() -> Dataset {
    let counts = [100, 80, 50, 30, 10];
    let rows = (0..100)
        .map(|idx| {
            let mut row = vec![
                format!("2024-03-{:02}", idx % 10 + 1),
                if idx % 2 == 0 { "google" } else { "meta" }.to_string(),
            ];
            row.extend(
                counts
                    .iter()
                    .map(|count| if idx < *count { "1" } else { "0" }.to_string()),
            );
            row
        })
        .collect();
    let mut columns = vec!["dia", "canal"];
    columns.extend(FUNNEL_STAGES);
    dataset(&columns, rows)
}

pub fn to_csv(dataset: &Dataset) -> String {
    let mut text = dataset.columns.join(",");
    text.push('\n');
    for row in &dataset.rows {
        let cells: Vec<String> = dataset
            .columns
            .iter()
            .map(|column| row.get(column).map(|cell| cell.to_string()).unwrap_or_default())
            .collect();
        text.push_str(&cells.join(","));
        text.push('\n');
    }
    text
}
