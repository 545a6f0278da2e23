//! Step-by-step record of a layout compilation. Purely observational: the
//! compiler produces the same outcome whether or not anyone reads the trace.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::catalog::Discard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub name: String,
    pub status: StepStatus,
    pub duration_micros: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discards: Vec<Discard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip)]
    started: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationTrace {
    pub steps: Vec<TraceStep>,
}

impl CompilationTrace {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: names
                .into_iter()
                .map(|name| TraceStep {
                    name: name.into(),
                    status: StepStatus::Pending,
                    duration_micros: 0,
                    discards: Vec::new(),
                    warnings: Vec::new(),
                    started: None,
                })
                .collect(),
        }
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut TraceStep> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    pub fn start(&mut self, name: &str) {
        if let Some(step) = self.step_mut(name) {
            step.status = StepStatus::Running;
            step.started = Some(Instant::now());
        }
    }

    pub fn finish(&mut self, name: &str, status: StepStatus) {
        if let Some(step) = self.step_mut(name) {
            if let Some(started) = step.started.take() {
                step.duration_micros = started.elapsed().as_micros() as u64;
            }
            step.status = status;
        }
    }

    pub fn record_discards(&mut self, name: &str, discards: &[Discard]) {
        if let Some(step) = self.step_mut(name) {
            step.discards.extend_from_slice(discards);
        }
    }

    pub fn record_warning(&mut self, name: &str, warning: impl Into<String>) {
        if let Some(step) = self.step_mut(name) {
            step.warnings.push(warning.into());
        }
    }

    /// Marks every step that never started as skipped.
    pub fn skip_pending(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|step| step.name == name)
            .map(|step| step.status)
    }
}
