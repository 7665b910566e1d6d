use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use super::state::{RunState, StepOutcome};
use crate::db::MatviewInfo;
use crate::executor::ExecutionResult;

/// One selected step and how it ended.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub ordinal: u32,
    pub name: String,
    pub outcome: StepOutcome,
    /// Absent when the executor was never invoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

/// Everything observable about a run: transitions, per-step outcomes,
/// counts and the final view listing.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub target: String,
    pub transitions: Vec<RunState>,
    pub steps: Vec<StepRecord>,
    pub success_count: usize,
    pub total_steps_run: usize,
    pub duration_seconds: f64,
    pub views: Vec<MatviewInfo>,
}

impl RunReport {
    pub fn new(target: String) -> Self {
        Self {
            started_at: Utc::now(),
            target,
            transitions: vec![RunState::Idle],
            steps: Vec::new(),
            success_count: 0,
            total_steps_run: 0,
            duration_seconds: 0.0,
            views: Vec::new(),
        }
    }

    pub fn transition(&mut self, state: RunState) {
        self.transitions.push(state);
    }

    pub fn record(&mut self, record: StepRecord) {
        self.total_steps_run += 1;
        if record.outcome.is_success() {
            self.success_count += 1;
        }
        self.steps.push(record);
    }

    pub fn all_succeeded(&self) -> bool {
        self.success_count == self.total_steps_run
    }

    /// `N/M steps executed successfully`
    pub fn summary_line(&self) -> String {
        format!(
            "{}/{} steps executed successfully",
            self.success_count, self.total_steps_run
        )
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        Ok(())
    }
}
