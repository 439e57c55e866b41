//! Run reports: one JSON document per run under `data_dir/runs/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::error::{ErrorKind, StepError};
use crate::graph::{StepId, StepState};
use crate::pipeline::Execution;

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepId,
    pub state: StepState,
    /// Zero for steps that never ran.
    pub attempts: u32,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(step: StepId, state: StepState) -> Self {
        Self {
            step,
            state,
            attempts: 0,
            error_kind: None,
            error: None,
        }
    }

    pub fn fail(&mut self, error: &StepError) {
        self.state = StepState::Failed;
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted { step: StepId },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub config_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resumed_from: Option<StepId>,
    pub steps: Vec<StepRecord>,
    pub category: Option<String>,
    pub source_hash: Option<String>,
    pub source_rows: Option<usize>,
    pub outcome: RunOutcome,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// `20240131T120000Z-1a2b3c4d`: sortable by start time, unique per run.
pub fn new_run_id(started_at: DateTime<Utc>) -> String {
    format!(
        "{}-{:08x}",
        started_at.format("%Y%m%dT%H%M%SZ"),
        rand::random::<u32>()
    )
}

impl RunReport {
    pub fn new(
        config_fingerprint: String,
        started_at: DateTime<Utc>,
        resumed_from: Option<StepId>,
        execution: Execution,
        ctx: &RunContext,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: new_run_id(started_at),
            config_fingerprint,
            started_at,
            finished_at: Utc::now(),
            resumed_from,
            steps: execution.steps,
            category: ctx.category.clone(),
            source_hash: ctx.source_hash.clone(),
            source_rows: ctx.source_rows,
            outcome: execution.outcome,
        }
    }

    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|r| r.state == state).count()
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.state == StepState::Failed)
    }

    /// Write to `<dir>/<run_id>.json` atomically and return the path.
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.run_id));
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp_path, json)?;
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(path)
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
