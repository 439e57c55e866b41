//! Sequential pipeline executor.
//!
//! Walks the graph in topological order on a single thread. Each node's
//! trigger rule is evaluated against its settled upstreams; runnable nodes
//! are handed to a [`StepRunner`]. Branch outcomes skip the arms not taken.
//! The first failed step aborts the run and every step not yet reached is
//! recorded as `NotRun`.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{PipelineConfig, RetryConfig};
use crate::context::RunContext;
use crate::error::StepError;
use crate::graph::{PipelineGraph, Readiness, StepId, StepState};
use crate::report::{RunOutcome, RunReport, StepRecord};

/// Result of a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// A branch step chose this direct successor.
    Branch(StepId),
}

/// Executes individual steps. The executor owns ordering, the runner owns effects.
pub trait StepRunner {
    fn run(&mut self, step: StepId, ctx: &mut RunContext) -> Result<StepOutcome, StepError>;
}

/// Bounded retries with a fixed delay, applied to retryable errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            retries: config.retries,
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

/// What the executor observed, before it is stamped into a report.
#[derive(Debug)]
pub struct Execution {
    pub steps: Vec<StepRecord>,
    pub outcome: RunOutcome,
}

impl Execution {
    pub fn state_of(&self, step: StepId) -> Option<StepState> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.state)
    }
}

pub struct Executor {
    graph: PipelineGraph,
    retry: RetryPolicy,
}

impl Executor {
    pub fn new(graph: PipelineGraph, retry: RetryPolicy) -> Self {
        Self { graph, retry }
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Run the whole graph, or the part of it from `from` onward.
    pub fn execute(
        &self,
        runner: &mut dyn StepRunner,
        ctx: &mut RunContext,
        from: Option<StepId>,
    ) -> Execution {
        let mut records: Vec<StepRecord> = match from {
            Some(step) => self
                .graph
                .resume_plan(step)
                .into_iter()
                .map(|(id, state)| StepRecord::new(id, state))
                .collect(),
            None => self
                .graph
                .nodes()
                .iter()
                .map(|n| StepRecord::new(n.id, StepState::Pending))
                .collect(),
        };

        for idx in 0..records.len() {
            if records[idx].state != StepState::Pending {
                continue;
            }
            let step = records[idx].step;
            let upstream: Vec<StepState> = self
                .graph
                .upstream(step)
                .iter()
                .map(|up| state_in(&records, *up))
                .collect();
            let trigger = match self.graph.node(step) {
                Some(node) => node.trigger,
                None => continue,
            };

            match trigger.evaluate(&upstream) {
                Readiness::Skip => {
                    records[idx].state = StepState::Skipped;
                    continue;
                }
                Readiness::UpstreamFailed => {
                    records[idx].state = StepState::UpstreamFailed;
                    continue;
                }
                Readiness::Run => {}
            }

            let (result, attempts) = self.attempt(runner, step, ctx);
            records[idx].attempts = attempts;

            let result = result.and_then(|outcome| match outcome {
                StepOutcome::Branch(chosen) if !self.graph.downstream(step).contains(&chosen) => {
                    Err(StepError::InvalidBranch {
                        step: step.to_string(),
                        chosen: chosen.to_string(),
                    })
                }
                other => Ok(other),
            });

            match result {
                Ok(outcome) => {
                    records[idx].state = StepState::Succeeded;
                    if let StepOutcome::Branch(chosen) = outcome {
                        info!(step = %step, chosen = %chosen, "branch decided");
                        for skipped in self.graph.skipped_by_branch(step, chosen) {
                            if let Some(rec) = records.iter_mut().find(|r| r.step == skipped) {
                                if rec.state == StepState::Pending {
                                    rec.state = StepState::Skipped;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(step = %step, attempts, error = %e, "step failed, aborting run");
                    records[idx].fail(&e);
                    abort_remaining(&mut records);
                    return Execution {
                        steps: records,
                        outcome: RunOutcome::Aborted { step },
                    };
                }
            }
        }

        Execution {
            steps: records,
            outcome: RunOutcome::Completed,
        }
    }

    /// Run one step outside the graph walk, with the same retry policy.
    pub fn execute_one(
        &self,
        runner: &mut dyn StepRunner,
        step: StepId,
        ctx: &mut RunContext,
    ) -> (StepRecord, Result<StepOutcome, StepError>) {
        let (result, attempts) = self.attempt(runner, step, ctx);
        let mut record = StepRecord::new(step, StepState::Succeeded);
        record.attempts = attempts;
        if let Err(e) = &result {
            record.fail(e);
        }
        (record, result)
    }

    fn attempt(
        &self,
        runner: &mut dyn StepRunner,
        step: StepId,
        ctx: &mut RunContext,
    ) -> (Result<StepOutcome, StepError>, u32) {
        let max = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            match runner.run(step, ctx) {
                Ok(outcome) => {
                    info!(step = %step, attempt, "step succeeded");
                    return (Ok(outcome), attempt);
                }
                Err(e) if e.is_retryable() && attempt < max => {
                    warn!(
                        step = %step,
                        attempt,
                        kind = %e.kind(),
                        error = %e,
                        delay_secs = self.retry.delay.as_secs(),
                        "step failed, retrying"
                    );
                    thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// How a full run is started.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from this step instead of `start`.
    pub from: Option<StepId>,
    pub retry: RetryPolicy,
}

/// Execute the standard graph and persist the run report under `runs_dir`.
///
/// An aborted run is still `Ok`: the report says where it stopped. Only a
/// failure to fingerprint the config or write the report is an error.
pub fn run_pipeline(
    config: &PipelineConfig,
    runner: &mut dyn StepRunner,
    ctx: &mut RunContext,
    options: &RunOptions,
) -> Result<RunReport, StepError> {
    let fingerprint = config.fingerprint()?;
    let started_at = Utc::now();
    let executor = Executor::new(PipelineGraph::standard(), options.retry);

    info!(from = ?options.from, retries = options.retry.retries, "pipeline run started");
    let execution = executor.execute(runner, ctx, options.from);
    let report = RunReport::new(fingerprint, started_at, options.from, execution, ctx);

    let path = report
        .write_to(&config.runs_dir())
        .map_err(|e| StepError::io("write run report", e))?;
    info!(run_id = %report.run_id, path = %path.display(), outcome = ?report.outcome, "run report written");
    Ok(report)
}

fn state_in(records: &[StepRecord], step: StepId) -> StepState {
    records
        .iter()
        .find(|r| r.step == step)
        .map(|r| r.state)
        .unwrap_or(StepState::NotRun)
}

fn abort_remaining(records: &mut [StepRecord]) {
    for rec in records.iter_mut() {
        if rec.state == StepState::Pending {
            rec.state = StepState::NotRun;
        }
    }
}
