//! The pipeline as a static DAG of named steps.
//!
//! ```text
//! start → prepare-storage → check-source-file ─┬→ download ─→ await-file
//!                                              └────────────→ await-file
//! await-file → load-raw → normalize-dates → migrate-raw-to-core
//!   → populate-core-tables → build-yearly-mart → pick-random-category
//!   → route-category ─┬→ furniture-mart ─┐
//!                     ├→ office-mart ────┼→ end
//!                     └→ tech-mart ──────┘
//! ```
//!
//! Nodes are stored in topological order. Each node carries a [`TriggerRule`]
//! that decides, from the settled states of its upstreams, whether it runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use martflow_core::CategoryMart;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown step '{0}'; see `martflow graph` for the list")]
    UnknownStep(String),
}

/// Every named step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Start,
    PrepareStorage,
    CheckSourceFile,
    Download,
    AwaitFile,
    LoadRaw,
    NormalizeDates,
    MigrateRawToCore,
    PopulateCoreTables,
    BuildYearlyMart,
    PickRandomCategory,
    RouteCategory,
    FurnitureMart,
    OfficeMart,
    TechMart,
    End,
}

impl StepId {
    /// Topological order.
    pub const ALL: [StepId; 16] = [
        StepId::Start,
        StepId::PrepareStorage,
        StepId::CheckSourceFile,
        StepId::Download,
        StepId::AwaitFile,
        StepId::LoadRaw,
        StepId::NormalizeDates,
        StepId::MigrateRawToCore,
        StepId::PopulateCoreTables,
        StepId::BuildYearlyMart,
        StepId::PickRandomCategory,
        StepId::RouteCategory,
        StepId::FurnitureMart,
        StepId::OfficeMart,
        StepId::TechMart,
        StepId::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Start => "start",
            StepId::PrepareStorage => "prepare-storage",
            StepId::CheckSourceFile => "check-source-file",
            StepId::Download => "download",
            StepId::AwaitFile => "await-file",
            StepId::LoadRaw => "load-raw",
            StepId::NormalizeDates => "normalize-dates",
            StepId::MigrateRawToCore => "migrate-raw-to-core",
            StepId::PopulateCoreTables => "populate-core-tables",
            StepId::BuildYearlyMart => "build-yearly-mart",
            StepId::PickRandomCategory => "pick-random-category",
            StepId::RouteCategory => "route-category",
            StepId::FurnitureMart => "furniture-mart",
            StepId::OfficeMart => "office-mart",
            StepId::TechMart => "tech-mart",
            StepId::End => "end",
        }
    }

    /// The mart step for a category branch action.
    pub fn for_mart(mart: CategoryMart) -> StepId {
        match mart {
            CategoryMart::FurnitureMart => StepId::FurnitureMart,
            CategoryMart::OfficeMart => StepId::OfficeMart,
            CategoryMart::TechMart => StepId::TechMart,
        }
    }

    /// Inverse of [`StepId::for_mart`].
    pub fn mart(&self) -> Option<CategoryMart> {
        match self {
            StepId::FurnitureMart => Some(CategoryMart::FurnitureMart),
            StepId::OfficeMart => Some(CategoryMart::OfficeMart),
            StepId::TechMart => Some(CategoryMart::TechMart),
            _ => None,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| GraphError::UnknownStep(s.to_string()))
    }
}

/// Settled state of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Succeeded,
    /// Not chosen by a branch, or outside the resumed part of the graph.
    Skipped,
    Failed,
    UpstreamFailed,
    /// Completed by an earlier run; treated as a success.
    Reused,
    /// The run aborted before this step was reached.
    NotRun,
}

impl StepState {
    pub fn is_success(&self) -> bool {
        matches!(self, StepState::Succeeded | StepState::Reused)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepState::Failed | StepState::UpstreamFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Succeeded => "succeeded",
            StepState::Skipped => "skipped",
            StepState::Failed => "failed",
            StepState::UpstreamFailed => "upstream_failed",
            StepState::Reused => "reused",
            StepState::NotRun => "not_run",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a trigger rule decides for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Run,
    Skip,
    UpstreamFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Every upstream succeeded. A skipped upstream skips this node too.
    AllSuccess,
    /// At least one upstream succeeded.
    OneSuccess,
}

impl TriggerRule {
    /// Decide from settled upstream states. A node without upstreams runs.
    pub fn evaluate(&self, upstream: &[StepState]) -> Readiness {
        if upstream.is_empty() {
            return Readiness::Run;
        }
        match self {
            TriggerRule::AllSuccess => {
                if upstream.iter().all(StepState::is_success) {
                    Readiness::Run
                } else if upstream.iter().any(StepState::is_failure) {
                    Readiness::UpstreamFailed
                } else {
                    Readiness::Skip
                }
            }
            TriggerRule::OneSuccess => {
                if upstream.iter().any(StepState::is_success) {
                    Readiness::Run
                } else if upstream.iter().all(|s| *s == StepState::Skipped) {
                    Readiness::Skip
                } else {
                    Readiness::UpstreamFailed
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: StepId,
    pub upstream: Vec<StepId>,
    pub trigger: TriggerRule,
}

#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: Vec<Node>,
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelineGraph {
    /// The raw → core → mart pipeline.
    pub fn standard() -> Self {
        use StepId::*;
        use TriggerRule::*;

        let node = |id, upstream: &[StepId], trigger| Node {
            id,
            upstream: upstream.to_vec(),
            trigger,
        };

        Self {
            nodes: vec![
                node(Start, &[], AllSuccess),
                node(PrepareStorage, &[Start], AllSuccess),
                node(CheckSourceFile, &[PrepareStorage], AllSuccess),
                node(Download, &[CheckSourceFile], AllSuccess),
                node(AwaitFile, &[CheckSourceFile, Download], OneSuccess),
                node(LoadRaw, &[AwaitFile], AllSuccess),
                node(NormalizeDates, &[LoadRaw], AllSuccess),
                node(MigrateRawToCore, &[NormalizeDates], AllSuccess),
                node(PopulateCoreTables, &[MigrateRawToCore], AllSuccess),
                node(BuildYearlyMart, &[PopulateCoreTables], AllSuccess),
                node(PickRandomCategory, &[BuildYearlyMart], AllSuccess),
                node(RouteCategory, &[PickRandomCategory], AllSuccess),
                node(FurnitureMart, &[RouteCategory], AllSuccess),
                node(OfficeMart, &[RouteCategory], AllSuccess),
                node(TechMart, &[RouteCategory], AllSuccess),
                node(End, &[FurnitureMart, OfficeMart, TechMart], OneSuccess),
            ],
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: StepId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn upstream(&self, id: StepId) -> &[StepId] {
        self.node(id).map(|n| n.upstream.as_slice()).unwrap_or(&[])
    }

    pub fn downstream(&self, id: StepId) -> Vec<StepId> {
        self.nodes
            .iter()
            .filter(|n| n.upstream.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    /// Every step with a path to `id`, excluding `id`.
    pub fn ancestors(&self, id: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<StepId> = self.upstream(id).to_vec();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend_from_slice(self.upstream(next));
            }
        }
        seen
    }

    /// Every step reachable from `id`, excluding `id`.
    pub fn descendants(&self, id: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut stack = self.downstream(id);
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.downstream(next));
            }
        }
        seen
    }

    /// Direct successors of `branch` that a decision for `chosen` rules out.
    ///
    /// A successor stays live if it is `chosen` or reachable from it, so a
    /// branch arm that rejoins the chosen path is not skipped.
    pub fn skipped_by_branch(&self, branch: StepId, chosen: StepId) -> Vec<StepId> {
        let reachable = self.descendants(chosen);
        self.downstream(branch)
            .into_iter()
            .filter(|s| *s != chosen && !reachable.contains(s))
            .collect()
    }

    /// Initial states for a run starting at `from`.
    ///
    /// Ancestors of `from` count as already done. Steps that are neither
    /// ancestors nor descendants of `from` belong to other branch arms and
    /// are skipped. `from` and its descendants are pending.
    pub fn resume_plan(&self, from: StepId) -> Vec<(StepId, StepState)> {
        let ancestors = self.ancestors(from);
        let descendants = self.descendants(from);
        self.nodes
            .iter()
            .map(|n| {
                let state = if n.id == from || descendants.contains(&n.id) {
                    StepState::Pending
                } else if ancestors.contains(&n.id) {
                    StepState::Reused
                } else {
                    StepState::Skipped
                };
                (n.id, state)
            })
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn settled_state() -> impl Strategy<Value = StepState> {
        prop_oneof![
            Just(StepState::Succeeded),
            Just(StepState::Reused),
            Just(StepState::Skipped),
            Just(StepState::Failed),
            Just(StepState::UpstreamFailed),
            Just(StepState::NotRun),
        ]
    }

    proptest! {
        #[test]
        fn one_success_runs_iff_any_upstream_succeeded(
            states in prop::collection::vec(settled_state(), 1..6)
        ) {
            let runs = TriggerRule::OneSuccess.evaluate(&states) == Readiness::Run;
            prop_assert_eq!(runs, states.iter().any(StepState::is_success));
        }

        #[test]
        fn all_success_runs_iff_every_upstream_succeeded(
            states in prop::collection::vec(settled_state(), 1..6)
        ) {
            let runs = TriggerRule::AllSuccess.evaluate(&states) == Readiness::Run;
            prop_assert_eq!(runs, states.iter().all(StepState::is_success));
        }

        #[test]
        fn resume_plan_covers_every_step_once(idx in 0usize..StepId::ALL.len()) {
            let from = StepId::ALL[idx];
            let plan = PipelineGraph::standard().resume_plan(from);
            let ids: Vec<StepId> = plan.iter().map(|(id, _)| *id).collect();
            prop_assert_eq!(ids, StepId::ALL.to_vec());
            prop_assert!(plan.contains(&(from, StepState::Pending)));
        }
    }
}
