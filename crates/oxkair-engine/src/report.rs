use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use oxkair_core::state::WorkflowState;
use oxkair_core::types::{AgentId, ExecutionError, Phase, Severity, StepId};

use crate::runner::PathwayResult;

/// How a single agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Succeeded,
    /// Recoverable failure; step filled with a default value.
    Degraded,
    Failed,
    Skipped,
    TimedOut,
}

/// Wall-clock record of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTiming {
    pub agent_id: AgentId,
    pub step: StepId,
    pub phase: Phase,
    /// `None` for foundation agents.
    pub pathway: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: AgentOutcome,
}

/// When a pathway ran and how far it got.
#[derive(Debug, Clone, Serialize)]
pub struct PathwaySpan {
    pub index: usize,
    pub agents: Vec<AgentId>,
    pub executed: Vec<AgentId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<AgentId>,
}

impl PathwaySpan {
    /// Whether two pathways were running at the same time.
    pub fn overlaps(&self, other: &PathwaySpan) -> bool {
        self.started_at < other.finished_at && other.started_at < self.finished_at
    }
}

/// Outcome of a run, owned by the caller once returned.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub final_state: WorkflowState,
    pub agent_timings: Vec<AgentTiming>,
    pub pathway_spans: Vec<PathwaySpan>,
    /// Agent errors of this run, ordered by phase, pathway, and agent.
    pub errors: Vec<ExecutionError>,
    /// True iff no fatal error occurred in any phase.
    pub succeeded: bool,
    /// True when a foundation failure stopped the run before the pathways.
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub total_elapsed_ms: u64,
}

impl ExecutionReport {
    /// Elapsed milliseconds keyed by agent.
    pub fn per_agent_timings_ms(&self) -> BTreeMap<AgentId, u64> {
        self.agent_timings
            .iter()
            .map(|t| (t.agent_id.clone(), t.elapsed_ms))
            .collect()
    }

    pub fn fatal_errors(&self) -> impl Iterator<Item = &ExecutionError> {
        self.errors.iter().filter(|e| e.severity == Severity::Fatal)
    }

    pub fn recoverable_errors(&self) -> impl Iterator<Item = &ExecutionError> {
        self.errors
            .iter()
            .filter(|e| e.severity == Severity::Recoverable)
    }

    pub fn errors_for<'a>(&'a self, agent: &'a AgentId) -> impl Iterator<Item = &'a ExecutionError> {
        self.errors.iter().filter(move |e| &e.agent_id == agent)
    }

    pub fn timing_for(&self, agent: &AgentId) -> Option<&AgentTiming> {
        self.agent_timings.iter().find(|t| &t.agent_id == agent)
    }
}

/// Accumulates segment results during a run and seals them into a report.
#[derive(Debug)]
pub struct ReportBuilder {
    started_at: DateTime<Utc>,
    timings: Vec<AgentTiming>,
    spans: Vec<PathwaySpan>,
    errors: Vec<ExecutionError>,
    aborted: bool,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            timings: vec![],
            spans: vec![],
            errors: vec![],
            aborted: false,
        }
    }

    /// Record one segment. Call in phase order, then pathway order.
    pub fn record(&mut self, result: &PathwayResult) {
        self.timings.extend(result.timings.iter().cloned());
        self.errors.extend(result.errors.iter().cloned());
        if let Some(index) = result.pathway_index {
            self.spans.push(PathwaySpan {
                index,
                agents: result.agents.clone(),
                executed: result.executed_agents.clone(),
                started_at: result.started_at,
                finished_at: result.finished_at,
                failed_at: result.failed_at.clone(),
            });
        }
    }

    pub fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    pub fn seal(self, final_state: WorkflowState) -> ExecutionReport {
        let finished = Utc::now();
        let total_elapsed_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        let succeeded = !self.errors.iter().any(|e| e.is_fatal());
        ExecutionReport {
            final_state,
            agent_timings: self.timings,
            pathway_spans: self.spans,
            errors: self.errors,
            succeeded,
            aborted: self.aborted,
            started_at: self.started_at,
            total_elapsed_ms,
        }
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
