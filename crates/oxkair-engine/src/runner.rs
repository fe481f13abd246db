use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use oxkair_core::state::WorkflowState;
use oxkair_core::traits::AgentResult;
use oxkair_core::types::{
    AgentId, ErrorKind, Evidence, ExecutionError, Phase, Severity, StepId, StepOutput,
};

use crate::progress::ProgressTracker;
use crate::registry::AgentDescriptor;
use crate::report::{AgentOutcome, AgentTiming};

/// One step value written by one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct StepWrite {
    pub agent_id: AgentId,
    pub step: StepId,
    pub output: StepOutput,
}

/// What a sequential segment (the foundation or one pathway) produced.
#[derive(Debug, Clone)]
pub struct PathwayResult {
    /// `None` for the foundation segment.
    pub pathway_index: Option<usize>,
    /// Every agent of the segment, in run order.
    pub agents: Vec<AgentId>,
    /// Agents whose `execute` was invoked.
    pub executed_agents: Vec<AgentId>,
    /// Agents never reached because the segment stopped early.
    pub not_executed: Vec<AgentId>,
    /// Step delta, in agent order.
    pub writes: Vec<StepWrite>,
    pub evidence: Vec<Evidence>,
    pub errors: Vec<ExecutionError>,
    pub timings: Vec<AgentTiming>,
    /// Agent whose failure stopped the segment.
    pub failed_at: Option<AgentId>,
    /// The error that stopped the segment.
    pub error: Option<ExecutionError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PathwayResult {
    pub fn empty(pathway_index: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            pathway_index,
            agents: vec![],
            executed_agents: vec![],
            not_executed: vec![],
            writes: vec![],
            evidence: vec![],
            errors: vec![],
            timings: vec![],
            failed_at: None,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Result for a pathway whose task died without reporting back.
    pub fn panicked(index: usize, agents: &[Arc<AgentDescriptor>], detail: String) -> Self {
        let mut result = Self::empty(Some(index));
        result.agents = agents.iter().map(|a| a.id.clone()).collect();
        if let Some(first) = agents.first() {
            let err = ExecutionError::panicked(first.id.clone(), first.produces.clone(), detail);
            result.not_executed = result.agents.clone();
            result.failed_at = Some(first.id.clone());
            result.errors.push(err.clone());
            result.error = Some(err);
        }
        result
    }

    /// True iff no fatal error occurred in this segment.
    pub fn succeeded(&self) -> bool {
        !self.errors.iter().any(|e| e.is_fatal())
    }

    /// True when the segment stopped before its last agent.
    pub fn stopped(&self) -> bool {
        self.error.is_some()
    }

    pub fn timed_out(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Timeout)
    }

    /// Steps that downstream agents must not count on.
    pub fn unavailable_steps(&self) -> HashSet<StepId> {
        self.errors
            .iter()
            .filter(|e| e.is_fatal() || e.kind == ErrorKind::SkippedDueToDependencyFailure)
            .map(|e| e.step.clone())
            .collect()
    }

    /// Drop everything this segment wrote; errors and timings stay.
    pub fn discard_output(&mut self) {
        self.writes.clear();
        self.evidence.clear();
    }
}

/// How a sequential segment reacts to failures.
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    pub phase: Phase,
    pub pathway_index: Option<usize>,
    /// Stop at the first fatal error instead of skipping its dependants.
    pub stop_on_fatal: bool,
    pub deadline: Option<tokio::time::Instant>,
}

enum Invocation {
    Completed(AgentResult),
    TimedOut,
    Panicked(String),
}

/// Run `agents` one after another on a private copy of `base`.
///
/// Each success is filed under the agent's own step and becomes visible to
/// later agents of the sequence. Agents requiring a step listed in
/// `unavailable` (or made unavailable along the way) are skipped.
/// A timeout always stops the sequence.
pub async fn run_sequence(
    agents: &[Arc<AgentDescriptor>],
    base: &WorkflowState,
    unavailable: &HashSet<StepId>,
    options: &SequenceOptions,
    tracker: &ProgressTracker,
) -> PathwayResult {
    let mut result = PathwayResult::empty(options.pathway_index);
    result.agents = agents.iter().map(|a| a.id.clone()).collect();

    let mut working = base.clone();
    let mut unavailable = unavailable.clone();

    for (position, descriptor) in agents.iter().enumerate() {
        let started_at = Utc::now();

        if let Some(missing) = descriptor.requires.iter().find(|s| unavailable.contains(*s)) {
            warn!(
                agent_id = %descriptor.id,
                missing = %missing,
                "Skipping agent, required step unavailable"
            );
            result.errors.push(ExecutionError::skipped(
                descriptor.id.clone(),
                descriptor.produces.clone(),
                missing,
            ));
            unavailable.insert(descriptor.produces.clone());
            result
                .timings
                .push(timing(descriptor, options, started_at, 0, AgentOutcome::Skipped));
            tracker.agent_finished(options.phase, format!("Skipped {}", descriptor.id));
            continue;
        }

        debug!(agent_id = %descriptor.id, step = %descriptor.produces, "Running agent");
        result.executed_agents.push(descriptor.id.clone());
        let clock = Instant::now();
        let invocation = invoke(descriptor, &working, options.deadline).await;
        let elapsed_ms = clock.elapsed().as_millis() as u64;

        let failure = match invocation {
            Invocation::Completed(Ok(output)) => {
                working.set_step(descriptor.produces.clone(), output.output.clone());
                result.writes.push(StepWrite {
                    agent_id: descriptor.id.clone(),
                    step: descriptor.produces.clone(),
                    output: output.output,
                });
                result.evidence.extend(
                    output
                        .evidence
                        .into_iter()
                        .map(|e| e.attributed(&descriptor.id)),
                );
                result.timings.push(timing(
                    descriptor,
                    options,
                    started_at,
                    elapsed_ms,
                    AgentOutcome::Succeeded,
                ));
                debug!(agent_id = %descriptor.id, elapsed_ms, "Agent completed");
                tracker.agent_finished(options.phase, format!("Completed {}", descriptor.id));
                continue;
            }
            Invocation::Completed(Err(failure)) if failure.severity == Severity::Recoverable => {
                warn!(
                    agent_id = %descriptor.id,
                    error = %failure.message,
                    "Agent failed recoverably, continuing with degraded output"
                );
                result.errors.push(ExecutionError::from_failure(
                    descriptor.id.clone(),
                    descriptor.produces.clone(),
                    failure,
                ));
                working.set_step(descriptor.produces.clone(), StepOutput::default());
                result.writes.push(StepWrite {
                    agent_id: descriptor.id.clone(),
                    step: descriptor.produces.clone(),
                    output: StepOutput::default(),
                });
                result.timings.push(timing(
                    descriptor,
                    options,
                    started_at,
                    elapsed_ms,
                    AgentOutcome::Degraded,
                ));
                tracker.agent_finished(options.phase, format!("Degraded {}", descriptor.id));
                continue;
            }
            Invocation::Completed(Err(failure)) => ExecutionError::from_failure(
                descriptor.id.clone(),
                descriptor.produces.clone(),
                failure,
            ),
            Invocation::TimedOut => {
                ExecutionError::timeout(descriptor.id.clone(), descriptor.produces.clone())
            }
            Invocation::Panicked(detail) => {
                ExecutionError::panicked(descriptor.id.clone(), descriptor.produces.clone(), detail)
            }
        };

        error!(
            agent_id = %descriptor.id,
            kind = ?failure.kind,
            error = %failure.message,
            "Agent failed fatally"
        );
        let outcome = if failure.kind == ErrorKind::Timeout {
            AgentOutcome::TimedOut
        } else {
            AgentOutcome::Failed
        };
        result
            .timings
            .push(timing(descriptor, options, started_at, elapsed_ms, outcome));
        result.errors.push(failure.clone());
        unavailable.insert(descriptor.produces.clone());
        tracker.agent_finished(options.phase, format!("Failed {}", descriptor.id));

        if options.stop_on_fatal || failure.kind == ErrorKind::Timeout {
            result.failed_at = Some(descriptor.id.clone());
            result.error = Some(failure);
            result.not_executed = agents[position + 1..].iter().map(|a| a.id.clone()).collect();
            break;
        }
    }

    result.finished_at = Utc::now();
    result
}

/// Run one pathway against a read-only snapshot of the post-foundation state.
///
/// The pathway stops at its first fatal error. If the run deadline expires
/// mid-pathway, everything it wrote is discarded since an interrupted agent
/// may have left its work half done.
pub async fn run_pathway(
    index: usize,
    agents: &[Arc<AgentDescriptor>],
    snapshot: Arc<WorkflowState>,
    unavailable: &HashSet<StepId>,
    deadline: Option<tokio::time::Instant>,
    tracker: &ProgressTracker,
) -> PathwayResult {
    let options = SequenceOptions {
        phase: Phase::Pathways,
        pathway_index: Some(index),
        stop_on_fatal: true,
        deadline,
    };
    info!(pathway = index, agents = agents.len(), "Pathway started");

    let mut result = run_sequence(agents, &snapshot, unavailable, &options, tracker).await;
    if result.timed_out() {
        warn!(pathway = index, "Run deadline expired, discarding pathway output");
        result.discard_output();
    }

    info!(
        pathway = index,
        executed = result.executed_agents.len(),
        succeeded = result.succeeded(),
        "Pathway finished"
    );
    result
}

async fn invoke(
    descriptor: &AgentDescriptor,
    state: &WorkflowState,
    deadline: Option<tokio::time::Instant>,
) -> Invocation {
    // timeout_at polls once before checking, so an expired deadline would
    // still let an agent with no await points run to completion.
    if deadline.is_some_and(|d| d <= tokio::time::Instant::now()) {
        return Invocation::TimedOut;
    }
    let call = AssertUnwindSafe(descriptor.agent.execute(state)).catch_unwind();
    let outcome = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Invocation::TimedOut,
        },
        None => call.await,
    };
    match outcome {
        Ok(result) => Invocation::Completed(result),
        Err(payload) => Invocation::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("agent panicked: {}", s)
    } else {
        "agent panicked".to_string()
    }
}

fn timing(
    descriptor: &AgentDescriptor,
    options: &SequenceOptions,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
    outcome: AgentOutcome,
) -> AgentTiming {
    AgentTiming {
        agent_id: descriptor.id.clone(),
        step: descriptor.produces.clone(),
        phase: options.phase,
        pathway: options.pathway_index,
        started_at,
        elapsed_ms,
        outcome,
    }
}
