use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use oxkair_core::config::EngineConfig;
use oxkair_core::error::Result;
use oxkair_core::state::WorkflowState;
use oxkair_core::traits::ProgressSink;
use oxkair_core::types::{FailurePolicy, Phase, StepId};

use crate::graph::ExecutionPlan;
use crate::merge::merge;
use crate::progress::ProgressTracker;
use crate::report::{ExecutionReport, ReportBuilder};
use crate::runner::{run_pathway, run_sequence, PathwayResult, SequenceOptions};

/// Scheduler tuning.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Deadline for the whole run.
    pub run_timeout: Option<Duration>,
    /// Cap on pathways running at once. None = all at once.
    pub max_concurrent_pathways: Option<usize>,
}

impl From<&EngineConfig> for SchedulerOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            run_timeout: config.run_timeout(),
            max_concurrent_pathways: config.concurrency_limit(),
        }
    }
}

/// Drives a plan through its three phases.
///
/// 1. Foundation agents run sequentially in the calling task.
/// 2. Pathways run as concurrent tokio tasks over a shared read-only
///    snapshot of the post-foundation state, joined before anything merges.
/// 3. Foundation output and every pathway delta are merged into the final
///    state and the report is sealed.
///
/// Agent errors end up in the report; only structural problems (a broken
/// plan, a merge conflict) come back as `Err`.
#[derive(Debug, Clone, Default)]
pub struct PhaseScheduler {
    options: SchedulerOptions,
}

impl PhaseScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        initial: WorkflowState,
        policy: FailurePolicy,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ExecutionReport> {
        plan.verify()?;

        let mut report = ReportBuilder::new();
        let deadline = self
            .options
            .run_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let tracker = Arc::new(ProgressTracker::new(sink, plan.agent_count()));

        // Phase 1: foundation
        info!(
            agents = plan.foundation.len(),
            pathways = plan.pathways.len(),
            policy = ?policy,
            "Starting foundation phase"
        );
        tracker.phase_started(
            Phase::Foundation,
            format!("Running {} foundation agents", plan.foundation.len()),
        );
        let options = SequenceOptions {
            phase: Phase::Foundation,
            pathway_index: None,
            stop_on_fatal: policy == FailurePolicy::FailFast,
            deadline,
        };
        let foundation =
            run_sequence(&plan.foundation, &initial, &HashSet::new(), &options, &tracker).await;
        report.record(&foundation);

        // Phase 2: pathways
        let pathways = if foundation.stopped() {
            warn!(
                failed_at = ?foundation.failed_at,
                skipped_pathways = plan.pathways.len(),
                "Foundation phase aborted, pathways will not run"
            );
            report.mark_aborted();
            Vec::new()
        } else {
            let mut snapshot = initial.clone();
            for write in &foundation.writes {
                snapshot.set_step(write.step.clone(), write.output.clone());
            }
            tracker.phase_started(
                Phase::Pathways,
                format!("Running {} pathways", plan.pathways.len()),
            );
            info!(pathways = plan.pathways.len(), "Starting pathway phase");
            self.run_pathways(
                plan,
                Arc::new(snapshot),
                Arc::new(foundation.unavailable_steps()),
                deadline,
                tracker.clone(),
            )
            .await
        };
        for pathway in &pathways {
            report.record(pathway);
        }

        // Phase 3: merge
        tracker.merge_started(format!("Merging {} pathway results", pathways.len()));
        let final_state = merge(&initial, &foundation, &pathways)?;
        let report = report.seal(final_state);

        info!(
            succeeded = report.succeeded,
            errors = report.errors.len(),
            elapsed_ms = report.total_elapsed_ms,
            "Run complete"
        );
        tracker.finished(if report.succeeded {
            "Run complete".to_string()
        } else {
            format!("Run finished with {} fatal errors", report.fatal_errors().count())
        });
        Ok(report)
    }

    /// Launch every pathway and wait for all of them.
    ///
    /// A failing or panicking pathway never cancels the others. Results come
    /// back in pathway order.
    async fn run_pathways(
        &self,
        plan: &ExecutionPlan,
        snapshot: Arc<WorkflowState>,
        unavailable: Arc<HashSet<StepId>>,
        deadline: Option<tokio::time::Instant>,
        tracker: Arc<ProgressTracker>,
    ) -> Vec<PathwayResult> {
        let limiter = self
            .options
            .max_concurrent_pathways
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let handles: Vec<_> = plan
            .pathways
            .iter()
            .enumerate()
            .map(|(index, agents)| {
                let agents = agents.clone();
                let snapshot = snapshot.clone();
                let unavailable = unavailable.clone();
                let tracker = tracker.clone();
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(limiter) => limiter.acquire_owned().await.ok(),
                        None => None,
                    };
                    run_pathway(index, &agents, snapshot, &unavailable, deadline, &tracker).await
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        joined
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(pathway = index, error = %e, "Pathway task failed");
                    PathwayResult::panicked(index, &plan.pathways[index], e.to_string())
                }
            })
            .collect()
    }
}
