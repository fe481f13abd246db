use std::sync::Arc;

use tracing::info;

use oxkair_core::config::EngineConfig;
use oxkair_core::error::Result;
use oxkair_core::state::WorkflowState;
use oxkair_core::traits::{NoopProgress, ProgressSink};
use oxkair_core::types::FailurePolicy;

use crate::graph::{partition, DependencyGraph, ExecutionPlan};
use crate::registry::AgentRegistry;
use crate::report::ExecutionReport;
use crate::scheduler::{PhaseScheduler, SchedulerOptions};

/// Entry point for running a registered pipeline.
///
/// Holds the registry and engine settings. Each `run` plans from scratch, so
/// one engine can be shared and run any number of times.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: AgentRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: AgentRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the dependency graph and partition it into foundation and pathways.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        let graph = DependencyGraph::build(self.registry.descriptors())?;
        let plan = partition(&graph)?;
        info!(
            foundation = plan.foundation.len(),
            pathways = plan.pathways.len(),
            agents = plan.agent_count(),
            "Execution plan built"
        );
        Ok(plan)
    }

    /// Plan and run the pipeline against `initial`.
    pub async fn run(
        &self,
        initial: WorkflowState,
        policy: FailurePolicy,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ExecutionReport> {
        let plan = self.plan()?;
        PhaseScheduler::new(SchedulerOptions::from(&self.config))
            .run(&plan, initial, policy, sink)
            .await
    }

    /// Run with the configured failure policy and no progress reporting.
    pub async fn run_with_defaults(&self, initial: WorkflowState) -> Result<ExecutionReport> {
        self.run(initial, self.config.failure_policy, Arc::new(NoopProgress))
            .await
    }
}
