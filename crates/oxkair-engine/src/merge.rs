use std::collections::HashMap;

use tracing::debug;

use oxkair_core::error::{OxkairError, Result};
use oxkair_core::state::WorkflowState;
use oxkair_core::types::{AgentId, StepId};

use crate::runner::PathwayResult;

/// Combine the foundation segment and every pathway into one state.
///
/// Step deltas are a disjoint union laid over `initial`; a step written by two
/// agents is a `MergeConflict`. Steps of skipped or fatally failed agents stay
/// absent. Errors and evidence are appended in (phase, pathway, agent) order,
/// so `pathways` must be sorted by pathway index.
pub fn merge(
    initial: &WorkflowState,
    foundation: &PathwayResult,
    pathways: &[PathwayResult],
) -> Result<WorkflowState> {
    let mut merged = initial.clone();
    let mut writers: HashMap<StepId, AgentId> = HashMap::new();

    for segment in std::iter::once(foundation).chain(pathways.iter()) {
        for write in &segment.writes {
            if let Some(first) = writers.get(&write.step) {
                return Err(OxkairError::MergeConflict {
                    step: write.step.clone(),
                    first: first.clone(),
                    second: write.agent_id.clone(),
                });
            }
            writers.insert(write.step.clone(), write.agent_id.clone());
            merged.set_step(write.step.clone(), write.output.clone());
        }
        merged.errors.extend(segment.errors.iter().cloned());
        merged.evidence.extend(segment.evidence.iter().cloned());
    }

    debug!(
        steps_written = writers.len(),
        errors = merged.errors.len(),
        "Merged run state"
    );
    Ok(merged)
}
