use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Evidence, ExecutionError, StepId, StepOutput};

/// Shared accumulator passed through the pipeline.
///
/// Holds one sub-record per completed step plus cross-cutting error and
/// evidence lists. Agents only ever see it by shared reference; the engine
/// files each agent's output under the step that agent produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    steps: BTreeMap<StepId, StepOutput>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state seeded with case data.
    pub fn from_steps(steps: BTreeMap<StepId, StepOutput>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Get a step's output. Absent means "not available", not an error.
    pub fn get(&self, step: &StepId) -> Option<&StepOutput> {
        self.steps.get(step)
    }

    /// Look a step up by name.
    pub fn get_str(&self, step: &str) -> Option<&StepOutput> {
        self.steps.get(&StepId::from(step))
    }

    pub fn contains(&self, step: &StepId) -> bool {
        self.steps.contains_key(step)
    }

    /// Write a step's sub-record. Reserved for the engine and for seeding.
    pub fn set_step(&mut self, step: StepId, output: StepOutput) {
        self.steps.insert(step, output);
    }

    pub fn remove_step(&mut self, step: &StepId) -> Option<StepOutput> {
        self.steps.remove(step)
    }

    /// All step sub-records in step-name order.
    pub fn steps(&self) -> &BTreeMap<StepId, StepOutput> {
        &self.steps
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.keys()
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.is_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut state = WorkflowState::new();
        state.set_step("cpt".into(), json!(["99213"]));

        assert_eq!(state.get_str("cpt"), Some(&json!(["99213"])));
        assert!(state.contains(&StepId::from("cpt")));
        assert_eq!(state.get_str("icd"), None);
    }

    #[test]
    fn test_from_steps_keeps_seed_data() {
        let mut seed = BTreeMap::new();
        seed.insert(StepId::from("case-note"), json!("Patient seen for follow-up"));
        let state = WorkflowState::from_steps(seed);
        assert_eq!(state.step_ids().count(), 1);
        assert!(state.errors.is_empty());
    }

    #[test]
    fn test_state_serializes() {
        let mut state = WorkflowState::new();
        state.set_step("rvu".into(), json!({"work": 1.3}));
        let text = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }
}
