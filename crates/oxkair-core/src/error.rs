use thiserror::Error;

use crate::types::{AgentId, StepId};

#[derive(Debug, Error)]
pub enum OxkairError {
    // Registry / graph errors
    #[error("Step '{step}' is produced by both '{first}' and '{second}'")]
    DuplicateStep {
        step: StepId,
        first: AgentId,
        second: AgentId,
    },

    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(AgentId),

    #[error("Agent '{agent}' requires step '{step}' which no registered agent produces")]
    UnknownDependency { agent: AgentId, step: StepId },

    #[error("Dependency cycle: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<StepId> },

    // Engine invariant errors
    #[error("Execution plan invariant violated: {0}")]
    PlanInvariantViolation(String),

    #[error("Merge conflict on step '{step}': written by '{first}' and '{second}'")]
    MergeConflict {
        step: StepId,
        first: AgentId,
        second: AgentId,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OxkairError {
    /// Structural errors describe a broken registry or engine, never bad agent data.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStep { .. }
                | Self::DuplicateAgent(_)
                | Self::UnknownDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::PlanInvariantViolation(_)
                | Self::MergeConflict { .. }
        )
    }
}

fn format_cycle(cycle: &[StepId]) -> String {
    cycle
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, OxkairError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = OxkairError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
        assert!(err.is_structural());
    }

    #[test]
    fn test_duplicate_step_names_both_agents() {
        let err = OxkairError::DuplicateStep {
            step: "procedure-codes".into(),
            first: "cpt".into(),
            second: "cpt-v2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cpt"));
        assert!(msg.contains("cpt-v2"));
    }

    #[test]
    fn test_config_error_not_structural() {
        assert!(!OxkairError::Config("bad".into()).is_structural());
    }
}
