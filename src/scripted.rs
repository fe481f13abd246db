use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use oxkair_core::config::AgentSpec;
use oxkair_core::error::Result;
use oxkair_core::state::WorkflowState;
use oxkair_core::traits::{Agent, AgentResult};
use oxkair_core::types::{AgentFailure, AgentOutput, Evidence, Severity, StepId};
use oxkair_engine::{AgentDescriptor, AgentRegistry};

/// Agent driven entirely by its `[[agents]]` entry.
///
/// Sleeps for `delay_ms`, then either fails with the configured severity or
/// writes its output. Without an explicit `output` it writes the values of the
/// steps it required, which makes data flow through a pipeline visible.
pub struct ScriptedAgent {
    spec: AgentSpec,
}

impl ScriptedAgent {
    pub fn new(spec: AgentSpec) -> Self {
        Self { spec }
    }

    fn default_output(&self, state: &WorkflowState) -> Value {
        let mut inputs = Map::new();
        for step in &self.spec.requires {
            let value = state.get_str(step).cloned().unwrap_or(Value::Null);
            inputs.insert(step.clone(), value);
        }
        json!({ "agent": self.spec.id, "inputs": inputs })
    }
}

impl Agent for ScriptedAgent {
    fn execute<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, AgentResult> {
        Box::pin(async move {
            if self.spec.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.spec.delay_ms)).await;
            }

            if let Some(severity) = self.spec.fail {
                let message = self
                    .spec
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", self.spec.id));
                return Err(match severity {
                    Severity::Fatal => AgentFailure::fatal(message),
                    Severity::Recoverable => AgentFailure::recoverable(message),
                });
            }

            let output = match &self.spec.output {
                Some(value) => value.clone(),
                None => self.default_output(state),
            };
            let evidence = self
                .spec
                .evidence
                .iter()
                .map(|description| Evidence::new(description.clone(), Value::Null))
                .collect();
            Ok(AgentOutput::new(output).with_evidence(evidence))
        })
    }
}

/// Register every configured agent, in file order.
pub fn build_registry(specs: &[AgentSpec]) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for spec in specs {
        let descriptor = AgentDescriptor::new(
            spec.id.as_str(),
            StepId::new(spec.produces.as_str()),
            ScriptedAgent::new(spec.clone()),
        )
        .requires(spec.requires.iter().map(String::as_str));
        registry.register(descriptor)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, requires: &[&str]) -> AgentSpec {
        AgentSpec {
            id: id.to_string(),
            produces: id.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            output: None,
            delay_ms: 0,
            fail: None,
            message: None,
            evidence: vec![],
        }
    }

    #[tokio::test]
    async fn test_default_output_echoes_inputs() {
        let mut state = WorkflowState::new();
        state.set_step("cpt".into(), json!(["99213"]));

        let agent = ScriptedAgent::new(spec("icd", &["cpt"]));
        let output = agent.execute(&state).await.unwrap();
        assert_eq!(output.output["agent"], "icd");
        assert_eq!(output.output["inputs"]["cpt"], json!(["99213"]));
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let mut failing = spec("lcd", &[]);
        failing.fail = Some(Severity::Recoverable);
        failing.message = Some("policy lookup unavailable".to_string());

        let failure = ScriptedAgent::new(failing)
            .execute(&WorkflowState::new())
            .await
            .unwrap_err();
        assert_eq!(failure.severity, Severity::Recoverable);
        assert_eq!(failure.message, "policy lookup unavailable");
    }

    #[test]
    fn test_build_registry_rejects_duplicate_steps() {
        let mut second = spec("other", &[]);
        second.produces = "cpt".to_string();
        assert!(build_registry(&[spec("cpt", &[]), second]).is_err());
    }
}
