//! Test doubles for the Oxkair engine: scriptable agents and a progress
//! sink that records everything it is handed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use oxkair_core::state::WorkflowState;
use oxkair_core::traits::{Agent, AgentResult, ProgressSink};
use oxkair_core::types::{AgentFailure, AgentOutput, Evidence, ProgressEvent, StepId};

/// What a [`MockAgent`] hands back.
#[derive(Debug, Clone)]
enum Behaviour {
    Return(serde_json::Value),
    /// Return an object holding every listed step visible in the state
    /// (`null` for absent ones).
    EchoInputs(Vec<StepId>),
    Fail(AgentFailure),
}

/// Agent double with configurable output, latency, and failure.
#[derive(Debug, Clone)]
pub struct MockAgent {
    behaviour: Behaviour,
    delay: Duration,
    evidence: Vec<Evidence>,
    calls: Arc<AtomicUsize>,
}

impl MockAgent {
    /// Succeeds with `"ok"`.
    pub fn ok() -> Self {
        Self::returning(json!("ok"))
    }

    pub fn returning(value: serde_json::Value) -> Self {
        Self {
            behaviour: Behaviour::Return(value),
            delay: Duration::ZERO,
            evidence: vec![],
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn echo_inputs<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        Self {
            behaviour: Behaviour::EchoInputs(steps.into_iter().map(Into::into).collect()),
            ..Self::ok()
        }
    }

    pub fn fatal(message: &str) -> Self {
        Self {
            behaviour: Behaviour::Fail(AgentFailure::fatal(message)),
            ..Self::ok()
        }
    }

    pub fn recoverable(message: &str) -> Self {
        Self {
            behaviour: Behaviour::Fail(AgentFailure::recoverable(message)),
            ..Self::ok()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_evidence(mut self, description: &str) -> Self {
        self.evidence
            .push(Evidence::new(description, serde_json::Value::Null));
        self
    }

    /// Shared counter of `execute` calls; survives moving the agent into a registry.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Agent for MockAgent {
    fn execute<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, AgentResult> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.behaviour {
                Behaviour::Return(value) => {
                    Ok(AgentOutput::new(value.clone()).with_evidence(self.evidence.clone()))
                }
                Behaviour::EchoInputs(steps) => {
                    let mut inputs = serde_json::Map::new();
                    for step in steps {
                        let value = state.get(step).cloned().unwrap_or(serde_json::Value::Null);
                        inputs.insert(step.to_string(), value);
                    }
                    Ok(AgentOutput::new(serde_json::Value::Object(inputs))
                        .with_evidence(self.evidence.clone()))
                }
                Behaviour::Fail(failure) => Err(failure.clone()),
            }
        })
    }
}

/// Agent that panics when executed.
#[derive(Debug, Clone, Default)]
pub struct PanickingAgent;

impl Agent for PanickingAgent {
    fn execute<'a>(&'a self, _state: &'a WorkflowState) -> BoxFuture<'a, AgentResult> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> AgentResult {
    panic!("mock agent panicked")
}

/// Progress sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Progress sink that panics on the event with sequence number `panic_at`.
#[derive(Debug, Clone, Copy)]
pub struct PanickingSink {
    panic_at: u64,
}

impl PanickingSink {
    pub fn new(panic_at: u64) -> Arc<Self> {
        Arc::new(Self { panic_at })
    }
}

impl ProgressSink for PanickingSink {
    fn emit(&self, event: ProgressEvent) {
        if event.seq == self.panic_at {
            panic!("progress sink exploded at event {}", event.seq);
        }
    }
}
