use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a unit of produced knowledge (e.g. "procedure-codes").
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique agent identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The value an agent produces for its step. `Null` marks a degraded output.
pub type StepOutput = serde_json::Value;

/// Severity of an agent error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Halts the owning pathway (or the foundation phase under fail-fast).
    Fatal,
    /// Recorded; execution continues with a degraded step output.
    Recoverable,
}

/// What produced an [`ExecutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The agent itself reported a failure.
    Agent,
    /// The agent never ran because a step it requires is unavailable.
    SkippedDueToDependencyFailure,
    /// The run deadline expired while the agent was in flight.
    Timeout,
    /// The task running the agent panicked.
    Panicked,
}

/// An agent error recorded in the report. Always data, never unwound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub agent_id: AgentId,
    pub step: StepId,
    pub message: String,
    pub severity: Severity,
    pub kind: ErrorKind,
}

impl ExecutionError {
    /// Wrap a failure reported by the agent.
    pub fn from_failure(agent_id: AgentId, step: StepId, failure: AgentFailure) -> Self {
        Self {
            agent_id,
            step,
            message: failure.message,
            severity: failure.severity,
            kind: ErrorKind::Agent,
        }
    }

    pub fn skipped(agent_id: AgentId, step: StepId, missing: &StepId) -> Self {
        Self {
            agent_id,
            step,
            message: format!("skipped: required step '{}' is unavailable", missing),
            severity: Severity::Recoverable,
            kind: ErrorKind::SkippedDueToDependencyFailure,
        }
    }

    pub fn timeout(agent_id: AgentId, step: StepId) -> Self {
        Self {
            agent_id,
            step,
            message: "run deadline expired while agent was in flight".to_string(),
            severity: Severity::Fatal,
            kind: ErrorKind::Timeout,
        }
    }

    pub fn panicked(agent_id: AgentId, step: StepId, detail: impl Into<String>) -> Self {
        Self {
            agent_id,
            step,
            message: detail.into(),
            severity: Severity::Fatal,
            kind: ErrorKind::Panicked,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// A piece of supporting evidence emitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Filled in by the engine with the emitting agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AgentId>,
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Evidence {
    pub fn new(description: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            source: None,
            description: description.into(),
            payload,
        }
    }

    /// Attribute this evidence to an agent.
    pub fn attributed(mut self, agent: &AgentId) -> Self {
        self.source = Some(agent.clone());
        self
    }
}

/// Successful result of an agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub output: StepOutput,
    pub evidence: Vec<Evidence>,
}

impl AgentOutput {
    pub fn new(output: StepOutput) -> Self {
        Self {
            output,
            evidence: vec![],
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Failure reported by an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentFailure {
    pub message: String,
    pub severity: Severity,
}

impl AgentFailure {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Fatal,
        }
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Recoverable,
        }
    }
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.severity, self.message)
    }
}

/// How agent failures in the foundation phase affect the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A fatal foundation failure stops the run; pathways never start.
    FailFast,
    /// Record the failure, skip dependants, keep going.
    #[default]
    ContinueOnError,
}

/// Execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Foundation,
    Pathways,
    Merge,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Foundation => "foundation",
            Phase::Pathways => "pathways",
            Phase::Merge => "merge",
        };
        f.write_str(s)
    }
}

/// Progress notification emitted while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Strictly increasing within a run.
    pub seq: u64,
    pub phase: Phase,
    /// Estimated completion, 0-100, non-decreasing within a run.
    pub percent: u8,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}
