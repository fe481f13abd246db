use futures::future::BoxFuture;

use crate::state::WorkflowState;
use crate::types::{AgentFailure, AgentOutput, ProgressEvent};

pub type AgentResult = std::result::Result<AgentOutput, AgentFailure>;

/// One unit of analysis producing a single step.
///
/// Implementations read whatever prior steps they need from `state` and
/// return the value for their own step. They may await external I/O.
pub trait Agent: Send + Sync + 'static {
    /// Run the agent against a read-only view of the workflow state.
    fn execute<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, AgentResult>;
}

/// Receives progress events from a run.
///
/// `emit` must return promptly; the engine calls it inline from the
/// scheduler and from pathway tasks. A panic in `emit` drops that one event
/// and is otherwise ignored.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // Receiver may be gone
        let _ = self.send(event);
    }
}
