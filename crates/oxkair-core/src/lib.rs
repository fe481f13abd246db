pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EngineConfig};
pub use error::{OxkairError, Result};
pub use event::EventBus;
pub use state::WorkflowState;
pub use traits::{Agent, AgentResult, NoopProgress, ProgressSink};
pub use types::*;
