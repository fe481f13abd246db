//! Planning and execution for Oxkair agent pipelines.
//!
//! Agents declare the step they produce and the steps they require. The
//! engine turns that into a plan (foundation agents first, then independent
//! pathways that run concurrently) and merges everything back into one
//! workflow state with a report of what happened.

pub mod engine;
pub mod graph;
pub mod merge;
pub mod progress;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;

pub use engine::Engine;
pub use graph::{partition, DependencyGraph, ExecutionPlan};
pub use merge::merge;
pub use progress::ProgressTracker;
pub use registry::{AgentDescriptor, AgentRegistry};
pub use report::{AgentOutcome, AgentTiming, ExecutionReport, PathwaySpan};
pub use runner::PathwayResult;
pub use scheduler::{PhaseScheduler, SchedulerOptions};
