//! Dependency planning, from a flat agent registry to an execution plan.
//!
//! `DependencyGraph` validates the registry (unique producers, known
//! requirements, no cycles). `partition` splits the graph into foundation
//! agents, which have no requirements and run first, and pathways: chains of
//! dependent agents that share nothing but foundation output and can
//! therefore run concurrently.

pub mod builder;
pub mod partition;

pub use builder::DependencyGraph;
pub use partition::{partition, ExecutionPlan};
