use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use oxkair_core::error::{OxkairError, Result};
use oxkair_core::traits::Agent;
use oxkair_core::types::{AgentId, StepId};

/// A registered agent: the step it produces, the steps it needs, and the
/// implementation that does the work.
#[derive(Clone)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub produces: StepId,
    pub requires: BTreeSet<StepId>,
    pub agent: Arc<dyn Agent>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<AgentId>,
        produces: impl Into<StepId>,
        agent: impl Agent,
    ) -> Self {
        Self {
            id: id.into(),
            produces: produces.into(),
            requires: BTreeSet::new(),
            agent: Arc::new(agent),
        }
    }

    /// Use an already shared agent implementation.
    pub fn from_arc(
        id: impl Into<AgentId>,
        produces: impl Into<StepId>,
        agent: Arc<dyn Agent>,
    ) -> Self {
        Self {
            id: id.into(),
            produces: produces.into(),
            requires: BTreeSet::new(),
            agent,
        }
    }

    /// Set the steps this agent requires.
    pub fn requires<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.requires = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_root(&self) -> bool {
        self.requires.is_empty()
    }
}

impl std::fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("id", &self.id)
            .field("produces", &self.produces)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Registry of available agents, kept in registration order.
///
/// Built once at startup and handed to the engine; registration is
/// validated eagerly so a bad pipeline never reaches a run.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDescriptor>>,
    by_step: HashMap<StepId, usize>,
    by_id: HashMap<AgentId, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent.
    ///
    /// Fails if another agent already produces the same step or uses the same id.
    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<()> {
        if let Some(&existing) = self.by_step.get(&descriptor.produces) {
            return Err(OxkairError::DuplicateStep {
                step: descriptor.produces,
                first: self.agents[existing].id.clone(),
                second: descriptor.id,
            });
        }
        if self.by_id.contains_key(&descriptor.id) {
            return Err(OxkairError::DuplicateAgent(descriptor.id));
        }

        let index = self.agents.len();
        self.by_step.insert(descriptor.produces.clone(), index);
        self.by_id.insert(descriptor.id.clone(), index);
        self.agents.push(Arc::new(descriptor));
        Ok(())
    }

    /// Get an agent by id.
    pub fn get(&self, id: &AgentId) -> Option<Arc<AgentDescriptor>> {
        self.by_id.get(id).map(|&i| self.agents[i].clone())
    }

    /// The agent producing `step`, if any.
    pub fn producer_of(&self, step: &StepId) -> Option<Arc<AgentDescriptor>> {
        self.by_step.get(step).map(|&i| self.agents[i].clone())
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> &[Arc<AgentDescriptor>] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
