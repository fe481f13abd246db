use std::collections::HashMap;
use std::sync::Arc;

use oxkair_core::error::{OxkairError, Result};
use oxkair_core::types::StepId;

use crate::registry::AgentDescriptor;

/// Validated dependency DAG over a registry.
///
/// Nodes are agents, addressed by registration index. An edge runs from a
/// consumer to the producer of each step it requires.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    agents: Vec<Arc<AgentDescriptor>>,
    producers: HashMap<StepId, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Build and validate the graph.
    ///
    /// Rejects duplicate produced steps, requirements nobody produces, and cycles.
    pub fn build(agents: &[Arc<AgentDescriptor>]) -> Result<Self> {
        let mut producers: HashMap<StepId, usize> = HashMap::with_capacity(agents.len());
        for (index, agent) in agents.iter().enumerate() {
            if let Some(&first) = producers.get(&agent.produces) {
                return Err(OxkairError::DuplicateStep {
                    step: agent.produces.clone(),
                    first: agents[first].id.clone(),
                    second: agent.id.clone(),
                });
            }
            producers.insert(agent.produces.clone(), index);
        }

        let mut dependencies = vec![Vec::new(); agents.len()];
        let mut dependents = vec![Vec::new(); agents.len()];
        for (index, agent) in agents.iter().enumerate() {
            for step in &agent.requires {
                let producer = *producers.get(step).ok_or_else(|| {
                    OxkairError::UnknownDependency {
                        agent: agent.id.clone(),
                        step: step.clone(),
                    }
                })?;
                dependencies[index].push(producer);
                dependents[producer].push(index);
            }
        }
        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self {
            agents: agents.to_vec(),
            producers,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.agents.len()];
        let mut stack = Vec::new();
        for start in 0..self.agents.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Result<()> {
        marks[node] = Mark::Visiting;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            match marks[dep] {
                Mark::Visiting => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<StepId> = stack[start..]
                        .iter()
                        .map(|&i| self.agents[i].produces.clone())
                        .collect();
                    cycle.push(self.agents[dep].produces.clone());
                    return Err(OxkairError::CyclicDependency { cycle });
                }
                Mark::Unvisited => self.visit(dep, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Agents in registration order.
    pub fn agents(&self) -> &[Arc<AgentDescriptor>] {
        &self.agents
    }

    pub fn agent(&self, index: usize) -> &Arc<AgentDescriptor> {
        &self.agents[index]
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Registration index of the agent producing `step`.
    pub fn producer_of(&self, step: &StepId) -> Option<usize> {
        self.producers.get(step).copied()
    }

    /// Producers of the steps agent `index` requires, ascending.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// Agents requiring the step agent `index` produces, ascending.
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxkair_test_utils::MockAgent;

    fn agent(id: &str, requires: &[&str]) -> Arc<AgentDescriptor> {
        Arc::new(AgentDescriptor::new(id, id, MockAgent::ok()).requires(requires.iter().copied()))
    }

    #[test]
    fn test_builds_edges() {
        let agents = vec![agent("cpt", &[]), agent("cci", &["cpt"]), agent("modifier", &["cpt", "cci"])];
        let graph = DependencyGraph::build(&agents).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies(2), &[0, 1]);
        assert_eq!(graph.dependents(0), &[1, 2]);
        assert_eq!(graph.producer_of(&"cci".into()), Some(1));
    }

    #[test]
    fn test_duplicate_step() {
        let agents = vec![
            Arc::new(AgentDescriptor::new("a", "codes", MockAgent::ok())),
            Arc::new(AgentDescriptor::new("b", "codes", MockAgent::ok())),
        ];
        let err = DependencyGraph::build(&agents).unwrap_err();
        assert!(matches!(err, OxkairError::DuplicateStep { .. }));
        assert!(err.to_string().contains("'a'"));
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_unknown_dependency() {
        let agents = vec![agent("icd", &["cpt"])];
        match DependencyGraph::build(&agents).unwrap_err() {
            OxkairError::UnknownDependency { agent, step } => {
                assert_eq!(agent.as_str(), "icd");
                assert_eq!(step.as_str(), "cpt");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let agents = vec![agent("a", &["b"]), agent("b", &["a"])];
        match DependencyGraph::build(&agents).unwrap_err() {
            OxkairError::CyclicDependency { cycle } => {
                let names: Vec<_> = cycle.iter().map(|s| s.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let agents = vec![agent("a", &["a"])];
        let err = DependencyGraph::build(&agents).unwrap_err();
        assert!(matches!(err, OxkairError::CyclicDependency { ref cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let agents = vec![
            agent("root", &[]),
            agent("x", &["root", "z"]),
            agent("y", &["x"]),
            agent("z", &["y"]),
        ];
        match DependencyGraph::build(&agents).unwrap_err() {
            OxkairError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&StepId::from("root")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let agents = vec![
            agent("a", &[]),
            agent("b", &["a"]),
            agent("c", &["a"]),
            agent("d", &["b", "c"]),
        ];
        assert!(DependencyGraph::build(&agents).is_ok());
    }

    #[test]
    fn test_empty_registry() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
    }
}
