use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use oxkair_core::error::{OxkairError, Result};
use oxkair_core::types::StepId;

use super::builder::DependencyGraph;
use crate::registry::AgentDescriptor;

/// Foundation agents plus independent, internally ordered pathways.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub foundation: Vec<Arc<AgentDescriptor>>,
    pub pathways: Vec<Vec<Arc<AgentDescriptor>>>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.foundation.is_empty() && self.pathways.is_empty()
    }

    pub fn agent_count(&self) -> usize {
        self.foundation.len() + self.pathways.iter().map(Vec::len).sum::<usize>()
    }

    /// Check the ordering and independence guarantees the scheduler relies on.
    ///
    /// Every foundation requirement must come from an earlier foundation agent;
    /// every pathway requirement from the foundation or an earlier agent of the
    /// same pathway. Anything else means the plan would run out of order.
    pub fn verify(&self) -> Result<()> {
        let mut owner: HashMap<&StepId, String> = HashMap::new();
        for agent in &self.foundation {
            owner.insert(&agent.produces, "foundation".to_string());
        }
        for (index, pathway) in self.pathways.iter().enumerate() {
            for agent in pathway {
                if owner
                    .insert(&agent.produces, format!("pathway {}", index))
                    .is_some()
                {
                    return Err(OxkairError::PlanInvariantViolation(format!(
                        "step '{}' is scheduled more than once",
                        agent.produces
                    )));
                }
            }
        }

        let mut available: HashSet<&StepId> = HashSet::new();
        for agent in &self.foundation {
            check_satisfied(agent, &available, &owner, "foundation")?;
            available.insert(&agent.produces);
        }
        let foundation = available;

        for (index, pathway) in self.pathways.iter().enumerate() {
            let mut available = foundation.clone();
            let location = format!("pathway {}", index);
            for agent in pathway {
                check_satisfied(agent, &available, &owner, &location)?;
                available.insert(&agent.produces);
            }
        }
        Ok(())
    }
}

fn check_satisfied(
    agent: &AgentDescriptor,
    available: &HashSet<&StepId>,
    owner: &HashMap<&StepId, String>,
    location: &str,
) -> Result<()> {
    for step in &agent.requires {
        if !available.contains(step) {
            let found_in = owner
                .get(step)
                .map(String::as_str)
                .unwrap_or("no scheduled agent");
            return Err(OxkairError::PlanInvariantViolation(format!(
                "agent '{}' in {} requires step '{}' produced by {}",
                agent.id, location, step, found_in
            )));
        }
    }
    Ok(())
}

/// Split a validated graph into foundation agents and independent pathways.
///
/// Foundation agents are those with no requirements. The rest are grouped
/// into connected components over the dependency edges between them, so any
/// two agents linked directly, transitively, or through a shared dependant
/// land in the same pathway. Each pathway is ordered with Kahn's algorithm,
/// breaking ties by registration order.
pub fn partition(graph: &DependencyGraph) -> Result<ExecutionPlan> {
    let n = graph.len();
    let is_foundation: Vec<bool> = graph.agents().iter().map(|a| a.is_root()).collect();

    let foundation: Vec<Arc<AgentDescriptor>> = (0..n)
        .filter(|&i| is_foundation[i])
        .map(|i| graph.agent(i).clone())
        .collect();

    let mut components = UnionFind::new(n);
    for i in (0..n).filter(|&i| !is_foundation[i]) {
        for &dep in graph.dependencies(i) {
            if !is_foundation[dep] {
                components.union(i, dep);
            }
        }
    }

    // Components in order of their earliest-registered member
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    for i in (0..n).filter(|&i| !is_foundation[i]) {
        let root = components.find(i);
        let slot = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }

    let mut pathways = Vec::with_capacity(groups.len());
    for members in &groups {
        let order = topo_order(graph, members)?;
        pathways.push(order.into_iter().map(|i| graph.agent(i).clone()).collect());
    }

    let plan = ExecutionPlan {
        foundation,
        pathways,
    };
    plan.verify()?;
    Ok(plan)
}

/// Kahn's algorithm over the subgraph induced by `members`.
fn topo_order(graph: &DependencyGraph, members: &[usize]) -> Result<Vec<usize>> {
    let in_group: HashSet<usize> = members.iter().copied().collect();
    let mut indegree: HashMap<usize, usize> = members
        .iter()
        .map(|&i| {
            let local = graph
                .dependencies(i)
                .iter()
                .filter(|d| in_group.contains(*d))
                .count();
            (i, local)
        })
        .collect();

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(&i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(members.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependant in graph.dependents(next) {
            if let Some(deg) = indegree.get_mut(&dependant) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dependant);
                }
            }
        }
    }

    if order.len() != members.len() {
        return Err(OxkairError::PlanInvariantViolation(format!(
            "pathway starting at '{}' could not be ordered",
            graph.agent(members[0]).id
        )));
    }
    Ok(order)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index wins so roots stay stable
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxkair_test_utils::MockAgent;

    fn agent(id: &str, requires: &[&str]) -> Arc<AgentDescriptor> {
        Arc::new(AgentDescriptor::new(id, id, MockAgent::ok()).requires(requires.iter().copied()))
    }

    fn ids(agents: &[Arc<AgentDescriptor>]) -> Vec<&str> {
        agents.iter().map(|a| a.id.as_str()).collect()
    }

    fn plan_for(agents: Vec<Arc<AgentDescriptor>>) -> Result<ExecutionPlan> {
        partition(&DependencyGraph::build(&agents)?)
    }

    #[test]
    fn test_medical_coding_registry() {
        let plan = plan_for(vec![
            agent("cpt", &[]),
            agent("icd", &["cpt"]),
            agent("lcd", &["icd"]),
            agent("cci", &["cpt"]),
            agent("modifier", &["cpt", "cci"]),
            agent("rvu", &["cpt"]),
        ])
        .unwrap();

        assert_eq!(ids(&plan.foundation), vec!["cpt"]);
        let pathways: Vec<Vec<&str>> = plan.pathways.iter().map(|p| ids(p)).collect();
        assert_eq!(
            pathways,
            vec![vec!["icd", "lcd"], vec!["cci", "modifier"], vec!["rvu"]]
        );
        assert_eq!(plan.agent_count(), 6);
    }

    #[test]
    fn test_consumer_registered_before_producer() {
        let plan = plan_for(vec![
            agent("root", &[]),
            agent("late", &["early"]),
            agent("early", &["root"]),
        ])
        .unwrap();
        assert_eq!(plan.pathways.len(), 1);
        assert_eq!(ids(&plan.pathways[0]), vec!["early", "late"]);
    }

    #[test]
    fn test_diamond_collapses_into_one_pathway() {
        let plan = plan_for(vec![
            agent("a", &[]),
            agent("b", &["a"]),
            agent("c", &["a"]),
            agent("d", &["b", "c"]),
            agent("e", &["a"]),
        ])
        .unwrap();
        let pathways: Vec<Vec<&str>> = plan.pathways.iter().map(|p| ids(p)).collect();
        assert_eq!(pathways, vec![vec!["b", "c", "d"], vec!["e"]]);
    }

    #[test]
    fn test_multiple_foundation_agents() {
        let plan = plan_for(vec![
            agent("note", &[]),
            agent("demographics", &[]),
            agent("codes", &["note", "demographics"]),
        ])
        .unwrap();
        assert_eq!(ids(&plan.foundation), vec!["note", "demographics"]);
        assert_eq!(plan.pathways.len(), 1);
    }

    #[test]
    fn test_empty_registry() {
        let plan = plan_for(vec![]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.agent_count(), 0);
    }

    #[test]
    fn test_verify_rejects_cross_pathway_dependency() {
        let plan = ExecutionPlan {
            foundation: vec![agent("cpt", &[])],
            pathways: vec![vec![agent("icd", &["cpt"])], vec![agent("lcd", &["icd"])]],
        };
        match plan.verify().unwrap_err() {
            OxkairError::PlanInvariantViolation(msg) => {
                assert!(msg.contains("'lcd'"));
                assert!(msg.contains("pathway 0"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_rejects_out_of_order_pathway() {
        let plan = ExecutionPlan {
            foundation: vec![agent("cpt", &[])],
            pathways: vec![vec![agent("lcd", &["icd"]), agent("icd", &["cpt"])]],
        };
        assert!(matches!(
            plan.verify(),
            Err(OxkairError::PlanInvariantViolation(_))
        ));
    }
}
