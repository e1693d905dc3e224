//! # Execution Planner
//!
//! Builds the dependency graph of a job's steps. Cycles are detected with a
//! depth-first search that keeps a recursion-stack marker; the outcome is a
//! tagged [`PlanOutcome`] instead of an error raised mid-execution.

use crate::models::{JobSpec, StepSpec, StepType, WorkflowStep};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

/// Result of plan construction
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Valid(ExecutionPlan),
    /// Steps forming the cycle, first step repeated at the end
    Cycle { steps: Vec<String> },
}

/// Topologically ordered view of a job's steps
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionPlan {
    /// Topological order; ties broken by declared `order`, then step id
    pub order: Vec<String>,
    /// Longest dependency chain leading to each step (roots are level 0)
    pub levels: HashMap<String, usize>,
    /// Steps that directly require each step
    pub dependents: HashMap<String, Vec<String>>,
    pub position: HashMap<String, usize>,
}

impl ExecutionPlan {
    pub fn level(&self, step_id: &str) -> usize {
        self.levels.get(step_id).copied().unwrap_or(0)
    }

    pub fn position(&self, step_id: &str) -> usize {
        self.position.get(step_id).copied().unwrap_or(usize::MAX)
    }

    pub fn dependents_of(&self, step_id: &str) -> &[String] {
        self.dependents
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every step reachable through dependents, breadth first
    pub fn transitive_dependents(&self, step_id: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::from([step_id.to_string()]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(&current) {
                if seen.insert(dependent.clone()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Build the plan for a job's steps
pub fn build_plan(steps: &[WorkflowStep]) -> PlanOutcome {
    let graph: BTreeMap<&str, Vec<&str>> = steps
        .iter()
        .map(|s| {
            let deps = s.dependency_requirements.iter().map(String::as_str).collect();
            (s.id.as_str(), deps)
        })
        .collect();

    if let Some(cycle) = find_cycle(&graph) {
        return PlanOutcome::Cycle { steps: cycle };
    }

    PlanOutcome::Valid(order_steps(steps))
}

/// Depth-first search over dependency edges; returns the first cycle found
fn find_cycle(graph: &BTreeMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = graph.keys().map(|k| (*k, Mark::Unvisited)).collect();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        graph: &BTreeMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::OnStack);
        stack.push(node);

        for dep in graph.get(node).into_iter().flatten() {
            match marks.get(dep).copied() {
                Some(Mark::OnStack) => {
                    let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push((*dep).to_string());
                    return Some(cycle);
                }
                Some(Mark::Unvisited) => {
                    if let Some(cycle) = visit(dep, graph, marks, stack) {
                        return Some(cycle);
                    }
                }
                // Done, or a dependency outside the graph (rejected by validation)
                _ => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for node in graph.keys() {
        if marks.get(node).copied() == Some(Mark::Unvisited) {
            if let Some(cycle) = visit(node, graph, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm on an acyclic graph
fn order_steps(steps: &[WorkflowStep]) -> ExecutionPlan {
    let by_id: HashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for step in steps {
        let known_deps = step
            .dependency_requirements
            .iter()
            .filter(|d| by_id.contains_key(d.as_str()))
            .count();
        in_degree.insert(step.id.as_str(), known_deps);
        for dep in &step.dependency_requirements {
            dependents.entry(dep.clone()).or_default().push(step.id.clone());
        }
    }
    for list in dependents.values_mut() {
        list.sort();
    }

    let mut ready: BinaryHeap<Reverse<(u32, &str)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse((by_id[id].order, *id)))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    let mut levels: HashMap<String, usize> = HashMap::with_capacity(steps.len());

    while let Some(Reverse((_, id))) = ready.pop() {
        let step = by_id[id];
        let level = step
            .dependency_requirements
            .iter()
            .filter_map(|d| levels.get(d))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        levels.insert(id.to_string(), level);
        order.push(id.to_string());

        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    let dependent_step = by_id[dependent.as_str()];
                    ready.push(Reverse((dependent_step.order, dependent_step.id.as_str())));
                }
            }
        }
    }

    let position = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();

    ExecutionPlan {
        order,
        levels,
        dependents,
        position,
    }
}

/// Steps declared by the job spec, or one scan step per target when none are declared
pub fn step_specs_for(spec: &JobSpec) -> Vec<StepSpec> {
    if !spec.steps.is_empty() {
        return spec.steps.clone();
    }
    spec.targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            StepSpec::new(format!("scan_{}", i + 1), StepType::Scan)
                .with_target(target.clone())
                .with_order(i as u32)
        })
        .collect()
}

/// Whether `started` respects every dependency among the given steps
pub fn is_valid_start_order(started: &[String], steps: &[WorkflowStep]) -> bool {
    let position: HashMap<&str, usize> = started
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    steps.iter().all(|step| match position.get(step.id.as_str()) {
        None => true,
        Some(pos) => step.dependency_requirements.iter().all(|dep| {
            position.get(dep.as_str()).map(|p| p < pos).unwrap_or(false)
        }),
    })
}
