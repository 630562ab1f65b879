//! Topological scheduling of an affected subgraph
//!
//! Kahn's algorithm over the subgraph induced by the affected set, with ties broken
//! by declaration order so a schema always yields the same sequence. When Kahn stalls,
//! the remaining nodes are split into strongly connected components: members of a
//! cyclic component are scheduled as cycle participants (they settle on their fallback
//! value) and edges inside the component are ignored, so fields downstream of a cycle
//! and unrelated fields still get ordered.

use crate::graph::DependencyGraph;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledField {
    pub field_id: String,
    /// Index into `Schedule::cycles` when the field is part of a dependency cycle.
    pub cycle: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub steps: Vec<ScheduledField>,
    /// Cycle member sets, each in declaration order.
    pub cycles: Vec<Vec<String>>,
}

impl Schedule {
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.field_id.as_str()).collect()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

/// Order `subset` so every field comes after its dependencies within the subset.
pub fn schedule(graph: &DependencyGraph, subset: &BTreeSet<usize>) -> Schedule {
    let (order, stalled) = kahn(graph, subset, None);
    if stalled.is_empty() {
        return Schedule {
            steps: order
                .into_iter()
                .map(|i| ScheduledField { field_id: graph.id(i).to_string(), cycle: None })
                .collect(),
            cycles: Vec::new(),
        };
    }

    // Component id per node; cyclic components get an entry in `cycle_of_component`.
    let components = strongly_connected(graph, &stalled);
    let mut component = vec![usize::MAX; graph.len()];
    let mut cycle_of_component = Vec::with_capacity(components.len());
    let mut cycles: Vec<Vec<usize>> = Vec::new();

    for (component_id, members) in components.iter().enumerate() {
        for &member in members {
            component[member] = component_id;
        }
        let is_cycle = members.len() > 1
            || graph.dependent_indices(members[0]).contains(&members[0]);
        if is_cycle {
            let mut sorted = members.clone();
            sorted.sort_unstable();
            cycles.push(sorted);
            cycle_of_component.push(Some(cycles.len() - 1));
        } else {
            cycle_of_component.push(None);
        }
    }

    // Report cycles in declaration order of their first member.
    let mut cycle_rank: Vec<usize> = (0..cycles.len()).collect();
    cycle_rank.sort_by_key(|&c| cycles[c][0]);
    let mut renumber = vec![0; cycles.len()];
    for (rank, &c) in cycle_rank.iter().enumerate() {
        renumber[c] = rank;
    }

    let (order, still_stalled) = kahn(graph, subset, Some(component.as_slice()));
    debug_assert!(still_stalled.is_empty(), "condensation must be acyclic");

    let steps = order
        .into_iter()
        .map(|i| {
            let cycle = if component[i] == usize::MAX {
                None
            } else {
                cycle_of_component[component[i]].map(|c| renumber[c])
            };
            ScheduledField { field_id: graph.id(i).to_string(), cycle }
        })
        .collect();

    let cycles = cycle_rank
        .into_iter()
        .map(|c| cycles[c].iter().map(|&i| graph.id(i).to_string()).collect())
        .collect();

    Schedule { steps, cycles }
}

/// Kahn's algorithm restricted to `subset`. With `component`, edges between two nodes
/// of the same component are ignored. Returns the order and the nodes left over.
fn kahn(
    graph: &DependencyGraph,
    subset: &BTreeSet<usize>,
    component: Option<&[usize]>,
) -> (Vec<usize>, BTreeSet<usize>) {
    let counts = |source: usize, target: usize| -> bool {
        if !subset.contains(&source) {
            return false;
        }
        match component {
            Some(component) => {
                component[source] == usize::MAX || component[source] != component[target]
            }
            None => true,
        }
    };

    let mut in_degree = vec![0usize; graph.len()];
    for &node in subset {
        in_degree[node] = graph
            .dependency_indices(node)
            .iter()
            .filter(|&&dependency| counts(dependency, node))
            .count();
    }

    let mut ready: BinaryHeap<Reverse<usize>> = subset
        .iter()
        .copied()
        .filter(|&node| in_degree[node] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(subset.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in graph.dependent_indices(node) {
            if subset.contains(&dependent) && counts(node, dependent) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    let done: BTreeSet<usize> = order.iter().copied().collect();
    let stalled = subset.difference(&done).copied().collect();
    (order, stalled)
}

/// Tarjan's strongly connected components over the subgraph induced by `nodes`.
///
/// Iterative: each work frame is a node and the position of the next dependent
/// edge to follow, so long chains don't grow the call stack.
fn strongly_connected(graph: &DependencyGraph, nodes: &BTreeSet<usize>) -> Vec<Vec<usize>> {
    struct State {
        next_index: usize,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    impl State {
        fn open(&mut self, node: usize) {
            self.index[node] = Some(self.next_index);
            self.lowlink[node] = self.next_index;
            self.next_index += 1;
            self.stack.push(node);
            self.on_stack[node] = true;
        }

        fn close(&mut self, node: usize) {
            if Some(self.lowlink[node]) != self.index[node] {
                return;
            }
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }

    let mut state = State {
        next_index: 0,
        index: vec![None; graph.len()],
        lowlink: vec![0; graph.len()],
        on_stack: vec![false; graph.len()],
        stack: Vec::new(),
        components: Vec::new(),
    };
    let mut work: Vec<(usize, usize)> = Vec::new();

    for &root in nodes {
        if state.index[root].is_some() {
            continue;
        }
        state.open(root);
        work.push((root, 0));

        while let Some(frame) = work.last_mut() {
            let (node, edge) = *frame;
            let dependents = graph.dependent_indices(node);

            if edge < dependents.len() {
                frame.1 += 1;
                let next = dependents[edge];
                if !nodes.contains(&next) {
                    continue;
                }
                match state.index[next] {
                    None => {
                        state.open(next);
                        work.push((next, 0));
                    }
                    Some(next_index) if state.on_stack[next] => {
                        state.lowlink[node] = state.lowlink[node].min(next_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                state.lowlink[parent] = state.lowlink[parent].min(state.lowlink[node]);
            }
            state.close(node);
        }
    }

    state.components
}
