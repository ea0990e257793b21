use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{DependencyGraph, NodeId};

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

/// Nodes with no dependency on each other; safe to evaluate concurrently.
#[derive(Debug)]
pub struct Layer {
    pub nodes: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Schedule {
    pub layers: Vec<Layer>,
    pub cycles: Vec<Vec<NodeId>>,
}

impl Schedule {
    pub fn node_count(&self) -> usize {
        self.layers.iter().map(|l| l.nodes.len()).sum::<usize>()
            + self.cycles.iter().map(Vec::len).sum::<usize>()
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn create_schedule(&self) -> Schedule {
        let nodes: Vec<NodeId> = self.graph.node_ids().collect();

        // 1. Strongly connected components
        let sccs = self.tarjan_scc(&nodes);

        // 2. Cyclic components never evaluate
        let (cycles, acyclic_sccs) = self.separate_cycles(sccs);

        // 3. Kahn layering of the rest
        let layers = self.build_layers(acyclic_sccs);

        Schedule { layers, cycles }
    }

    /// Tarjan's strongly connected components algorithm, driven by an explicit
    /// work stack so graph depth never grows the thread stack.
    pub fn tarjan_scc(&self, nodes: &[NodeId]) -> Vec<Vec<NodeId>> {
        let mut state = TarjanState::default();
        for &node in nodes {
            if !state.indices.contains_key(&node) {
                self.tarjan_visit(node, &mut state);
            }
        }
        state.sccs
    }

    fn tarjan_visit(&self, root: NodeId, state: &mut TarjanState) {
        let mut work = vec![self.open_frame(root, state)];

        while let Some(frame) = work.last_mut() {
            let node = frame.node;
            if let Some(&dependency) = frame.dependencies.get(frame.next) {
                frame.next += 1;
                if !state.indices.contains_key(&dependency) {
                    let child = self.open_frame(dependency, state);
                    work.push(child);
                } else if state.on_stack.contains(&dependency) {
                    let low = state.lowlinks[&node].min(state.indices[&dependency]);
                    state.lowlinks.insert(node, low);
                }
                // Otherwise a cross-edge into a finished component
                continue;
            }

            work.pop();
            if state.lowlinks[&node] == state.indices[&node] {
                let mut scc = Vec::new();
                while let Some(w) = state.stack.pop() {
                    state.on_stack.remove(&w);
                    scc.push(w);
                    if w == node {
                        break;
                    }
                }
                state.sccs.push(scc);
            }
            if let Some(parent) = work.last() {
                let low = state.lowlinks[&parent.node].min(state.lowlinks[&node]);
                state.lowlinks.insert(parent.node, low);
            }
        }
    }

    fn open_frame(&self, node: NodeId, state: &mut TarjanState) -> TarjanFrame {
        state.indices.insert(node, state.index_counter);
        state.lowlinks.insert(node, state.index_counter);
        state.index_counter += 1;
        state.stack.push(node);
        state.on_stack.insert(node);
        TarjanFrame {
            node,
            dependencies: self.graph.dependencies_of(node),
            next: 0,
        }
    }

    fn separate_cycles(&self, sccs: Vec<Vec<NodeId>>) -> (Vec<Vec<NodeId>>, Vec<Vec<NodeId>>) {
        let mut cycles = Vec::new();
        let mut acyclic = Vec::new();

        for scc in sccs {
            if scc.len() > 1 || (scc.len() == 1 && self.has_self_loop(scc[0])) {
                cycles.push(scc);
            } else {
                acyclic.push(scc);
            }
        }

        (cycles, acyclic)
    }

    fn has_self_loop(&self, node: NodeId) -> bool {
        self.graph.dependencies_of(node).contains(&node)
    }

    fn build_layers(&self, acyclic_sccs: Vec<Vec<NodeId>>) -> Vec<Layer> {
        let members: FxHashSet<NodeId> = acyclic_sccs.into_iter().flatten().collect();
        if members.is_empty() {
            return Vec::new();
        }

        // Edges into cyclic nodes are dropped; those inputs resolve to sentinels.
        let mut in_degree: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut dependents: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for &node in &members {
            let deps: Vec<NodeId> = self
                .graph
                .dependencies_of(node)
                .into_iter()
                .filter(|d| members.contains(d))
                .collect();
            in_degree.insert(node, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(node);
            }
        }

        let mut current: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut layers = Vec::new();

        while !current.is_empty() {
            current.sort_unstable();
            let mut next = Vec::new();
            for node in &current {
                for dependent in dependents.get(node).into_iter().flatten() {
                    if let Some(d) = in_degree.get_mut(dependent) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            layers.push(Layer { nodes: current });
            current = next;
        }

        layers
    }
}

struct TarjanFrame {
    node: NodeId,
    dependencies: Vec<NodeId>,
    next: usize,
}

#[derive(Default)]
struct TarjanState {
    index_counter: usize,
    stack: Vec<NodeId>,
    indices: FxHashMap<NodeId, usize>,
    lowlinks: FxHashMap<NodeId, usize>,
    on_stack: FxHashSet<NodeId>,
    sccs: Vec<Vec<NodeId>>,
}
