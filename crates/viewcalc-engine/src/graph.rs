//! Per-configuration dependency graphs.
//!
//! A [`DependencyGraph`] is a DAG of [`DependencyNode`]s. Each node binds one
//! function to one target and declares the specs it consumes and produces.
//! Edges are implicit: a node depends on whichever node produces one of its
//! inputs. Inputs that no node produces are live data requirements.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use viewcalc_common::{TargetRef, ValueRequirement, ValueSpec};

use crate::function::FunctionInvoker;

/// Index of a node inside its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone)]
pub struct DependencyNode {
    function: Arc<dyn FunctionInvoker>,
    target: TargetRef,
    inputs: BTreeSet<ValueSpec>,
    outputs: BTreeSet<ValueSpec>,
}

impl DependencyNode {
    pub fn new(function: Arc<dyn FunctionInvoker>, target: TargetRef) -> Self {
        Self {
            function,
            target,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
        }
    }

    pub fn with_input(mut self, spec: ValueSpec) -> Self {
        self.inputs.insert(spec);
        self
    }

    pub fn with_output(mut self, spec: ValueSpec) -> Self {
        self.outputs.insert(spec);
        self
    }

    pub fn with_inputs(mut self, specs: impl IntoIterator<Item = ValueSpec>) -> Self {
        self.inputs.extend(specs);
        self
    }

    pub fn with_outputs(mut self, specs: impl IntoIterator<Item = ValueSpec>) -> Self {
        self.outputs.extend(specs);
        self
    }

    pub fn function(&self) -> &Arc<dyn FunctionInvoker> {
        &self.function
    }

    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    pub fn inputs(&self) -> &BTreeSet<ValueSpec> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<ValueSpec> {
        &self.outputs
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("function", &self.function.short_name())
            .field("target", &self.target)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Read-only navigation over a compiled graph, used by trace builders and
/// remote explorers.
pub trait DependencyGraphExplorer {
    fn configuration_name(&self) -> &str;

    /// The node producing `spec`, if any.
    fn node_producing(&self, spec: &ValueSpec) -> Option<&DependencyNode>;

    /// The node producing `spec` plus everything it transitively depends on,
    /// each node included once.
    fn subgraph_producing(&self, spec: &ValueSpec) -> Option<DependencyGraph>;

    fn whole_graph(&self) -> &DependencyGraph;
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    configuration_name: Arc<str>,
    nodes: Vec<Arc<DependencyNode>>,
    producers: FxHashMap<ValueSpec, NodeId>,
}

impl DependencyGraph {
    pub fn new(configuration_name: impl Into<Arc<str>>) -> Self {
        Self {
            configuration_name: configuration_name.into(),
            nodes: Vec::new(),
            producers: FxHashMap::default(),
        }
    }

    /// Add a node. A spec already produced by an earlier node keeps its
    /// original producer.
    pub fn add_node(&mut self, node: DependencyNode) -> NodeId {
        self.push_shared(Arc::new(node))
    }

    fn push_shared(&mut self, node: Arc<DependencyNode>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for output in node.outputs() {
            if self.producers.contains_key(output) {
                tracing::warn!(
                    spec = %output,
                    "spec already produced by another node; keeping first producer"
                );
                continue;
            }
            self.producers.insert(output.clone(), id);
        }
        self.nodes.push(node);
        id
    }

    pub fn configuration_name(&self) -> &str {
        &self.configuration_name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id.as_index()).map(Arc::as_ref)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n.as_ref()))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn producer_of(&self, spec: &ValueSpec) -> Option<NodeId> {
        self.producers.get(spec).copied()
    }

    /// Distinct producers of `id`'s inputs, in input order.
    pub fn dependencies_of(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        node.inputs()
            .iter()
            .filter_map(|spec| self.producer_of(spec))
            .filter(|dep| seen.insert(*dep))
            .collect()
    }

    /// Every spec some node in this graph produces.
    pub fn output_specifications(&self) -> impl Iterator<Item = &ValueSpec> {
        self.nodes.iter().flat_map(|n| n.outputs().iter())
    }

    /// Inputs that no node in this graph produces.
    pub fn live_data_requirements(&self) -> BTreeSet<ValueRequirement> {
        self.live_data_inputs()
            .into_iter()
            .map(ValueRequirement::from)
            .collect()
    }

    pub fn live_data_inputs(&self) -> BTreeSet<&ValueSpec> {
        self.nodes
            .iter()
            .flat_map(|n| n.inputs().iter())
            .filter(|spec| !self.producers.contains_key(*spec))
            .collect()
    }

    /// Whether some output spec satisfies `requirement`.
    pub fn satisfies(&self, requirement: &ValueRequirement) -> bool {
        self.output_specifications()
            .any(|spec| spec.satisfies(requirement))
    }
}

impl DependencyGraphExplorer for DependencyGraph {
    fn configuration_name(&self) -> &str {
        &self.configuration_name
    }

    fn node_producing(&self, spec: &ValueSpec) -> Option<&DependencyNode> {
        self.producer_of(spec).and_then(|id| self.node(id))
    }

    fn subgraph_producing(&self, spec: &ValueSpec) -> Option<DependencyGraph> {
        let root = self.producer_of(spec)?;

        let mut visited = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for dep in self.dependencies_of(id) {
                if !visited.contains(&dep) {
                    stack.push(dep);
                }
            }
        }

        let mut ids: Vec<NodeId> = visited.into_iter().collect();
        ids.sort_unstable();

        let mut subgraph = DependencyGraph::new(self.configuration_name.clone());
        for id in ids {
            subgraph.push_shared(self.nodes[id.as_index()].clone());
        }
        Some(subgraph)
    }

    fn whole_graph(&self) -> &DependencyGraph {
        self
    }
}
