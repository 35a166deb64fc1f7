//! Creating and computing generic fixpoint computations.
//!
//! A fixpoint problem is defined on a directed graph where each node `n` gets
//! assigned a value `val(n)` from a partially ordered set and each edge `e`
//! defines a rule `e: value -> value` describing how to compute the value at
//! the end node of the edge from the value at its start node. A fixpoint is
//! reached when `e(val(start_node)) <= val(end_node)` holds for all edges.
//!
//! Nodes represent points in time, edges represent transitions, so only edges
//! have transition functions. An edge transition may return `None` to
//! indicate that no information flows through the edge.
//!
//! To solve a fixpoint problem one creates an object implementing the
//! [`Context`] trait, wraps it into a [`Computation`], seeds the starting
//! values with [`Computation::set_node_value`] and then runs
//! [`Computation::compute_with_max_steps`].
//!
//! # Widening
//!
//! Domains whose ascending chains are long (or unbounded, like access-path
//! trees that grow deeper each loop iteration) need widening to terminate.
//! The engine reports the number of times a node's value has already been
//! updated to [`Context::widen`], so the context can switch from the precise
//! join to an over-approximating widening once a node has been revisited
//! often enough.

use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};

/// The context of a fixpoint computation.
pub trait Context {
    /// The type of edge labels of the underlying graph.
    type EdgeLabel: Clone;
    /// The type of node labels of the underlying graph.
    type NodeLabel;
    /// The type of the value that gets assigned to each node.
    /// The values should form a partially ordered set.
    type NodeValue: PartialEq + Eq + Clone;

    /// Get the graph on which the fixpoint computation operates.
    fn get_graph(&self) -> &DiGraph<Self::NodeLabel, Self::EdgeLabel>;

    /// Merge two values into an upper bound of both.
    fn merge(&self, value1: &Self::NodeValue, value2: &Self::NodeValue) -> Self::NodeValue;

    /// Combine the old value at a node with a new incoming value.
    ///
    /// `iteration` is the number of times the node's value has already been
    /// updated during this computation. The default implementation ignores it
    /// and merges precisely; contexts over domains with long ascending chains
    /// should over-approximate once `iteration` exceeds their widening delay.
    fn widen(
        &self,
        old_value: &Self::NodeValue,
        new_value: &Self::NodeValue,
        iteration: u64,
    ) -> Self::NodeValue {
        let _ = iteration;
        self.merge(old_value, new_value)
    }

    /// Compute the value at the end node of `edge` from the value at its
    /// start node. Return `None` if no information flows through the edge.
    fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue>;
}

/// The computation struct contains an intermediate result of a fixpoint
/// computation and provides methods for continuing the fixpoint computation
/// or extracting the (intermediate or final) results.
pub struct Computation<T: Context> {
    /// The context object needed for the fixpoint computation.
    fp_context: T,
    /// Maps a node index to its priority (higher priority nodes get stabilized first).
    node_priority_list: Vec<usize>,
    /// Maps a priority to the corresponding node index.
    priority_to_node_list: Vec<NodeIndex>,
    /// The number of times each node's value has been updated so far.
    update_counts: Vec<u64>,
    /// The worklist contains the priority numbers (not the node indices!)
    /// of nodes marked as not yet stabilized.
    worklist: BTreeSet<usize>,
    /// The internal map containing all known node values.
    node_values: FnvHashMap<NodeIndex, T::NodeValue>,
}

impl<T: Context> Computation<T> {
    /// Create a new fixpoint computation from a fixpoint problem
    /// and an optional default value for all nodes.
    pub fn new(fp_context: T, default_value: Option<T::NodeValue>) -> Self {
        let graph = fp_context.get_graph();
        // Order the nodes in weak topological order.
        let priority_sorted_nodes: Vec<NodeIndex> = petgraph::algo::kosaraju_scc(&graph)
            .into_iter()
            .flatten()
            .collect();
        let mut node_to_index = BTreeMap::new();
        for (i, node_index) in priority_sorted_nodes.iter().enumerate() {
            node_to_index.insert(node_index, i);
        }
        let node_priority_list: Vec<usize> = node_to_index.values().copied().collect();
        let mut worklist = BTreeSet::new();
        // If a default value exists, all nodes are added to the worklist.
        let mut node_values: FnvHashMap<NodeIndex, T::NodeValue> = FnvHashMap::default();
        if let Some(default) = default_value {
            for i in 0..priority_sorted_nodes.len() {
                worklist.insert(i);
                node_values.insert(NodeIndex::new(i), default.clone());
            }
        }
        let node_count = priority_sorted_nodes.len();
        Computation {
            fp_context,
            node_priority_list,
            priority_to_node_list: priority_sorted_nodes,
            update_counts: vec![0; node_count],
            worklist,
            node_values,
        }
    }

    /// Get the value of a node.
    pub fn get_node_value(&self, node: NodeIndex) -> Option<&T::NodeValue> {
        self.node_values.get(&node)
    }

    /// Set the value of a node and mark the node as not yet stabilized.
    pub fn set_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        self.node_values.insert(node, value);
        self.worklist.insert(self.node_priority_list[node.index()]);
    }

    /// Combine the value at a node with some new value.
    fn merge_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        if let Some(old_value) = self.node_values.get(&node) {
            let iteration = self.update_counts[node.index()];
            let merged_value = self.fp_context.widen(old_value, &value, iteration);
            if merged_value != *old_value {
                self.update_counts[node.index()] += 1;
                self.set_node_value(node, merged_value);
            }
        } else {
            self.set_node_value(node, value);
        }
    }

    /// Compute and update the value at the end node of an edge.
    fn update_edge(&mut self, edge: EdgeIndex) {
        let (start_node, end_node) = self
            .fp_context
            .get_graph()
            .edge_endpoints(edge)
            .expect("Edge not found");
        if let Some(start_value) = self.node_values.get(&start_node) {
            if let Some(new_end_value) = self.fp_context.update_edge(start_value, edge) {
                self.merge_node_value(end_node, new_end_value);
            }
        }
    }

    /// Update all outgoing edges of a node.
    fn update_node(&mut self, node: NodeIndex) {
        let edges: Vec<EdgeIndex> = self
            .fp_context
            .get_graph()
            .edges(node)
            .map(|edge_ref| edge_ref.id())
            .collect();
        for edge in edges {
            self.update_edge(edge);
        }
    }

    /// Compute the fixpoint of the fixpoint problem.
    ///
    /// Each node will be visited at most `max_steps` times. If a node does not
    /// stabilize after `max_steps` visits, the end result will not be a
    /// fixpoint but only an intermediate result of a fixpoint computation.
    pub fn compute_with_max_steps(&mut self, max_steps: u64) {
        let mut steps = vec![0; self.fp_context.get_graph().node_count()];
        let mut non_stabilized_nodes = BTreeSet::new();
        while let Some(priority) = self.worklist.iter().next_back().cloned() {
            let priority = self.worklist.take(&priority).unwrap();
            let node = self.priority_to_node_list[priority];
            if steps[node.index()] < max_steps {
                steps[node.index()] += 1;
                self.update_node(node);
            } else {
                non_stabilized_nodes.insert(priority);
            }
        }
        // After the algorithm finished, the new worklist is the list of non-stabilized nodes.
        self.worklist = non_stabilized_nodes;
    }

    /// Compute the fixpoint of the fixpoint problem.
    ///
    /// If the fixpoint algorithm does not converge to a fixpoint,
    /// this function will not terminate.
    pub fn compute(&mut self) {
        while let Some(priority) = self.worklist.iter().next_back().cloned() {
            let priority = self.worklist.take(&priority).unwrap();
            let node = self.priority_to_node_list[priority];
            self.update_node(node);
        }
    }

    /// Get a reference to the internal map of all known node values.
    pub fn node_values(&self) -> &FnvHashMap<NodeIndex, T::NodeValue> {
        &self.node_values
    }

    /// Get a reference to the underlying graph.
    pub fn get_graph(&self) -> &DiGraph<T::NodeLabel, T::EdgeLabel> {
        self.fp_context.get_graph()
    }

    /// Get a reference to the underlying context object.
    pub fn get_context(&self) -> &T {
        &self.fp_context
    }

    /// Returns `true` if the computation has stabilized, i.e. the internal worklist is empty.
    pub fn has_stabilized(&self) -> bool {
        self.worklist.is_empty()
    }
}
