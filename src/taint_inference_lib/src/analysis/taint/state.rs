//! Property space of the taint analysis.
//!
//! Instances of the [`State`] type map access-path roots to taint trees and
//! represent the taint knowledge at a certain point in the analyzed function.
//! A root that is not present in the map carries the bottom tree. The state
//! forms an abstract domain by lifting the tree lattice pointwise.

use crate::abstract_domain::{AbstractDomain, TaintKind, TaintSet, TaintTree};
use crate::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The tree type stored per root.
pub type StateTree<K> = TaintTree<TaintSet<K>>;

/// The taint state of one function at one program point.
///
/// The map is wrapped into an `Arc` to make the frequent clones inside the
/// fixpoint computation cheap; mutation goes through `Arc::make_mut`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct State<K: TaintKind> {
    trees: Arc<BTreeMap<Root, StateTree<K>>>,
}

impl<K: TaintKind> Default for State<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TaintKind> State<K> {
    /// Returns an empty state.
    pub fn new() -> Self {
        State {
            trees: Arc::new(BTreeMap::new()),
        }
    }

    /// Read the taint tree at the given root and path.
    ///
    /// Taint accumulated on ancestors of the path is collapsed onto the root
    /// of the returned tree. Missing roots read as the empty tree.
    pub fn read(&self, root: &Root, path: &[PathLabel]) -> StateTree<K> {
        match self.trees.get(root) {
            Some(tree) => tree.read(path),
            None => TaintTree::empty(),
        }
    }

    /// Replace the subtree at the given root and path (strong update).
    pub fn assign(&mut self, root: Root, path: &[PathLabel], subtree: StateTree<K>) {
        let trees = Arc::make_mut(&mut self.trees);
        let mut tree = trees.remove(&root).unwrap_or_else(TaintTree::empty);
        tree.assign(path, subtree);
        if !tree.is_empty() {
            trees.insert(root, tree);
        }
    }

    /// Join the subtree into the tree at the given root and path (weak update).
    pub fn assign_weak(&mut self, root: Root, path: &[PathLabel], subtree: StateTree<K>) {
        if subtree.is_empty() {
            return;
        }
        let trees = Arc::make_mut(&mut self.trees);
        let mut tree = trees.remove(&root).unwrap_or_else(TaintTree::empty);
        tree.assign_weak(path, subtree);
        if !tree.is_empty() {
            trees.insert(root, tree);
        }
    }

    /// Join with `other` and bound all trees to the given depth.
    pub fn widen(&self, other: &Self, max_tree_depth: usize) -> Self {
        let mut trees = (*self.trees).clone();
        for (root, other_tree) in other.trees.iter() {
            trees
                .entry(root.clone())
                .and_modify(|tree| *tree = tree.widen(other_tree, max_tree_depth))
                .or_insert_with(|| other_tree.widen(&TaintTree::empty(), max_tree_depth));
        }
        for tree in trees.values_mut() {
            *tree = tree.widen(&TaintTree::empty(), max_tree_depth);
        }
        State {
            trees: Arc::new(trees),
        }
    }

    /// Check whether the state carries no taint at all.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Iterate over the roots carrying taint and their trees.
    pub fn iter(&self) -> impl Iterator<Item = (&Root, &StateTree<K>)> {
        self.trees.iter()
    }

    /// Get a more compact json-representation of the state.
    /// Intended for pretty printing, not useable for serialization/deserialization.
    pub fn to_json_compact(&self) -> serde_json::Value {
        let state_map = self
            .trees
            .iter()
            .map(|(root, tree)| {
                (
                    root.to_string(),
                    serde_json::Value::String(format!("{tree}").trim_end().to_string()),
                )
            })
            .collect();
        serde_json::Value::Object(state_map)
    }
}

impl<K: TaintKind> AbstractDomain for State<K> {
    /// Merge two states. Taint present in at least one input state
    /// is also present in the merged state.
    fn merge(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        let mut trees = (*self.trees).clone();
        for (root, other_tree) in other.trees.iter() {
            trees
                .entry(root.clone())
                .and_modify(|tree| *tree = tree.merge(other_tree))
                .or_insert_with(|| other_tree.clone());
        }
        State {
            trees: Arc::new(trees),
        }
    }

    /// Pointwise comparison of the trees of all roots.
    fn less_or_equal(&self, other: &Self) -> bool {
        self.trees.iter().all(|(root, tree)| {
            match other.trees.get(root) {
                Some(other_tree) => tree.less_or_equal(other_tree),
                None => tree.is_empty(),
            }
        })
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }
}

impl<K: TaintKind> std::fmt::Display for State<K> {
    /// Print one line per taint-carrying node of every root,
    /// e.g. `x.f -> {TestSink}`.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.trees.is_empty() {
            return write!(formatter, "{{}}");
        }
        writeln!(formatter)?;
        for (root, tree) in self.trees.iter() {
            for line in format!("{tree}").lines() {
                writeln!(formatter, "  {root}{line}")?;
            }
        }
        Ok(())
    }
}
