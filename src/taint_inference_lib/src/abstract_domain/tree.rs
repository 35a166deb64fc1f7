//! The access-path tree domain.
//!
//! A [`TaintTree`] maps access paths to taint elements: it is a prefix tree
//! whose nodes each carry an element of the underlying domain. The taint
//! associated with a path `p` is the join of the elements stored on every
//! node along `p`, so taint on `x` also covers `x.f` without being
//! materialized there.

use super::{AbstractDomain, HasBottom};
use crate::prelude::*;
use std::collections::BTreeMap;

/// A prefix tree of taint elements indexed by path labels.
///
/// Empty subtrees are pruned eagerly, so two trees describing the same taint
/// are structurally equal. A node's element is bottom if and only if no taint
/// is associated exactly at that path (taint may still be inherited from
/// ancestors).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TaintTree<E> {
    element: E,
    children: BTreeMap<PathLabel, TaintTree<E>>,
}

impl<E: AbstractDomain + HasBottom> Default for TaintTree<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<E: AbstractDomain + HasBottom> TaintTree<E> {
    /// Create the bottom tree carrying no taint at all.
    pub fn empty() -> Self {
        TaintTree {
            element: E::bottom(),
            children: BTreeMap::new(),
        }
    }

    /// Create a tree carrying the given element at its root and nothing else.
    pub fn make_leaf(element: E) -> Self {
        TaintTree {
            element,
            children: BTreeMap::new(),
        }
    }

    /// Create a tree that carries `subtree` under the given path prefix.
    pub fn with_prefix(path: &[PathLabel], subtree: Self) -> Self {
        let mut tree = Self::empty();
        tree.assign(path, subtree);
        tree
    }

    /// The element stored at the root node.
    pub fn root_element(&self) -> &E {
        &self.element
    }

    /// Check whether the tree carries no taint.
    pub fn is_empty(&self) -> bool {
        self.element.is_bottom() && self.children.is_empty()
    }

    /// Return the subtree rooted at `path`.
    ///
    /// Taint accumulated on the ancestors of `path` is collapsed onto the
    /// root of the returned tree, so the root element of the result is the
    /// total taint associated with `path`.
    pub fn read(&self, path: &[PathLabel]) -> Self {
        let mut node = self;
        let mut accumulated = E::bottom();
        for label in path {
            accumulated = accumulated.merge(&node.element);
            match node.children.get(label) {
                Some(child) => node = child,
                None => return Self::make_leaf(accumulated),
            }
        }
        let mut result = node.clone();
        result.element = result.element.merge(&accumulated);
        result
    }

    /// Replace the subtree at `path` with `subtree` (strong update).
    ///
    /// Everything previously stored at or below `path` is discarded.
    /// Intermediate nodes are created as needed; assigning an empty subtree
    /// removes the branch.
    pub fn assign(&mut self, path: &[PathLabel], subtree: Self) {
        match path.split_first() {
            None => *self = subtree,
            Some((label, rest)) => {
                let mut child = self.children.remove(label).unwrap_or_else(Self::empty);
                child.assign(rest, subtree);
                if !child.is_empty() {
                    self.children.insert(label.clone(), child);
                }
            }
        }
    }

    /// Join `subtree` into the subtree at `path` (weak update).
    pub fn assign_weak(&mut self, path: &[PathLabel], subtree: Self) {
        match path.split_first() {
            None => *self = self.merge(&subtree),
            Some((label, rest)) => {
                let mut child = self.children.remove(label).unwrap_or_else(Self::empty);
                child.assign_weak(rest, subtree);
                if !child.is_empty() {
                    self.children.insert(label.clone(), child);
                }
            }
        }
    }

    /// Join all elements of the tree into a single element.
    pub fn collapse(&self) -> E {
        self.children
            .values()
            .fold(self.element.clone(), |accumulated, child| {
                accumulated.merge(&child.collapse())
            })
    }

    /// Apply `transform` to the element of every node carrying taint.
    ///
    /// Nodes whose element is bottom are left untouched; branches that end up
    /// without taint are pruned.
    pub fn filter_map(&self, transform: &impl Fn(&E) -> E) -> Self {
        let element = if self.element.is_bottom() {
            E::bottom()
        } else {
            transform(&self.element)
        };
        let children = self
            .children
            .iter()
            .map(|(label, child)| (label.clone(), child.filter_map(transform)))
            .filter(|(_, child)| !child.is_empty())
            .collect();
        TaintTree { element, children }
    }

    /// Join with `other` and bound the result to the given depth.
    ///
    /// All nodes below `max_depth` are collapsed into their depth-`max_depth`
    /// ancestor. Applying the operation twice yields the same tree, so the
    /// fixpoint computation terminates once the depth bound is active.
    pub fn widen(&self, other: &Self, max_depth: usize) -> Self {
        let mut widened = self.merge(other);
        widened.collapse_deeper_than(max_depth);
        widened
    }

    /// Collapse all subtrees below the given depth into their ancestor node.
    fn collapse_deeper_than(&mut self, depth: usize) {
        if depth == 0 {
            *self = Self::make_leaf(self.collapse());
        } else {
            for child in self.children.values_mut() {
                child.collapse_deeper_than(depth - 1);
            }
        }
    }

    /// Helper for the partial order check.
    ///
    /// `ancestor_taint` is the taint that `other` inherits from its ancestors
    /// at the current position. Checking each node of `self` against the
    /// accumulated taint of `other` at the same position suffices, since
    /// inherited taint only grows along a path.
    fn less_or_equal_with(&self, other: &Self, ancestor_taint: &E) -> bool {
        let other_taint = other.element.merge(ancestor_taint);
        if !self.element.less_or_equal(&other_taint) {
            return false;
        }
        self.children.iter().all(|(label, child)| {
            match other.children.get(label) {
                Some(other_child) => child.less_or_equal_with(other_child, &other_taint),
                // `other` has no node here, so the whole subtree of `self`
                // must be covered by the taint `other` inherits downwards.
                None => child.collapse().less_or_equal(&other_taint),
            }
        })
    }
}

impl<E: AbstractDomain + HasBottom> AbstractDomain for TaintTree<E> {
    /// Merge two trees by joining their elements pointwise.
    fn merge(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        let element = self.element.merge(&other.element);
        let mut children = self.children.clone();
        for (label, other_child) in &other.children {
            children
                .entry(label.clone())
                .and_modify(|child| *child = child.merge(other_child))
                .or_insert_with(|| other_child.clone());
        }
        TaintTree { element, children }
    }

    /// `self` is covered by `other` if for every path the taint of `self`
    /// is included in the taint of `other`.
    fn less_or_equal(&self, other: &Self) -> bool {
        self.less_or_equal_with(other, &E::bottom())
    }

    fn is_bottom(&self) -> bool {
        self.is_empty()
    }
}

impl<E: AbstractDomain + HasBottom> HasBottom for TaintTree<E> {
    fn bottom() -> Self {
        Self::empty()
    }
}

impl<E: AbstractDomain + HasBottom + std::fmt::Display> TaintTree<E> {
    fn fmt_subtree(
        &self,
        formatter: &mut std::fmt::Formatter<'_>,
        prefix: &str,
    ) -> std::fmt::Result {
        if !self.element.is_bottom() {
            writeln!(formatter, "{prefix} -> {}", self.element)?;
        }
        for (label, child) in &self.children {
            child.fmt_subtree(formatter, &format!("{prefix}.{label}"))?;
        }
        Ok(())
    }
}

impl<E: AbstractDomain + HasBottom + std::fmt::Display> std::fmt::Display for TaintTree<E> {
    /// Print one line per taint-carrying node, e.g. `.f.g -> {TestSink}`.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_subtree(formatter, "")
    }
}
