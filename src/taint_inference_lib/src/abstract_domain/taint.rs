//! Taint kinds and the set-of-kinds lattice element.
//!
//! There are two parallel taint domains that never mix:
//! [`ForwardTaint`] over [`SourceKind`]s and [`BackwardTaint`] over
//! [`SinkKind`]s.

use super::{AbstractDomain, HasBottom};
use crate::prelude::*;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display};

/// Marker trait for the closed kind enumerations that [`TaintSet`] ranges over.
pub trait TaintKind: Copy + Clone + Eq + Ord + Debug + Display {}

/// The kinds of taint sources.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum SourceKind {
    /// A source only used by tests.
    TestSource,
    /// Data controlled by an (untrusted) user of the program.
    UserControlled,
}

impl Display for SourceKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::TestSource => write!(formatter, "TestSource"),
            SourceKind::UserControlled => write!(formatter, "UserControlled"),
        }
    }
}

impl TaintKind for SourceKind {}

/// The kinds of taint sinks.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum SinkKind {
    /// Sentinel sink marking data that flows into the return value of the
    /// function under analysis. Only used to extract taint-in-taint-out
    /// information from the backward fixpoint, never reported as a real sink.
    LocalReturn,
    /// A sink only used by tests.
    TestSink,
    /// A sink where attacker-controlled data leads to remote code execution.
    RemoteCodeExecution,
}

impl Display for SinkKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::LocalReturn => write!(formatter, "LocalReturn"),
            SinkKind::TestSink => write!(formatter, "TestSink"),
            SinkKind::RemoteCodeExecution => write!(formatter, "RemoteCodeExecution"),
        }
    }
}

impl TaintKind for SinkKind {}

/// A finite set of taint kinds forming a powerset lattice:
/// bottom is the empty set, merge is set union and the partial order is
/// set inclusion.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Default)]
pub struct TaintSet<K: TaintKind> {
    kinds: BTreeSet<K>,
}

/// Taint elements tracked by the forward analysis.
pub type ForwardTaint = TaintSet<SourceKind>;

/// Taint elements tracked by the backward analysis.
pub type BackwardTaint = TaintSet<SinkKind>;

impl<K: TaintKind> TaintSet<K> {
    /// Create an empty taint set.
    pub fn new() -> Self {
        TaintSet {
            kinds: BTreeSet::new(),
        }
    }

    /// Create a set containing exactly the given kind.
    pub fn singleton(kind: K) -> Self {
        TaintSet {
            kinds: BTreeSet::from([kind]),
        }
    }

    /// Add a kind to the set.
    pub fn add(&mut self, kind: K) {
        self.kinds.insert(kind);
    }

    /// Check whether the given kind is contained in the set.
    pub fn contains(&self, kind: &K) -> bool {
        self.kinds.contains(kind)
    }

    /// Return the subset of kinds satisfying the predicate.
    pub fn filter(&self, predicate: impl Fn(&K) -> bool) -> Self {
        TaintSet {
            kinds: self.kinds.iter().copied().filter(predicate).collect(),
        }
    }

    /// Iterate over the contained kinds in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.kinds.iter()
    }
}

impl<K: TaintKind> AbstractDomain for TaintSet<K> {
    /// The union of both kind sets.
    fn merge(&self, other: &Self) -> Self {
        TaintSet {
            kinds: self.kinds.union(&other.kinds).copied().collect(),
        }
    }

    /// Set inclusion.
    fn less_or_equal(&self, other: &Self) -> bool {
        self.kinds.is_subset(&other.kinds)
    }

    /// The empty set carries no taint.
    fn is_bottom(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl<K: TaintKind> HasBottom for TaintSet<K> {
    fn bottom() -> Self {
        TaintSet::new()
    }
}

impl<K: TaintKind> Display for TaintSet<K> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{{{}}}", self.kinds.iter().join(", "))
    }
}
