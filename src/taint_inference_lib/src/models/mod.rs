//! Function summary models and the store they live in.
//!
//! A [`Model`] is the per-function result of the analysis: the forward part
//! records which sources flow into the return value, the backward part
//! records per-parameter sink flows and taint-in-taint-out behavior.
//! During the analysis of a call the callee's model is looked up in a
//! [`ModelStore`]; the store is read-only from the point of view of one
//! function analysis, updating it between iterations is the job of the
//! interprocedural driver.

use crate::abstract_domain::{SinkKind, SourceKind};
use crate::analysis::taint::state::State;
use crate::prelude::*;
use std::collections::BTreeMap;

/// The opaque identity of a callable, derived from its fully-qualified name.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Callable(String);

impl Callable {
    /// Create a callable identity from a fully-qualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Callable(name.into())
    }

    /// The identity of the method `member` of the nominal type `type_name`.
    pub fn method(type_name: &Identifier, member: &Identifier) -> Self {
        Callable(format!("{type_name}.{member}"))
    }

    /// The fully-qualified name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Identifier> for Callable {
    fn from(name: &Identifier) -> Self {
        Callable(name.as_str().to_string())
    }
}

impl std::fmt::Display for Callable {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// The result of the forward (source) analysis of one function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct ForwardModel {
    /// Sources that may flow into the return value,
    /// stored under the [`Root::LocalResult`] root.
    pub source_taint: State<SourceKind>,
}

/// The result of the backward (sink) analysis of one function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct BackwardModel {
    /// Sinks reachable from each formal parameter,
    /// stored under [`Root::Parameter`] roots.
    pub sink_taint: State<SinkKind>,
    /// The parts of each formal parameter that flow through to the return
    /// value, marked with the [`SinkKind::LocalReturn`] sentinel and stored
    /// under [`Root::Parameter`] roots.
    pub taint_in_taint_out: State<SinkKind>,
}

/// The complete summary model of one function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Model {
    /// The forward (source) part.
    pub forward: ForwardModel,
    /// The backward (sink and taint-in-taint-out) part.
    pub backward: BackwardModel,
}

impl std::fmt::Display for Model {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(formatter, "source_taint: {}", self.forward.source_taint)?;
        writeln!(formatter, "sink_taint: {}", self.backward.sink_taint)?;
        write!(
            formatter,
            "taint_in_taint_out: {}",
            self.backward.taint_in_taint_out
        )
    }
}

/// Read access to the models computed so far.
pub trait ModelStore {
    /// Get the current model of the given callable, if one is known.
    fn get_model(&self, callable: &Callable) -> Option<&Model>;
}

/// An in-memory model store.
///
/// Used by tests and by embedding drivers that iterate the interprocedural
/// fixpoint in one process.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct ModelDatabase {
    models: BTreeMap<Callable, Model>,
}

impl ModelDatabase {
    /// Create an empty model store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the model of a callable.
    pub fn insert(&mut self, callable: Callable, model: Model) {
        self.models.insert(callable, model);
    }

    /// The number of stored models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check whether the store contains no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelStore for ModelDatabase {
    fn get_model(&self, callable: &Callable) -> Option<&Model> {
        self.models.get(callable)
    }
}
