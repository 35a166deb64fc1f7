//! The type-resolution store.
//!
//! Method calls `r.m(...)` can only be resolved to a callable if the static
//! type of the receiver `r` is known. The types are computed by an external
//! type checker; this module defines the read-only interface through which
//! the forward analysis queries them, plus an in-memory implementation.

use crate::models::Callable;
use crate::prelude::*;
use std::collections::BTreeMap;

/// The static type of an expression as far as the analysis cares about it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum Annotation {
    /// A nominal class type. Method calls on receivers of this type resolve
    /// to `TypeName.method`.
    Primitive(Identifier),
    /// An unknown or non-nominal type. Calls on such receivers stay
    /// unresolved.
    Top,
}

/// The type annotations known for one function,
/// keyed by program point and receiver name.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct FunctionTypes {
    annotations: BTreeMap<ProgramPoint, BTreeMap<Identifier, Annotation>>,
}

impl FunctionTypes {
    /// Create an empty annotation map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the type of `name` at the given program point.
    pub fn insert(&mut self, point: ProgramPoint, name: Identifier, annotation: Annotation) {
        self.annotations
            .entry(point)
            .or_default()
            .insert(name, annotation);
    }

    /// Look up the type of `name` at the given program point.
    pub fn resolve(&self, point: ProgramPoint, name: &Identifier) -> Option<&Annotation> {
        self.annotations.get(&point)?.get(name)
    }
}

/// Read access to the type annotations of analyzed functions.
pub trait TypeQuery {
    /// Get the annotations of the given function, if the type checker
    /// produced any.
    fn get_types(&self, function: &Callable) -> Option<&FunctionTypes>;
}

/// An in-memory type store.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct TypeDatabase {
    functions: BTreeMap<Callable, FunctionTypes>,
}

impl TypeDatabase {
    /// Create an empty type store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the type of `name` at a program point of `function`.
    pub fn insert(
        &mut self,
        function: Callable,
        point: ProgramPoint,
        name: Identifier,
        annotation: Annotation,
    ) {
        self.functions
            .entry(function)
            .or_default()
            .insert(point, name, annotation);
    }
}

impl TypeQuery for TypeDatabase {
    fn get_types(&self, function: &Callable) -> Option<&FunctionTypes> {
        self.functions.get(function)
    }
}
