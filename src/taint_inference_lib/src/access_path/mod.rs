//! Access paths: syntactic locations of the form `root.f.g`.
//!
//! An access path consists of a [`Root`] (a formal parameter, a local
//! variable, or the special return slot) and an ordered sequence of
//! [`PathLabel`]s. Access paths are the only aliasing model of the
//! analysis: two locations are related if and only if one path is a
//! prefix of the other.

use crate::ast::{Expression, Identifier};
use crate::prelude::*;
use itertools::Itertools;

/// One step of an access path.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum PathLabel {
    /// An attribute access with a known name.
    Field(Identifier),
    /// The wildcard label matching any field.
    ///
    /// Reserved for index accesses and similar; never materialized by the
    /// current transfer functions.
    Any,
}

impl std::fmt::Display for PathLabel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathLabel::Field(name) => write!(formatter, "{name}"),
            PathLabel::Any => write!(formatter, "*"),
        }
    }
}

/// The root of an access path.
///
/// Roots partition the taint state: no aliasing between different roots is
/// modeled.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum Root {
    /// The return slot of the function under analysis.
    LocalResult,
    /// A formal parameter, identified by its 0-based position.
    Parameter {
        /// The position in the parameter list.
        position: u32,
    },
    /// A local variable (or, at function entry, a named formal parameter).
    Variable {
        /// The variable name.
        name: Identifier,
    },
}

impl std::fmt::Display for Root {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Root::LocalResult => write!(formatter, "result"),
            Root::Parameter { position } => write!(formatter, "formal({position})"),
            Root::Variable { name } => write!(formatter, "{name}"),
        }
    }
}

/// A root together with a label sequence, e.g. `x.f.g`.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct AccessPath {
    /// The path root.
    pub root: Root,
    /// The labels from the root to the designated location.
    pub path: Vec<PathLabel>,
}

impl AccessPath {
    /// Normalize an expression to the access path it denotes.
    ///
    /// Returns `Some` exactly for expressions that syntactically denote an
    /// assignable location: a variable, or a chain of attribute accesses
    /// ending in a variable. All other shapes yield `None`.
    pub fn of_expression(expression: &Expression) -> Option<AccessPath> {
        match expression {
            Expression::Identifier(name) => Some(AccessPath {
                root: Root::Variable { name: name.clone() },
                path: Vec::new(),
            }),
            Expression::Access { receiver, member } => {
                let mut access_path = Self::of_expression(receiver)?;
                access_path.path.push(PathLabel::Field(member.clone()));
                Some(access_path)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for AccessPath {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}{}",
            self.root,
            self.path.iter().map(|label| format!(".{label}")).join("")
        )
    }
}
