/*!
# taint_inference_lib

Per-function taint model inference for a Python-like intermediate representation.

For every function definition the library computes a summary [`Model`](models::Model)
consisting of two parts:

* a *forward* model describing which taint sources may flow into the function's
  return value,
* a *backward* model describing, for each formal parameter, which sinks the
  parameter may reach and which parts of the parameter flow through to the
  return value (taint-in, taint-out).

The models are the fixed-point inputs of an interprocedural analysis:
when a call is analyzed, the callee's already-computed model is read from a
[`ModelStore`](models::ModelStore) and the taint is propagated accordingly.
Ordering the functions and iterating the whole-program fixpoint is the job of
an embedding driver, not of this library.

The entry points are [`analysis::taint::run_forward`] and
[`analysis::taint::run_backward`].
*/

pub mod abstract_domain;
pub mod access_path;
pub mod analysis;
pub mod ast;
pub mod models;
pub mod types;
pub mod utils;

mod prelude {
    pub use anyhow::{anyhow, Error};
    pub use serde::{Deserialize, Serialize};

    pub use crate::access_path::{AccessPath, PathLabel, Root};
    pub use crate::analysis::graph::ProgramPoint;
    pub use crate::ast::Identifier;
}
