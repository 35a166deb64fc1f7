//! The per-function taint analysis.
//!
//! For one function definition the analysis runs two intraprocedural
//! fixpoint computations over the function's control flow graph:
//!
//! * [`run_forward`] propagates taint *sources* from callee models towards
//!   the return value and extracts which sources may flow into it.
//! * [`run_backward`] starts from the return value (seeded with the
//!   [`LocalReturn`](crate::abstract_domain::SinkKind::LocalReturn)
//!   sentinel) and propagates taint *sinks* against the control flow,
//!   extracting per-parameter sink reachability and taint-in-taint-out
//!   behavior.
//!
//! Both directions share the same recursion structure but differ in
//! interpretation; they are deliberately separate types, so confusing the
//! directions is a type error instead of a runtime error.
//!
//! Calls are resolved to [`Callable`] identities and looked up in a
//! [`ModelStore`]; a missing model triggers the default propagation policy.
//! The store is read-only during one run. An embedding interprocedural
//! driver is expected to re-run function analyses as the models of their
//! callees become available, until the whole program stabilizes.

use crate::ast::Expression;
use crate::models::{Callable, Model, ModelStore};
use crate::prelude::*;
use crate::types::{Annotation, TypeQuery};
use crate::utils::log::LogMessage;
use std::cell::RefCell;

pub mod state;

mod backward;
mod forward;

pub use backward::run_backward;
pub use forward::run_forward;

/// Callee name treated as a test sink for all of its arguments.
const TEST_SINK_INTRINSIC: &str = "__testSink";
/// Callee name treated as a remote-code-execution sink for all of its arguments.
const RCE_SINK_INTRINSIC: &str = "__testRCESink";

/// Tuning knobs of the fixpoint computation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Config {
    /// Number of value updates on a CFG node after which the precise join is
    /// replaced by widening.
    pub widening_delay: u64,
    /// Maximal depth of taint trees once widening is active. Deeper subtrees
    /// are collapsed into their ancestor at this depth.
    pub max_tree_depth: usize,
    /// Upper bound on the number of visits per CFG node. When exceeded, the
    /// current over-approximation is accepted as the result.
    pub max_fixpoint_steps: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            widening_delay: 3,
            max_tree_depth: 4,
            max_fixpoint_steps: 64,
        }
    }
}

/// Run both analysis directions and combine the results into a [`Model`].
pub fn analyze_function(
    function: &crate::ast::FunctionDefinition,
    models: &dyn ModelStore,
    types: &dyn TypeQuery,
    config: &Config,
) -> Result<(Model, Vec<LogMessage>), Error> {
    let (forward, mut logs) = run_forward(function, models, types, config)?;
    let (backward, mut backward_logs) = run_backward(function, models, config)?;
    logs.append(&mut backward_logs);
    Ok((Model { forward, backward }, logs))
}

/// Diagnostics collected during one fixpoint run.
///
/// The fixpoint engine calls the transfer functions through `&self`, so the
/// collector uses interior mutability. The first fatal error wins; transfer
/// functions stop propagating once it is set.
struct Diagnostics {
    logs: RefCell<Vec<LogMessage>>,
    failure: RefCell<Option<Error>>,
}

impl Diagnostics {
    fn new() -> Self {
        Diagnostics {
            logs: RefCell::new(Vec::new()),
            failure: RefCell::new(None),
        }
    }

    fn log(&self, message: LogMessage) {
        self.logs.borrow_mut().push(message);
    }

    fn set_failure(&self, error: Error) {
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure.borrow_mut().take()
    }

    fn take_logs(&self) -> Vec<LogMessage> {
        std::mem::take(&mut self.logs.borrow_mut())
    }
}

/// Resolve the callee expression of a call to a callable identity.
///
/// * A bare identifier names the callable directly.
/// * For `receiver.member(...)` the static type of the receiver is looked up
///   in the type store; a nominal `Primitive(P)` receiver resolves to the
///   method `P.member`. The backward analysis passes no type store, so
///   method calls stay unresolved there.
/// * All other callee shapes have no specific target.
fn resolve_call_target(
    callee: &Expression,
    caller: &Callable,
    point: ProgramPoint,
    types: Option<&dyn TypeQuery>,
) -> Option<Callable> {
    match callee {
        Expression::Identifier(name) => Some(Callable::from(name)),
        Expression::Access { receiver, member } => {
            let types = types?;
            let Expression::Identifier(receiver_name) = receiver.as_ref() else {
                return None;
            };
            match types.get_types(caller)?.resolve(point, receiver_name)? {
                Annotation::Primitive(type_name) => Some(Callable::method(type_name, member)),
                Annotation::Top => None,
            }
        }
        _ => None,
    }
}
