//! The backward (sink) taint analysis.
//!
//! The state maps each location to the sinks it may reach. The computation
//! runs against the control flow: it is seeded at the function exit with the
//! [`SinkKind::LocalReturn`] sentinel on the return slot and transfers the
//! state of a block's successors through the block's statements in reverse
//! order. The state at the function entry then describes, for every formal
//! parameter, which sinks it reaches and which parts of it flow into the
//! return value.

use super::state::{State, StateTree};
use super::{
    resolve_call_target, Config, Diagnostics, RCE_SINK_INTRINSIC, TEST_SINK_INTRINSIC,
};
use crate::abstract_domain::{AbstractDomain, SinkKind, TaintSet, TaintTree};
use crate::analysis::fixpoint::{self, Computation};
use crate::analysis::graph::{Block, Cfg, Graph};
use crate::ast::{Expression, FunctionDefinition, Statement};
use crate::models::{BackwardModel, Callable, ModelStore};
use crate::prelude::*;
use crate::types::TypeQuery;
use crate::utils::log::LogMessage;
use petgraph::graph::EdgeIndex;

/// Run the backward analysis of one function and extract its backward model.
///
/// Returns the model together with the diagnostics collected along the way.
/// Fails if the function body contains a nested function definition.
pub fn run_backward(
    function: &FunctionDefinition,
    models: &dyn ModelStore,
    config: &Config,
) -> Result<(BackwardModel, Vec<LogMessage>), Error> {
    let cfg = Cfg::new(function);
    let context = BackwardTaintContext {
        reversed_graph: cfg.reversed_graph(),
        function: Callable::from(&function.name),
        models,
        config,
        diagnostics: Diagnostics::new(),
    };
    let mut computation = Computation::new(context, None);
    let mut initial_state = State::new();
    initial_state.assign(
        Root::LocalResult,
        &[],
        TaintTree::make_leaf(TaintSet::singleton(SinkKind::LocalReturn)),
    );
    // The function exit is the entry of the reversed graph.
    computation.set_node_value(cfg.exit(), initial_state);
    computation.compute_with_max_steps(config.max_fixpoint_steps);

    let context = computation.get_context();
    if let Some(error) = context.diagnostics.take_failure() {
        return Err(error);
    }
    if !computation.has_stabilized() {
        context.diagnostics.log(
            LogMessage::new_info(
                "fixpoint did not stabilize within the step bound, \
                 accepting the current over-approximation",
            )
            .source("BackwardTaint"),
        );
    }

    let entry_state = computation
        .get_node_value(cfg.entry())
        .cloned()
        .unwrap_or_default();
    Ok((
        extract_model(function, &entry_state),
        context.diagnostics.take_logs(),
    ))
}

/// Project the entry state onto the formal parameters and split it into
/// sink taint and taint-in-taint-out along the [`SinkKind::LocalReturn`]
/// sentinel.
fn extract_model(function: &FunctionDefinition, entry_state: &State<SinkKind>) -> BackwardModel {
    let mut sink_taint = State::new();
    let mut taint_in_taint_out = State::new();
    for (index, parameter) in function.parameters.iter().enumerate() {
        let position = index as u32;
        let tree = entry_state.read(
            &Root::Variable {
                name: parameter.name.clone(),
            },
            &[],
        );
        let tito_tree = tree.filter_map(&|element: &TaintSet<SinkKind>| {
            element.filter(|kind| *kind == SinkKind::LocalReturn)
        });
        let sinks_tree = tree.filter_map(&|element: &TaintSet<SinkKind>| {
            element.filter(|kind| *kind != SinkKind::LocalReturn)
        });
        if !tito_tree.is_empty() {
            taint_in_taint_out.assign(Root::Parameter { position }, &[], tito_tree);
        }
        if !sinks_tree.is_empty() {
            sink_taint.assign(Root::Parameter { position }, &[], sinks_tree);
        }
    }
    BackwardModel {
        sink_taint,
        taint_in_taint_out,
    }
}

/// The transfer context of the backward analysis.
///
/// Holds the reversed control flow graph, so the generic fixpoint engine can
/// run it like a forward problem: the value at a node is the taint state at
/// the end of the block, transferred from the block's successors.
struct BackwardTaintContext<'a> {
    reversed_graph: Graph<'a>,
    function: Callable,
    models: &'a dyn ModelStore,
    config: &'a Config,
    diagnostics: Diagnostics,
}

impl<'a> fixpoint::Context for BackwardTaintContext<'a> {
    type EdgeLabel = ();
    type NodeLabel = Block<'a>;
    type NodeValue = State<SinkKind>;

    fn get_graph(&self) -> &petgraph::graph::DiGraph<Block<'a>, ()> {
        &self.reversed_graph
    }

    fn merge(&self, state1: &Self::NodeValue, state2: &Self::NodeValue) -> Self::NodeValue {
        state1.merge(state2)
    }

    fn widen(
        &self,
        old_state: &Self::NodeValue,
        new_state: &Self::NodeValue,
        iteration: u64,
    ) -> Self::NodeValue {
        if iteration < self.config.widening_delay {
            old_state.merge(new_state)
        } else {
            old_state.widen(new_state, self.config.max_tree_depth)
        }
    }

    /// Transfer the state after the edge's source block backwards through
    /// the statements of that block.
    fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue> {
        let (start, _end) = self
            .reversed_graph
            .edge_endpoints(edge)
            .expect("Edge not found");
        let mut state = value.clone();
        for (point, statement) in self.reversed_graph[start].statements().iter().rev() {
            match self.update_statement(state, *point, statement) {
                Ok(new_state) => state = new_state,
                Err(error) => {
                    self.diagnostics.set_failure(error);
                    return None;
                }
            }
        }
        Some(state)
    }
}

impl<'a> BackwardTaintContext<'a> {
    /// The transfer function for a single statement,
    /// from successor-state to predecessor-state.
    fn update_statement(
        &self,
        state: State<SinkKind>,
        point: ProgramPoint,
        statement: &Statement,
    ) -> Result<State<SinkKind>, Error> {
        match statement {
            Statement::Assign { target, value } => {
                let taint = match AccessPath::of_expression(target) {
                    Some(access_path) => state.read(&access_path.root, &access_path.path),
                    None => {
                        self.diagnostics.log(
                            LogMessage::new_debug(
                                "assignment target is not an access path, assignment dropped",
                            )
                            .location(point)
                            .source("BackwardTaint"),
                        );
                        TaintTree::empty()
                    }
                };
                Ok(self.analyze_expression(taint, value, state, point))
            }
            Statement::Return(Some(expression)) => {
                let taint = state.read(&Root::LocalResult, &[]);
                Ok(self.analyze_expression(taint, expression, state, point))
            }
            // Still visited to collect the sinks of side-effectful calls.
            Statement::Expression(expression) => {
                Ok(self.analyze_expression(TaintTree::empty(), expression, state, point))
            }
            Statement::Define(definition) => Err(anyhow!(
                "nested function definitions are not supported: {}",
                definition.name
            )),
            Statement::Assert(_)
            | Statement::Break
            | Statement::Class { .. }
            | Statement::Continue
            | Statement::Delete(_)
            | Statement::For { .. }
            | Statement::Global(_)
            | Statement::If { .. }
            | Statement::Import { .. }
            | Statement::Nonlocal(_)
            | Statement::Pass
            | Statement::Raise(_)
            | Statement::Return(None)
            | Statement::Try { .. }
            | Statement::While { .. }
            | Statement::With { .. }
            | Statement::Yield(_)
            | Statement::YieldFrom(_) => Ok(state),
        }
    }

    /// Propagate the taint flowing into an expression onto the locations the
    /// expression reads from.
    ///
    /// Expression shapes without an arm of their own do not propagate taint
    /// in this iteration of the analysis; this is a deliberate
    /// under-approximation.
    fn analyze_expression(
        &self,
        taint: StateTree<SinkKind>,
        expression: &Expression,
        state: State<SinkKind>,
        point: ProgramPoint,
    ) -> State<SinkKind> {
        match expression {
            Expression::Identifier(name) => {
                let mut state = state;
                state.assign_weak(Root::Variable { name: name.clone() }, &[], taint);
                state
            }
            Expression::Access { receiver, member } => {
                let wrapped =
                    TaintTree::with_prefix(&[PathLabel::Field(member.clone())], taint);
                self.analyze_expression(wrapped, receiver, state, point)
            }
            Expression::Call { callee, arguments } => {
                self.analyze_call(taint, callee, arguments, state, point)
            }
            Expression::Literal(_)
            | Expression::Tuple(_)
            | Expression::List(_)
            | Expression::Set(_)
            | Expression::Dictionary(_)
            | Expression::Comparison { .. }
            | Expression::BooleanOperation { .. }
            | Expression::UnaryOperation(_)
            | Expression::BinaryOperation { .. }
            | Expression::Ternary { .. }
            | Expression::Await(_)
            | Expression::Yield(_)
            | Expression::Starred(_)
            | Expression::Lambda { .. }
            | Expression::Comprehension(_)
            | Expression::Ellipsis => state,
        }
    }

    /// Propagate the taint flowing into a call onto its arguments.
    ///
    /// With a known callee model every argument receives the model's sink
    /// taint for its position plus the taint-in-taint-out tree with its
    /// shape refilled by the (collapsed) incoming call taint. Without a
    /// model every argument receives the incoming call taint unchanged.
    fn analyze_call(
        &self,
        taint: StateTree<SinkKind>,
        callee: &Expression,
        arguments: &[Expression],
        state: State<SinkKind>,
        point: ProgramPoint,
    ) -> State<SinkKind> {
        // The sink intrinsics turn all of their arguments into sinks.
        if let Expression::Identifier(name) = callee {
            let intrinsic_sink = match name.as_str() {
                TEST_SINK_INTRINSIC => Some(SinkKind::TestSink),
                RCE_SINK_INTRINSIC => Some(SinkKind::RemoteCodeExecution),
                _ => None,
            };
            if let Some(kind) = intrinsic_sink {
                let sink_taint = TaintTree::make_leaf(TaintSet::singleton(kind));
                let mut state = state;
                for argument in arguments {
                    state = self.analyze_expression(sink_taint.clone(), argument, state, point);
                }
                return state;
            }
        }

        let target = resolve_call_target(callee, &self.function, point, None::<&dyn TypeQuery>);
        let model = match &target {
            Some(callable) => {
                let model = self.models.get_model(callable);
                if model.is_none() {
                    self.diagnostics.log(
                        LogMessage::new_debug(format!(
                            "no model for {callable}, propagating the call taint to all arguments"
                        ))
                        .location(point)
                        .source("BackwardTaint"),
                    );
                }
                model
            }
            None => {
                self.diagnostics.log(
                    LogMessage::new_debug("call target could not be resolved")
                        .location(point)
                        .source("BackwardTaint"),
                );
                None
            }
        };

        let mut state = state;
        match model {
            Some(model) => {
                let collapsed_call_taint = taint.collapse();
                for (index, argument) in arguments.iter().enumerate() {
                    let parameter = Root::Parameter {
                        position: index as u32,
                    };
                    let sink_tree = model.backward.sink_taint.read(&parameter, &[]);
                    let tito_tree = model
                        .backward
                        .taint_in_taint_out
                        .read(&parameter, &[])
                        .filter_map(&|_: &TaintSet<SinkKind>| collapsed_call_taint.clone());
                    let argument_taint = sink_tree.merge(&tito_tree);
                    state = self.analyze_expression(argument_taint, argument, state, point);
                }
            }
            None => {
                for argument in arguments {
                    state = self.analyze_expression(taint.clone(), argument, state, point);
                }
            }
        }
        // The receiver of a method call is tainted like the call result;
        // the taint does not descend under the method name.
        if let Expression::Access { receiver, .. } = callee {
            state = self.analyze_expression(taint, receiver, state, point);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        assign, call_name, expr_stmt, field, function, int, ret, var, Statement,
    };
    use crate::models::{Model, ModelDatabase};

    fn run(function: &FunctionDefinition, models: &ModelDatabase) -> BackwardModel {
        let (model, _logs) = run_backward(function, models, &Config::default()).unwrap();
        model
    }

    fn parameter(position: u32) -> Root {
        Root::Parameter { position }
    }

    #[test]
    fn sink_on_a_parameter() {
        // def f(x, y): __testSink(x)
        let function = function(
            "f",
            &["x", "y"],
            vec![expr_stmt(call_name("__testSink", vec![var("x")]))],
        );
        let model = run(&function, &ModelDatabase::new());

        assert!(model
            .sink_taint
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::TestSink));
        assert!(model.sink_taint.read(&parameter(1), &[]).is_empty());
        assert!(model.taint_in_taint_out.is_empty());
    }

    #[test]
    fn rce_sink_through_a_field_access() {
        // def f(p): __testRCESink(p.q)
        let function = function(
            "f",
            &["p"],
            vec![expr_stmt(call_name(
                "__testRCESink",
                vec![field(var("p"), "q")],
            ))],
        );
        let model = run(&function, &ModelDatabase::new());

        let tree = model.sink_taint.read(&parameter(0), &[]);
        assert!(tree.root_element().is_bottom());
        assert!(tree
            .read(&[PathLabel::Field("q".into())])
            .root_element()
            .contains(&SinkKind::RemoteCodeExecution));
    }

    #[test]
    fn direct_taint_in_taint_out() {
        // def f(a, b): return a
        let function = function("f", &["a", "b"], vec![ret(var("a"))]);
        let model = run(&function, &ModelDatabase::new());

        assert!(model
            .taint_in_taint_out
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::LocalReturn));
        assert!(model.taint_in_taint_out.read(&parameter(1), &[]).is_empty());
        assert!(model.sink_taint.is_empty());
    }

    #[test]
    fn taint_in_taint_out_through_a_field() {
        // def f(a): return a.x
        let function = function("f", &["a"], vec![ret(field(var("a"), "x"))]);
        let model = run(&function, &ModelDatabase::new());

        let tree = model.taint_in_taint_out.read(&parameter(0), &[]);
        assert!(tree.root_element().is_bottom());
        assert!(tree
            .read(&[PathLabel::Field("x".into())])
            .root_element()
            .contains(&SinkKind::LocalReturn));
    }

    #[test]
    fn unknown_callees_propagate_the_call_taint_to_all_arguments() {
        // def h(x): __testSink(unknown(x))
        let function = function(
            "h",
            &["x"],
            vec![expr_stmt(call_name(
                "__testSink",
                vec![call_name("unknown", vec![var("x")])],
            ))],
        );
        let (model, logs) = run_backward(&function, &ModelDatabase::new(), &Config::default())
            .unwrap();

        assert!(model
            .sink_taint
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::TestSink));
        assert!(logs.iter().any(|message| message.text.contains("unknown")));
    }

    #[test]
    fn known_callees_apply_their_sink_model() {
        // helper's model: parameter 0 flows into a test sink.
        let mut models = ModelDatabase::new();
        let mut helper = Model::default();
        helper.backward.sink_taint.assign(
            parameter(0),
            &[],
            TaintTree::make_leaf(TaintSet::singleton(SinkKind::TestSink)),
        );
        models.insert(Callable::new("helper"), helper);

        // def f(x, y): helper(x)
        let function = function(
            "f",
            &["x", "y"],
            vec![expr_stmt(call_name("helper", vec![var("x")]))],
        );
        let model = run(&function, &models);

        assert!(model
            .sink_taint
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::TestSink));
        assert!(model.sink_taint.read(&parameter(1), &[]).is_empty());
    }

    #[test]
    fn known_callees_apply_their_taint_in_taint_out_model() {
        // identity's model: parameter 0 flows through to the return value.
        let mut models = ModelDatabase::new();
        let mut identity = Model::default();
        identity.backward.taint_in_taint_out.assign(
            parameter(0),
            &[],
            TaintTree::make_leaf(TaintSet::singleton(SinkKind::LocalReturn)),
        );
        models.insert(Callable::new("identity"), identity);

        // def f(x): return identity(x)
        let function = function(
            "f",
            &["x"],
            vec![ret(call_name("identity", vec![var("x")]))],
        );
        let model = run(&function, &models);

        // The incoming LocalReturn taint flows through the callee's
        // taint-in-taint-out tree onto the argument.
        assert!(model
            .taint_in_taint_out
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::LocalReturn));
        assert!(model.sink_taint.is_empty());
    }

    #[test]
    fn assignments_propagate_target_taint_to_the_value() {
        // def f(a): b = a; return b
        let function = function(
            "f",
            &["a"],
            vec![assign(var("b"), var("a")), ret(var("b"))],
        );
        let model = run(&function, &ModelDatabase::new());

        assert!(model
            .taint_in_taint_out
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::LocalReturn));
    }

    #[test]
    fn field_reads_narrow_the_taint_to_a_sub_path() {
        // def f(a): x = a.y; return x
        let function = function(
            "f",
            &["a"],
            vec![assign(var("x"), field(var("a"), "y")), ret(var("x"))],
        );
        let model = run(&function, &ModelDatabase::new());

        let tree = model.taint_in_taint_out.read(&parameter(0), &[]);
        assert!(tree.root_element().is_bottom());
        assert!(tree
            .read(&[PathLabel::Field("y".into())])
            .root_element()
            .contains(&SinkKind::LocalReturn));
    }

    #[test]
    fn field_writes_pick_up_the_taint_of_their_path() {
        // def f(a): x.q = a; __testSink(x.q)
        let function = function(
            "f",
            &["a"],
            vec![
                assign(field(var("x"), "q"), var("a")),
                expr_stmt(call_name("__testSink", vec![field(var("x"), "q")])),
            ],
        );
        let model = run(&function, &ModelDatabase::new());

        // The sink taint of `x.q` flows backwards through the assignment
        // onto the parameter.
        assert!(model
            .sink_taint
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::TestSink));
    }

    #[test]
    fn sinks_and_taint_in_taint_out_partition_the_entry_state() {
        // def f(x): __testSink(x); return x
        let function = function(
            "f",
            &["x"],
            vec![
                expr_stmt(call_name("__testSink", vec![var("x")])),
                ret(var("x")),
            ],
        );
        let model = run(&function, &ModelDatabase::new());

        let sinks = model.sink_taint.read(&parameter(0), &[]);
        let tito = model.taint_in_taint_out.read(&parameter(0), &[]);
        // Sink taint never contains the sentinel, taint-in-taint-out
        // contains nothing but the sentinel.
        assert!(sinks.root_element().contains(&SinkKind::TestSink));
        assert!(!sinks.root_element().contains(&SinkKind::LocalReturn));
        assert!(tito.root_element().contains(&SinkKind::LocalReturn));
        // Rejoining both parts restores the full entry taint of the parameter.
        let mut expected = TaintSet::singleton(SinkKind::LocalReturn);
        expected.add(SinkKind::TestSink);
        assert_eq!(tito.root_element().merge(sinks.root_element()), expected);
    }

    #[test]
    fn branches_join_their_sinks() {
        // def f(x):
        //     if c: __testSink(x)
        //     else: __testRCESink(x)
        let function = function(
            "f",
            &["x"],
            vec![Statement::If {
                condition: var("c"),
                body: vec![expr_stmt(call_name("__testSink", vec![var("x")]))],
                orelse: vec![expr_stmt(call_name("__testRCESink", vec![var("x")]))],
            }],
        );
        let model = run(&function, &ModelDatabase::new());

        let sinks = model.sink_taint.read(&parameter(0), &[]);
        assert!(sinks.root_element().contains(&SinkKind::TestSink));
        assert!(sinks.root_element().contains(&SinkKind::RemoteCodeExecution));
    }

    #[test]
    fn widening_terminates_loops_that_deepen_access_paths() {
        // def f(x):
        //     while c: x = x.next
        //     return x
        let function = function(
            "f",
            &["x"],
            vec![
                Statement::While {
                    condition: var("c"),
                    body: vec![assign(var("x"), field(var("x"), "next"))],
                    orelse: vec![],
                },
                ret(var("x")),
            ],
        );
        let model = run(&function, &ModelDatabase::new());

        // Terminating at all is the main point; the parameter must still be
        // recognized as flowing into the return value.
        assert!(model
            .taint_in_taint_out
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::LocalReturn));
        assert!(model.sink_taint.is_empty());
    }

    #[test]
    fn dropped_assignment_targets_still_analyze_the_value() {
        // def f(x): a[0] = __testSink(x)   -- not an access path target
        // Modeled here with a non-assignable target shape: a call.
        let function = function(
            "f",
            &["x"],
            vec![assign(
                call_name("a", vec![int(0)]),
                call_name("__testSink", vec![var("x")]),
            )],
        );
        let (model, logs) = run_backward(&function, &ModelDatabase::new(), &Config::default())
            .unwrap();

        assert!(model
            .sink_taint
            .read(&parameter(0), &[])
            .root_element()
            .contains(&SinkKind::TestSink));
        assert!(logs
            .iter()
            .any(|message| message.text.contains("assignment dropped")));
    }
}
