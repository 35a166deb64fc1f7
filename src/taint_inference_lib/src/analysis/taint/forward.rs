//! The forward (source) taint analysis.
//!
//! The state maps each location to the sources that may reach it. Taint
//! enters through calls to functions whose forward model is known and flows
//! along assignments towards the `return` statements; the forward model of
//! the analyzed function is the taint of the return slot in the exit state.

use super::state::{State, StateTree};
use super::{resolve_call_target, Config, Diagnostics};
use crate::abstract_domain::{AbstractDomain, SourceKind, TaintTree};
use crate::analysis::fixpoint::{self, Computation};
use crate::analysis::graph::{Block, Cfg};
use crate::ast::{Expression, FunctionDefinition, Statement};
use crate::models::{Callable, ForwardModel, ModelStore};
use crate::prelude::*;
use crate::types::TypeQuery;
use crate::utils::log::LogMessage;
use petgraph::graph::EdgeIndex;

/// Run the forward analysis of one function and extract its forward model.
///
/// Returns the model together with the diagnostics collected along the way.
/// Fails if the function body contains a nested function definition.
pub fn run_forward(
    function: &FunctionDefinition,
    models: &dyn ModelStore,
    types: &dyn TypeQuery,
    config: &Config,
) -> Result<(ForwardModel, Vec<LogMessage>), Error> {
    let cfg = Cfg::new(function);
    let context = ForwardTaintContext {
        cfg: &cfg,
        function: Callable::from(&function.name),
        models,
        types,
        config,
        diagnostics: Diagnostics::new(),
    };
    let mut computation = Computation::new(context, None);
    computation.set_node_value(cfg.entry(), State::new());
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
            .source("ForwardTaint"),
        );
    }

    let exit_state = computation
        .get_node_value(cfg.exit())
        .cloned()
        .unwrap_or_default();
    let return_taint = exit_state.read(&Root::LocalResult, &[]);
    let mut source_taint = State::new();
    source_taint.assign(Root::LocalResult, &[], return_taint);
    Ok((ForwardModel { source_taint }, context.diagnostics.take_logs()))
}

/// The transfer context of the forward analysis.
struct ForwardTaintContext<'a> {
    cfg: &'a Cfg<'a>,
    /// The identity of the analyzed function, used for type store lookups.
    function: Callable,
    models: &'a dyn ModelStore,
    types: &'a dyn TypeQuery,
    config: &'a Config,
    diagnostics: Diagnostics,
}

impl<'a> fixpoint::Context for ForwardTaintContext<'a> {
    type EdgeLabel = ();
    type NodeLabel = Block<'a>;
    type NodeValue = State<SourceKind>;

    fn get_graph(&self) -> &petgraph::graph::DiGraph<Block<'a>, ()> {
        self.cfg.graph()
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

    /// Push the state at the start of the edge's source block
    /// through all statements of that block.
    fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue> {
        let (start, _end) = self
            .cfg
            .graph()
            .edge_endpoints(edge)
            .expect("Edge not found");
        let mut state = value.clone();
        for (point, statement) in self.cfg.graph()[start].statements() {
            match self.update_statement(&state, *point, statement) {
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

impl<'a> ForwardTaintContext<'a> {
    /// The transfer function for a single statement.
    fn update_statement(
        &self,
        state: &State<SourceKind>,
        point: ProgramPoint,
        statement: &Statement,
    ) -> Result<State<SourceKind>, Error> {
        match statement {
            Statement::Assign { target, value } => {
                let taint = self.analyze_expression(state, point, value);
                let mut new_state = state.clone();
                match AccessPath::of_expression(target) {
                    Some(access_path) => {
                        new_state.assign(access_path.root, &access_path.path, taint)
                    }
                    None => self.diagnostics.log(
                        LogMessage::new_debug(
                            "assignment target is not an access path, assignment dropped",
                        )
                        .location(point)
                        .source("ForwardTaint"),
                    ),
                }
                Ok(new_state)
            }
            Statement::Return(Some(expression)) => {
                let taint = self.analyze_expression(state, point, expression);
                let mut new_state = state.clone();
                new_state.assign(Root::LocalResult, &[], taint);
                Ok(new_state)
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
            | Statement::Expression(_)
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
            | Statement::YieldFrom(_) => Ok(state.clone()),
        }
    }

    /// Compute the source taint of an expression in the given state.
    ///
    /// Expression shapes without an arm of their own carry no taint in this
    /// iteration of the analysis; this is a deliberate under-approximation.
    fn analyze_expression(
        &self,
        state: &State<SourceKind>,
        point: ProgramPoint,
        expression: &Expression,
    ) -> StateTree<SourceKind> {
        match expression {
            Expression::Identifier(name) => {
                state.read(&Root::Variable { name: name.clone() }, &[])
            }
            Expression::Access { receiver, member } => {
                let receiver_taint = self.analyze_expression(state, point, receiver);
                TaintTree::with_prefix(&[PathLabel::Field(member.clone())], receiver_taint)
            }
            Expression::Call { callee, arguments } => {
                self.analyze_call(state, point, callee, arguments)
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
            | Expression::Ellipsis => TaintTree::empty(),
        }
    }

    /// Compute the result taint of a call.
    ///
    /// With a known callee model the result is the model's return taint;
    /// the arguments are not re-analyzed in that case. Without a model the
    /// default policy applies: the result taint is the join of the taints of
    /// all arguments (and of the receiver for method calls).
    fn analyze_call(
        &self,
        state: &State<SourceKind>,
        point: ProgramPoint,
        callee: &Expression,
        arguments: &[Expression],
    ) -> StateTree<SourceKind> {
        match resolve_call_target(callee, &self.function, point, Some(self.types)) {
            Some(target) => {
                if let Some(model) = self.models.get_model(&target) {
                    return model.forward.source_taint.read(&Root::LocalResult, &[]);
                }
                self.diagnostics.log(
                    LogMessage::new_debug(format!(
                        "no model for {target}, falling back to argument propagation"
                    ))
                    .location(point)
                    .source("ForwardTaint"),
                );
            }
            None => self.diagnostics.log(
                LogMessage::new_debug("call target could not be resolved")
                    .location(point)
                    .source("ForwardTaint"),
            ),
        }
        let mut result = TaintTree::empty();
        for argument in arguments {
            result = result.merge(&self.analyze_expression(state, point, argument));
        }
        if let Expression::Access { receiver, .. } = callee {
            result = result.merge(&self.analyze_expression(state, point, receiver));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::TaintSet;
    use crate::ast::{assign, call, call_name, field, function, int, ret, var, Statement};
    use crate::models::{Model, ModelDatabase};
    use crate::types::{Annotation, TypeDatabase};

    /// A model store with a `source()` returning `UserControlled`
    /// and a `test_source()` returning `TestSource`.
    fn source_models() -> ModelDatabase {
        let mut models = ModelDatabase::new();
        for (name, kind) in [
            ("source", SourceKind::UserControlled),
            ("test_source", SourceKind::TestSource),
        ] {
            let mut model = Model::default();
            model.forward.source_taint.assign(
                Root::LocalResult,
                &[],
                TaintTree::make_leaf(TaintSet::singleton(kind)),
            );
            models.insert(Callable::new(name), model);
        }
        models
    }

    fn run(
        function: &FunctionDefinition,
        models: &ModelDatabase,
        types: &TypeDatabase,
    ) -> ForwardModel {
        let (model, _logs) = run_forward(function, models, types, &Config::default()).unwrap();
        model
    }

    #[test]
    fn source_through_known_callee() {
        // def g(): return source()
        let function = function("g", &[], vec![ret(call_name("source", vec![]))]);
        let model = run(&function, &source_models(), &TypeDatabase::new());

        assert!(model
            .source_taint
            .read(&Root::LocalResult, &[])
            .root_element()
            .contains(&SourceKind::UserControlled));
    }

    #[test]
    fn taint_flows_through_assignments() {
        // def g(): a = source(); b = a; return b
        let function = function(
            "g",
            &[],
            vec![
                assign(var("a"), call_name("source", vec![])),
                assign(var("b"), var("a")),
                ret(var("b")),
            ],
        );
        let model = run(&function, &source_models(), &TypeDatabase::new());

        assert!(model
            .source_taint
            .read(&Root::LocalResult, &[])
            .root_element()
            .contains(&SourceKind::UserControlled));
    }

    #[test]
    fn strong_updates_kill_previous_taint() {
        // def g(): a = source(); a = 1; return a
        let function = function(
            "g",
            &[],
            vec![
                assign(var("a"), call_name("source", vec![])),
                assign(var("a"), int(1)),
                ret(var("a")),
            ],
        );
        let model = run(&function, &source_models(), &TypeDatabase::new());

        assert!(model.source_taint.is_empty());
    }

    #[test]
    fn field_reads_wrap_the_receiver_taint() {
        // def g(): a = source(); return a.q
        let function = function(
            "g",
            &[],
            vec![
                assign(var("a"), call_name("source", vec![])),
                ret(field(var("a"), "q")),
            ],
        );
        let model = run(&function, &source_models(), &TypeDatabase::new());

        let tree = model.source_taint.read(&Root::LocalResult, &[]);
        // The taint of `a` sits under the `q` label of the result tree.
        assert!(tree.root_element().is_bottom());
        assert!(tree
            .read(&[PathLabel::Field("q".into())])
            .root_element()
            .contains(&SourceKind::UserControlled));
    }

    #[test]
    fn unknown_callees_join_their_argument_taint() {
        // def g(): a = source(); return unknown(a, 1)
        let function = function(
            "g",
            &[],
            vec![
                assign(var("a"), call_name("source", vec![])),
                ret(call_name("unknown", vec![var("a"), int(1)])),
            ],
        );
        let (model, logs) = run_forward(
            &function,
            &source_models(),
            &TypeDatabase::new(),
            &Config::default(),
        )
        .unwrap();

        assert!(model
            .source_taint
            .read(&Root::LocalResult, &[])
            .root_element()
            .contains(&SourceKind::UserControlled));
        // The store miss is reported as a diagnostic.
        assert!(logs.iter().any(|message| message.text.contains("unknown")));
    }

    #[test]
    fn branches_join_their_taint() {
        // def g(c):
        //     if c: a = source()
        //     else: a = test_source()
        //     return a
        let function = function(
            "g",
            &["c"],
            vec![
                Statement::If {
                    condition: var("c"),
                    body: vec![assign(var("a"), call_name("source", vec![]))],
                    orelse: vec![assign(var("a"), call_name("test_source", vec![]))],
                },
                ret(var("a")),
            ],
        );
        let model = run(&function, &source_models(), &TypeDatabase::new());

        let taint = model.source_taint.read(&Root::LocalResult, &[]);
        assert!(taint.root_element().contains(&SourceKind::UserControlled));
        assert!(taint.root_element().contains(&SourceKind::TestSource));
    }

    #[test]
    fn method_calls_resolve_through_the_type_store() {
        // def g(): return r.fetch()    # r: Widget, Widget.fetch -> UserControlled
        let function = function(
            "g",
            &[],
            vec![ret(call(field(var("r"), "fetch"), vec![]))],
        );
        let mut models = ModelDatabase::new();
        let mut model = Model::default();
        model.forward.source_taint.assign(
            Root::LocalResult,
            &[],
            TaintTree::make_leaf(TaintSet::singleton(SourceKind::UserControlled)),
        );
        models.insert(Callable::method(&"Widget".into(), &"fetch".into()), model);
        let mut types = TypeDatabase::new();
        types.insert(
            Callable::new("g"),
            ProgramPoint(0),
            "r".into(),
            Annotation::Primitive("Widget".into()),
        );

        let model = run(&function, &models, &types);
        assert!(model
            .source_taint
            .read(&Root::LocalResult, &[])
            .root_element()
            .contains(&SourceKind::UserControlled));
    }

    #[test]
    fn unmodeled_method_calls_taint_through_the_receiver() {
        // def g(): a = source(); return a.render()
        let function = function(
            "g",
            &[],
            vec![
                assign(var("a"), call_name("source", vec![])),
                ret(call(field(var("a"), "render"), vec![])),
            ],
        );
        let model = run(&function, &source_models(), &TypeDatabase::new());

        // No type information for `a`, so the default policy joins the
        // receiver taint into the call result.
        assert!(model
            .source_taint
            .read(&Root::LocalResult, &[])
            .root_element()
            .contains(&SourceKind::UserControlled));
    }
}
