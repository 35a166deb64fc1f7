//! Build intraprocedural control flow graphs out of a function definition.
//!
//! The generated graphs follow some basic principles:
//! * **Nodes** are basic blocks, i.e. maximal straight-line statement
//!   sequences. Two artificial empty blocks mark the function entry and the
//!   function exit, so the analysis states before the first and after the
//!   last statement can be read off a single node each.
//! * **Edges** denote possible control flow between blocks. Edge labels carry
//!   no information.
//!
//! Compound statements are flattened during construction: the statements of
//! an `if` branch, a loop body or an exception handler end up in blocks of
//! their own, connected according to the branching structure. The compound
//! statement itself stays in the block preceding its regions, so transfer
//! functions still get to see it (and can reject statements like nested
//! function definitions).
//!
//! `return` and `raise` end their block with an edge to the exit node.
//! Statements following a terminator are collected in a fresh block without
//! incoming edges; the fixpoint computation never assigns a value to such
//! unreachable blocks.

use crate::ast::{FunctionDefinition, Statement};
use crate::prelude::*;
use itertools::Itertools;
use petgraph::graph::{DiGraph, NodeIndex};

/// A stable identifier for a statement of the analyzed function.
///
/// Program points number the statements in construction (preorder) order.
/// They key the lookups into the type-resolution store.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct ProgramPoint(pub u32);

impl std::fmt::Display for ProgramPoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "p{}", self.0)
    }
}

/// A basic block: a maximal straight-line sequence of statements.
#[derive(Serialize, Debug, Default, Clone)]
pub struct Block<'a> {
    statements: Vec<(ProgramPoint, &'a Statement)>,
}

impl<'a> Block<'a> {
    /// The statements of the block in program order.
    pub fn statements(&self) -> &[(ProgramPoint, &'a Statement)] {
        &self.statements
    }
}

impl<'a> std::fmt::Display for Block<'a> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.statements.is_empty() {
            write!(formatter, "block()")
        } else {
            write!(
                formatter,
                "block({})",
                self.statements.iter().map(|(point, _)| point).join(", ")
            )
        }
    }
}

/// The graph type of an intraprocedural control flow graph.
pub type Graph<'a> = DiGraph<Block<'a>, ()>;

/// The control flow graph of a single function
/// together with its distinguished entry and exit nodes.
pub struct Cfg<'a> {
    graph: Graph<'a>,
    entry: NodeIndex,
    exit: NodeIndex,
}

impl<'a> Cfg<'a> {
    /// Build the control flow graph of the given function.
    pub fn new(function: &'a FunctionDefinition) -> Cfg<'a> {
        let mut graph = Graph::new();
        let entry = graph.add_node(Block::default());
        let exit = graph.add_node(Block::default());
        let first = graph.add_node(Block::default());
        graph.add_edge(entry, first, ());
        let mut builder = CfgBuilder {
            graph,
            exit,
            current: first,
            loop_stack: Vec::new(),
            next_point: 0,
        };
        builder.build_sequence(&function.body);
        let mut graph = builder.graph;
        graph.add_edge(builder.current, exit, ());
        Cfg { graph, entry, exit }
    }

    /// The underlying graph.
    pub fn graph(&self) -> &Graph<'a> {
        &self.graph
    }

    /// A copy of the underlying graph with the direction of all edges
    /// reversed. Node indices are preserved, so blocks keep their identity.
    /// Used to run backward analyses through the forward fixpoint engine.
    pub fn reversed_graph(&self) -> Graph<'a> {
        let mut reversed = self.graph.clone();
        reversed.reverse();
        reversed
    }

    /// The artificial empty block before the first statement.
    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    /// The artificial empty block behind all `return` statements
    /// and the function end.
    pub fn exit(&self) -> NodeIndex {
        self.exit
    }
}

/// State of the recursive graph construction.
struct CfgBuilder<'a> {
    graph: Graph<'a>,
    exit: NodeIndex,
    /// The block that new statements get appended to.
    current: NodeIndex,
    /// Targets for `break` and `continue` of the enclosing loops.
    loop_stack: Vec<LoopFrame>,
    next_point: u32,
}

struct LoopFrame {
    header: NodeIndex,
    after: NodeIndex,
}

impl<'a> CfgBuilder<'a> {
    /// Append a statement to the current block and assign it a program point.
    fn push(&mut self, statement: &'a Statement) {
        let point = ProgramPoint(self.next_point);
        self.next_point += 1;
        self.graph[self.current].statements.push((point, statement));
    }

    fn new_block(&mut self) -> NodeIndex {
        self.graph.add_node(Block::default())
    }

    /// Add a new empty block with an incoming edge from `predecessor`.
    fn new_block_from(&mut self, predecessor: NodeIndex) -> NodeIndex {
        let block = self.new_block();
        self.graph.add_edge(predecessor, block, ());
        block
    }

    /// Translate a statement sequence starting at the current block.
    fn build_sequence(&mut self, statements: &'a [Statement]) {
        for statement in statements {
            self.build_statement(statement);
        }
    }

    fn build_statement(&mut self, statement: &'a Statement) {
        match statement {
            Statement::If { body, orelse, .. } => {
                self.push(statement);
                let branch = self.current;
                let after = self.new_block();
                self.current = self.new_block_from(branch);
                self.build_sequence(body);
                self.graph.add_edge(self.current, after, ());
                self.current = self.new_block_from(branch);
                self.build_sequence(orelse);
                self.graph.add_edge(self.current, after, ());
                self.current = after;
            }
            Statement::While { body, orelse, .. }
            | Statement::For { body, orelse, .. } => {
                self.push(statement);
                let header = self.new_block_from(self.current);
                let after = self.new_block();
                self.loop_stack.push(LoopFrame { header, after });
                self.current = self.new_block_from(header);
                self.build_sequence(body);
                self.graph.add_edge(self.current, header, ());
                self.loop_stack.pop();
                // The else-suite runs when the loop exits without break.
                self.current = self.new_block_from(header);
                self.build_sequence(orelse);
                self.graph.add_edge(self.current, after, ());
                self.current = after;
            }
            Statement::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                self.push(statement);
                let before = self.current;
                let join = self.new_block();
                self.current = self.new_block_from(before);
                self.build_sequence(body);
                let body_exit = self.current;
                self.current = self.new_block_from(body_exit);
                self.build_sequence(orelse);
                self.graph.add_edge(self.current, join, ());
                // A handler may run with the state from before the body or
                // from any suffix of it; at block granularity both entry
                // edges together over-approximate this.
                for handler in handlers {
                    self.current = self.new_block();
                    self.graph.add_edge(before, self.current, ());
                    self.graph.add_edge(body_exit, self.current, ());
                    self.build_sequence(&handler.body);
                    self.graph.add_edge(self.current, join, ());
                }
                self.current = join;
                self.build_sequence(finally);
            }
            Statement::With { body, .. } => {
                self.push(statement);
                self.build_sequence(body);
            }
            Statement::Return(_) | Statement::Raise(_) => {
                self.push(statement);
                self.graph.add_edge(self.current, self.exit, ());
                self.current = self.new_block();
            }
            Statement::Break => {
                self.push(statement);
                if let Some(frame) = self.loop_stack.last() {
                    self.graph.add_edge(self.current, frame.after, ());
                }
                self.current = self.new_block();
            }
            Statement::Continue => {
                self.push(statement);
                if let Some(frame) = self.loop_stack.last() {
                    self.graph.add_edge(self.current, frame.header, ());
                }
                self.current = self.new_block();
            }
            Statement::Assign { .. }
            | Statement::Assert(_)
            | Statement::Class { .. }
            | Statement::Define(_)
            | Statement::Delete(_)
            | Statement::Expression(_)
            | Statement::Global(_)
            | Statement::Import { .. }
            | Statement::Nonlocal(_)
            | Statement::Pass
            | Statement::Yield(_)
            | Statement::YieldFrom(_) => self.push(statement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{assign, expr_stmt, function, int, ret, var, Statement};
    use petgraph::algo::has_path_connecting;
    use std::collections::BTreeSet;

    fn statement_count(cfg: &Cfg) -> usize {
        cfg.graph()
            .node_indices()
            .map(|node| cfg.graph()[node].statements().len())
            .sum()
    }

    #[test]
    fn straight_line_function() {
        let function = function(
            "f",
            &[],
            vec![assign(var("x"), int(1)), ret(var("x"))],
        );
        let cfg = Cfg::new(&function);

        assert!(cfg.graph()[cfg.entry()].statements().is_empty());
        assert!(cfg.graph()[cfg.exit()].statements().is_empty());
        assert_eq!(statement_count(&cfg), 2);
        assert!(has_path_connecting(cfg.graph(), cfg.entry(), cfg.exit(), None));
    }

    #[test]
    fn program_points_are_unique() {
        let function = function(
            "f",
            &[],
            vec![
                Statement::If {
                    condition: var("c"),
                    body: vec![assign(var("x"), int(1))],
                    orelse: vec![assign(var("x"), int(2))],
                },
                ret(var("x")),
            ],
        );
        let cfg = Cfg::new(&function);

        let points: BTreeSet<u32> = cfg
            .graph()
            .node_indices()
            .flat_map(|node| {
                cfg.graph()[node]
                    .statements()
                    .iter()
                    .map(|(point, _)| point.0)
                    .collect::<Vec<_>>()
            })
            .collect();
        // Four statements including the `if` header, numbered without gaps.
        assert_eq!(points, BTreeSet::from([0, 1, 2, 3]));
        assert_eq!(statement_count(&cfg), 4);
    }

    #[test]
    fn branches_rejoin() {
        let function = function(
            "f",
            &[],
            vec![
                Statement::If {
                    condition: var("c"),
                    body: vec![assign(var("x"), int(1))],
                    orelse: vec![],
                },
                ret(var("x")),
            ],
        );
        let cfg = Cfg::new(&function);

        // Both the then-branch and the empty else-branch reach the return.
        let return_block = cfg
            .graph()
            .node_indices()
            .find(|node| {
                cfg.graph()[*node]
                    .statements()
                    .iter()
                    .any(|(_, statement)| matches!(statement, Statement::Return(_)))
            })
            .unwrap();
        let branch_block = cfg
            .graph()
            .node_indices()
            .find(|node| {
                cfg.graph()[*node]
                    .statements()
                    .iter()
                    .any(|(_, statement)| matches!(statement, Statement::If { .. }))
            })
            .unwrap();
        assert!(has_path_connecting(
            cfg.graph(),
            branch_block,
            return_block,
            None
        ));
        assert_eq!(
            cfg.graph()
                .neighbors_directed(branch_block, petgraph::Direction::Outgoing)
                .count(),
            2
        );
    }

    #[test]
    fn while_loop_has_a_back_edge() {
        let function = function(
            "f",
            &[],
            vec![
                Statement::While {
                    condition: var("c"),
                    body: vec![assign(var("x"), var("y"))],
                    orelse: vec![],
                },
                ret(var("x")),
            ],
        );
        let cfg = Cfg::new(&function);

        // The loop body and the loop header form a cycle.
        let has_cycle = cfg.graph().node_indices().any(|node| {
            cfg.graph()
                .neighbors(node)
                .any(|successor| has_path_connecting(cfg.graph(), successor, node, None))
        });
        assert!(has_cycle);
        assert!(has_path_connecting(cfg.graph(), cfg.entry(), cfg.exit(), None));
    }

    #[test]
    fn break_jumps_behind_the_loop() {
        let function = function(
            "f",
            &[],
            vec![
                Statement::While {
                    condition: var("c"),
                    body: vec![Statement::Break],
                    orelse: vec![],
                },
                ret(var("x")),
            ],
        );
        let cfg = Cfg::new(&function);

        let break_block = cfg
            .graph()
            .node_indices()
            .find(|node| {
                cfg.graph()[*node]
                    .statements()
                    .iter()
                    .any(|(_, statement)| matches!(statement, Statement::Break))
            })
            .unwrap();
        let successors: Vec<_> = cfg.graph().neighbors(break_block).collect();
        assert_eq!(successors.len(), 1);
        // The break target leads to the code behind the loop, not back into it.
        assert!(has_path_connecting(
            cfg.graph(),
            successors[0],
            cfg.exit(),
            None
        ));
        assert!(!has_path_connecting(cfg.graph(), successors[0], break_block, None));
    }

    #[test]
    fn return_ends_the_block() {
        let function = function(
            "f",
            &[],
            vec![
                ret(var("x")),
                expr_stmt(var("dead")), // unreachable
            ],
        );
        let cfg = Cfg::new(&function);

        let dead_block = cfg
            .graph()
            .node_indices()
            .find(|node| {
                cfg.graph()[*node]
                    .statements()
                    .iter()
                    .any(|(_, statement)| matches!(statement, Statement::Expression(_)))
            })
            .unwrap();
        assert!(!has_path_connecting(
            cfg.graph(),
            cfg.entry(),
            dead_block,
            None
        ));
    }

    #[test]
    fn reversed_graph_flips_edges() {
        let function = function("f", &[], vec![ret(var("x"))]);
        let cfg = Cfg::new(&function);
        let reversed = cfg.reversed_graph();

        assert_eq!(reversed.node_count(), cfg.graph().node_count());
        assert_eq!(reversed.edge_count(), cfg.graph().edge_count());
        assert!(has_path_connecting(&reversed, cfg.exit(), cfg.entry(), None));
    }
}
