//! Builder functions for AST terms.
//!
//! Used to assemble small function bodies for unit tests without going
//! through a parser frontend.

#[cfg(test)]
use super::*;

/// Create an identifier expression.
#[cfg(test)]
pub fn var(name: &str) -> Expression {
    Expression::Identifier(Identifier::from(name))
}

/// Create an attribute access `receiver.member`.
#[cfg(test)]
pub fn field(receiver: Expression, member: &str) -> Expression {
    Expression::Access {
        receiver: Box::new(receiver),
        member: Identifier::from(member),
    }
}

/// Create a call expression.
#[cfg(test)]
pub fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::Call {
        callee: Box::new(callee),
        arguments,
    }
}

/// Create a call to a function given by name.
#[cfg(test)]
pub fn call_name(name: &str, arguments: Vec<Expression>) -> Expression {
    call(var(name), arguments)
}

/// Create an integer literal expression.
#[cfg(test)]
pub fn int(value: i64) -> Expression {
    Expression::Literal(Literal::Integer(value))
}

/// Create an assignment statement.
#[cfg(test)]
pub fn assign(target: Expression, value: Expression) -> Statement {
    Statement::Assign { target, value }
}

/// Create a `return <value>` statement.
#[cfg(test)]
pub fn ret(value: Expression) -> Statement {
    Statement::Return(Some(value))
}

/// Create a bare expression statement.
#[cfg(test)]
pub fn expr_stmt(expression: Expression) -> Statement {
    Statement::Expression(expression)
}

/// Create a function definition with the given parameter names and body.
#[cfg(test)]
pub fn function(name: &str, parameters: &[&str], body: Vec<Statement>) -> FunctionDefinition {
    FunctionDefinition {
        name: Identifier::from(name),
        parameters: parameters
            .iter()
            .map(|name| Parameter {
                name: Identifier::from(*name),
            })
            .collect(),
        body,
    }
}
