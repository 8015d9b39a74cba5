//! Static checks that need the whole tree.

use super::errors::{ParseError, ParseErrorKind};
use crate::ast::{Expression, FnDef, Guard, Program};

pub fn check_program(program: &Program) -> Result<(), ParseError> {
    for def in &program.definitions {
        check_function(def, false)?;
    }
    Ok(())
}

pub fn check_expression(expr: &Expression) -> Result<(), ParseError> {
    check_recur(expr, false)
}

fn check_function(def: &FnDef, is_loop_body: bool) -> Result<(), ParseError> {
    for param in &def.params {
        if let Some(default) = &param.default {
            check_recur(default, false)?;
        }
    }
    check_recur(&def.body, is_loop_body)
}

/// `recur` may only appear inside the closure handed directly to `loop`.
/// Entering any other closure clears the flag.
fn check_recur(expr: &Expression, in_loop_body: bool) -> Result<(), ParseError> {
    match expr {
        Expression::Recur(recur) => {
            if !in_loop_body {
                return Err(ParseError::new(
                    ParseErrorKind::RecurOutsideLoop,
                    recur.pos.line,
                    recur.pos.column,
                    "`recur` must appear inside the body of a `loop`",
                ));
            }
            check_recur(&recur.value, in_loop_body)
        }
        Expression::Loop(loop_expr) => {
            check_recur(&loop_expr.initial, in_loop_body)?;
            match loop_expr.body.as_ref() {
                Expression::Lambda(def) => check_function(def, true),
                other => check_recur(other, false),
            }
        }
        Expression::Lambda(def) => check_function(def, false),
        Expression::Literal(_) | Expression::Identifier(_) => Ok(()),
        Expression::Model(model) => match &model.options {
            Some(options) => check_recur(options, in_loop_body),
            None => Ok(()),
        },
        Expression::Object(entries) => entries
            .iter()
            .try_for_each(|(_, value)| check_recur(value, in_loop_body)),
        Expression::Array(items) => items
            .iter()
            .try_for_each(|item| check_recur(item, in_loop_body)),
        Expression::Call { callee, arguments } => {
            check_recur(callee, in_loop_body)?;
            arguments
                .iter()
                .try_for_each(|arg| check_recur(arg, in_loop_body))
        }
        Expression::Field { target, .. } => check_recur(target, in_loop_body),
        Expression::Index { target, index } => {
            check_recur(target, in_loop_body)?;
            check_recur(index, in_loop_body)
        }
        Expression::Unary { operand, .. } => check_recur(operand, in_loop_body),
        Expression::Binary { left, right, .. } => {
            check_recur(left, in_loop_body)?;
            check_recur(right, in_loop_body)
        }
        Expression::Let(let_expr) => {
            for binding in &let_expr.bindings {
                check_recur(&binding.value, in_loop_body)?;
            }
            check_recur(&let_expr.body, in_loop_body)
        }
        Expression::Match(match_expr) => {
            if let Some(scrutinee) = &match_expr.scrutinee {
                check_recur(scrutinee, in_loop_body)?;
            }
            for clause in &match_expr.clauses {
                if let Guard::Expr(guard) = &clause.guard {
                    check_recur(guard, in_loop_body)?;
                }
                check_recur(&clause.body, in_loop_body)?;
            }
            Ok(())
        }
        Expression::Try(inner) | Expression::Defined(inner) => check_recur(inner, in_loop_body),
    }
}
