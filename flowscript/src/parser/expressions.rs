use std::sync::Arc;

use pest::iterators::Pair;

use super::common::{build_identifier, build_key, build_literal};
use super::errors::ParseError;
use super::special_forms;
use super::Rule;
use crate::ast::{BinaryOp, Expression, FnDef, Literal, ParamDef, UnaryOp, PIPE_SUBJECT};
use crate::stack::ensure_sufficient_stack;

/// Builds an expression from any pair produced by the `expression` rule or one
/// of its precedence layers.
pub(super) fn build_expression(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    ensure_sufficient_stack(|| build_node(pair))
}

fn build_node(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    match pair.as_rule() {
        Rule::expression => {
            let outer = pair.clone();
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ParseError::missing(&outer, "expression"))?;
            build_expression(inner)
        }
        Rule::pipe_expr => build_pipe(pair),
        Rule::or_expr
        | Rule::and_expr
        | Rule::eq_expr
        | Rule::cmp_expr
        | Rule::add_expr
        | Rule::mul_expr => build_binary_chain(pair),
        Rule::unary_expr => build_unary(pair),
        Rule::postfix_expr => build_postfix(pair),
        Rule::literal => Ok(Expression::Literal(build_literal(pair)?)),
        Rule::identifier => Ok(Expression::Identifier(build_identifier(pair)?)),
        Rule::pipe_subject => Ok(Expression::identifier(PIPE_SUBJECT)),
        Rule::object => special_forms::build_object(pair),
        Rule::array => special_forms::build_array(pair),
        Rule::lambda => special_forms::build_lambda(pair),
        Rule::let_expr => special_forms::build_let(pair),
        Rule::match_expr => special_forms::build_match(pair),
        Rule::loop_expr => special_forms::build_loop(pair),
        Rule::recur_expr => special_forms::build_recur(pair),
        Rule::model_expr => special_forms::build_model(pair),
        Rule::try_expr => special_forms::build_try(pair),
        _ => Err(ParseError::unexpected(&pair, "expression")),
    }
}

// --- Pipes ---

fn build_pipe(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ParseError::missing(&outer, "pipe subject"))?;
    let mut subject = build_expression(first)?;
    while let Some(op_pair) = inner.next() {
        let stage_pair = inner
            .next()
            .ok_or_else(|| ParseError::missing(&op_pair, "pipe stage"))?;
        subject = apply_stage(subject, build_expression(stage_pair)?);
    }
    Ok(subject)
}

/// Rewrites `subject >> stage` into an ordinary call.
pub fn apply_stage(subject: Expression, stage: Expression) -> Expression {
    match stage {
        Expression::Call {
            callee,
            mut arguments,
        } => {
            arguments.insert(0, subject);
            Expression::Call { callee, arguments }
        }
        literal @ (Expression::Object(_) | Expression::Array(_)) => {
            let wrapper = FnDef {
                name: None,
                params: vec![ParamDef::required(PIPE_SUBJECT)],
                body: literal,
            };
            Expression::call(Expression::Lambda(Arc::new(wrapper)), vec![subject])
        }
        other => Expression::call(other, vec![subject]),
    }
}

// --- Operators ---

fn build_binary_chain(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ParseError::missing(&outer, "left operand"))?;
    let mut left = build_expression(first)?;
    while let Some(op_pair) = inner.next() {
        let op = binary_op(&op_pair)?;
        let right_pair = inner
            .next()
            .ok_or_else(|| ParseError::missing(&op_pair, "right operand"))?;
        let right = build_expression(right_pair)?;
        left = Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn binary_op(pair: &Pair<Rule>) -> Result<BinaryOp, ParseError> {
    let op = match pair.as_str() {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::LtEq,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::GtEq,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        _ => return Err(ParseError::unexpected(pair, "operator position")),
    };
    Ok(op)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let outer = pair.clone();
    let mut ops = Vec::new();
    let mut operand = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::unary_op if inner.as_str() == "!" => ops.push(UnaryOp::Not),
            Rule::unary_op => ops.push(UnaryOp::Neg),
            _ => operand = Some(build_expression(inner)?),
        }
    }
    let mut expr = operand.ok_or_else(|| ParseError::missing(&outer, "operand"))?;
    for op in ops.into_iter().rev() {
        expr = match (op, expr) {
            (UnaryOp::Neg, Expression::Literal(Literal::Integer(n))) => {
                Expression::Literal(Literal::Integer(n.wrapping_neg()))
            }
            (UnaryOp::Neg, Expression::Literal(Literal::Float(f))) => {
                Expression::Literal(Literal::Float(-f))
            }
            (op, operand) => Expression::Unary {
                op,
                operand: Box::new(operand),
            },
        };
    }
    Ok(expr)
}

// --- Postfix: calls, fields, indexing ---

fn build_postfix(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let primary = inner
        .next()
        .ok_or_else(|| ParseError::missing(&outer, "primary expression"))?;
    let mut expr = build_expression(primary)?;
    for suffix in inner {
        expr = match suffix.as_rule() {
            Rule::call_args => {
                let arguments = suffix
                    .into_inner()
                    .map(build_expression)
                    .collect::<Result<Vec<_>, _>>()?;
                make_call(expr, arguments)
            }
            Rule::field_access => {
                let key_pair = suffix
                    .clone()
                    .into_inner()
                    .next()
                    .ok_or_else(|| ParseError::missing(&suffix, "field name"))?;
                Expression::Field {
                    target: Box::new(expr),
                    field: build_key(key_pair)?,
                }
            }
            Rule::index_access => {
                let index_pair = suffix
                    .clone()
                    .into_inner()
                    .next()
                    .ok_or_else(|| ParseError::missing(&suffix, "index expression"))?;
                Expression::Index {
                    target: Box::new(expr),
                    index: Box::new(build_expression(index_pair)?),
                }
            }
            _ => return Err(ParseError::unexpected(&suffix, "postfix position")),
        };
    }
    Ok(expr)
}

fn make_call(callee: Expression, mut arguments: Vec<Expression>) -> Expression {
    if let Expression::Identifier(sym) = &callee {
        if sym.as_str() == "is-defined?" && arguments.len() == 1 {
            if let Some(probe) = arguments.pop() {
                return Expression::Defined(Box::new(probe));
            }
        }
    }
    Expression::Call {
        callee: Box::new(callee),
        arguments,
    }
}
