//! Source text to AST.
//!
//! The pest grammar lives in `src/flowscript.pest`; the builders in the
//! submodules walk the pest pairs and produce [`crate::ast`] nodes, checking
//! the rules the grammar alone cannot express (unique keys, parameter order,
//! unique top-level names). [`validate`] runs the whole-tree checks afterwards.

use pest::Parser;

use crate::ast::{Expression, Program};
use crate::stack::{with_stack, PARSER_STACK_SIZE};

pub mod common;
pub mod errors;
pub mod expressions;
pub mod special_forms;
pub mod toplevel;
pub mod utils;
pub mod validate;

pub use errors::{ParseError, ParseErrorKind};
use expressions::build_expression;
use toplevel::build_program;

/// Deepest bracket nesting accepted in source text.
pub const MAX_NESTING_DEPTH: usize = 64;

#[derive(pest_derive::Parser)]
#[grammar = "flowscript.pest"]
pub struct FlowParser;

/// Parses a whole program: a sequence of top-level `fun` definitions.
pub fn parse_program(input: &str) -> Result<Program, ParseError> {
    utils::check_nesting(input, MAX_NESTING_DEPTH)?;
    with_stack(PARSER_STACK_SIZE, || build_program_from(input))
}

fn build_program_from(input: &str) -> Result<Program, ParseError> {
    let mut pairs = FlowParser::parse(Rule::program, input)?;
    let program_pair = pairs
        .next()
        .ok_or_else(|| ParseError::new(ParseErrorKind::Syntax, 1, 1, "empty input"))?;
    let program = build_program(program_pair)?;
    validate::check_program(&program)?;
    Ok(program)
}

/// Parses a single expression, including the static `recur` placement check.
pub fn parse_expression(input: &str) -> Result<Expression, ParseError> {
    let expr = parse_expression_unchecked(input)?;
    with_stack(PARSER_STACK_SIZE, || validate::check_expression(&expr))?;
    Ok(expr)
}

/// Like [`parse_expression`] but without the `recur` placement check, so a
/// misplaced `recur` reaches the evaluator.
pub fn parse_expression_unchecked(input: &str) -> Result<Expression, ParseError> {
    utils::check_nesting(input, MAX_NESTING_DEPTH)?;
    with_stack(PARSER_STACK_SIZE, || build_expression_from(input))
}

fn build_expression_from(input: &str) -> Result<Expression, ParseError> {
    let mut pairs = FlowParser::parse(Rule::expression_input, input)?;
    let input_pair = pairs
        .next()
        .ok_or_else(|| ParseError::new(ParseErrorKind::Syntax, 1, 1, "empty input"))?;
    let expr_pair = input_pair
        .clone()
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .ok_or_else(|| ParseError::missing(&input_pair, "expression"))?;
    build_expression(expr_pair)
}
