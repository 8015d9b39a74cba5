use std::sync::Arc;

use pest::iterators::Pair;

use super::common::build_identifier;
use super::errors::{ParseError, ParseErrorKind};
use super::expressions::build_expression;
use super::special_forms::build_params;
use super::Rule;
use crate::ast::{FnDef, Program};

pub(super) fn build_program(pair: Pair<Rule>) -> Result<Program, ParseError> {
    let mut program = Program::default();
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::definition => {
                let def_span = item.clone();
                let def = build_definition(item)?;
                let name = def.display_name().to_string();
                if program.function(&name).is_some() {
                    return Err(ParseError::at(
                        ParseErrorKind::DuplicateDefinition,
                        &def_span,
                        format!("function `{}` is defined more than once", name),
                    ));
                }
                program.definitions.push(Arc::new(def));
            }
            Rule::EOI => {}
            _ => return Err(ParseError::unexpected(&item, "top level")),
        }
    }
    Ok(program)
}

fn build_definition(pair: Pair<Rule>) -> Result<FnDef, ParseError> {
    let def_span = pair.clone();
    let mut name = None;
    let mut params = None;
    let mut body = None;
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::kw_fun => {}
            Rule::identifier => name = Some(build_identifier(item)?),
            Rule::param_list => params = Some(build_params(item)?),
            Rule::expression => body = Some(build_expression(item)?),
            _ => return Err(ParseError::unexpected(&item, "function definition")),
        }
    }
    let header_error = |what: &str| {
        ParseError::at(
            ParseErrorKind::MalformedFunctionHeader,
            &def_span,
            format!("function definition is missing its {}", what),
        )
    };
    Ok(FnDef {
        name: Some(name.ok_or_else(|| header_error("name"))?),
        params: params.ok_or_else(|| header_error("parameter list"))?,
        body: body.ok_or_else(|| header_error("body"))?,
    })
}
