use std::collections::HashSet;
use std::sync::Arc;

use pest::iterators::Pair;

use super::common::{build_identifier, build_key, build_string};
use super::errors::{ParseError, ParseErrorKind};
use super::expressions::build_expression;
use super::Rule;
use crate::ast::{
    Expression, FnDef, Guard, LetBinding, LetExpr, LoopExpr, MatchClause, MatchExpr, ModelExpr,
    ParamDef, RecurExpr, SourcePos,
};

fn is_keyword_token(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_fun
            | Rule::kw_let
            | Rule::kw_in
            | Rule::kw_match
            | Rule::kw_as
            | Rule::kw_loop
            | Rule::kw_recur
            | Rule::kw_model
            | Rule::kw_try
    )
}

/// Inner pairs of a special form with the keyword tokens dropped.
fn operands(pair: Pair<Rule>) -> Vec<Pair<Rule>> {
    pair.into_inner()
        .filter(|p| !is_keyword_token(p.as_rule()))
        .collect()
}

fn take_expression(
    items: &mut std::vec::IntoIter<Pair<Rule>>,
    form: &Pair<Rule>,
    what: &str,
) -> Result<Expression, ParseError> {
    let pair = items
        .next()
        .ok_or_else(|| ParseError::missing(form, what))?;
    build_expression(pair)
}

// --- Functions ---

pub(super) fn build_lambda(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let mut items = operands(pair).into_iter();
    let params_pair = items
        .next()
        .ok_or_else(|| ParseError::missing(&form, "parameter list"))?;
    let params = build_params(params_pair)?;
    let body = take_expression(&mut items, &form, "function body")?;
    Ok(Expression::Lambda(Arc::new(FnDef {
        name: None,
        params,
        body,
    })))
}

/// Parameters must have unique names, and once one parameter declares a
/// default every later one must too.
pub(super) fn build_params(pair: Pair<Rule>) -> Result<Vec<ParamDef>, ParseError> {
    let mut params = Vec::new();
    let mut seen = HashSet::new();
    let mut saw_default = false;
    for param_pair in pair.into_inner() {
        let param_span = param_pair.clone();
        let mut inner = param_pair.into_inner();
        let name_pair = inner
            .next()
            .ok_or_else(|| ParseError::missing(&param_span, "parameter name"))?;
        let name = build_identifier(name_pair)?;
        let default = inner.next().map(build_expression).transpose()?;

        if !seen.insert(name.0.clone()) {
            return Err(ParseError::at(
                ParseErrorKind::MalformedFunctionHeader,
                &param_span,
                format!("parameter `{}` declared twice", name),
            ));
        }
        match (&default, saw_default) {
            (Some(_), _) => saw_default = true,
            (None, true) => {
                return Err(ParseError::at(
                    ParseErrorKind::MalformedFunctionHeader,
                    &param_span,
                    format!("required parameter `{}` follows a defaulted one", name),
                ))
            }
            (None, false) => {}
        }
        params.push(ParamDef { name, default });
    }
    Ok(params)
}

// --- let ---

pub(super) fn build_let(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let mut bindings = Vec::new();
    let mut body = None;
    for item in operands(pair) {
        match item.as_rule() {
            Rule::let_binding => {
                let binding_span = item.clone();
                let mut inner = item.into_inner();
                let name_pair = inner
                    .next()
                    .ok_or_else(|| ParseError::missing(&binding_span, "binding name"))?;
                let value_pair = inner
                    .next()
                    .ok_or_else(|| ParseError::missing(&binding_span, "binding value"))?;
                bindings.push(LetBinding {
                    name: build_identifier(name_pair)?,
                    value: build_expression(value_pair)?,
                });
            }
            Rule::expression => body = Some(build_expression(item)?),
            _ => return Err(ParseError::unexpected(&item, "let")),
        }
    }
    let body = body.ok_or_else(|| ParseError::missing(&form, "let body"))?;
    Ok(Expression::Let(LetExpr {
        bindings,
        body: Box::new(body),
    }))
}

// --- match ---

pub(super) fn build_match(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let mut scrutinee = None;
    let mut binder = None;
    let mut clauses = Vec::new();
    for item in operands(pair) {
        match item.as_rule() {
            Rule::scrutinee => {
                for part in operands(item) {
                    match part.as_rule() {
                        Rule::expression => scrutinee = Some(Box::new(build_expression(part)?)),
                        Rule::identifier => binder = Some(build_identifier(part)?),
                        _ => return Err(ParseError::unexpected(&part, "match scrutinee")),
                    }
                }
            }
            Rule::match_clause => clauses.push(build_clause(item)?),
            _ => return Err(ParseError::unexpected(&item, "match")),
        }
    }
    Ok(Expression::Match(MatchExpr {
        scrutinee,
        binder,
        clauses,
    }))
}

fn build_clause(pair: Pair<Rule>) -> Result<MatchClause, ParseError> {
    let form = pair.clone();
    let mut inner = pair.into_inner();
    let guard_pair = inner
        .next()
        .ok_or_else(|| ParseError::missing(&form, "clause guard"))?;
    let guard_inner = guard_pair
        .clone()
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::missing(&guard_pair, "guard expression"))?;
    let guard = match guard_inner.as_rule() {
        Rule::wildcard => Guard::Wildcard,
        _ => Guard::Expr(build_expression(guard_inner)?),
    };
    let body_pair = inner
        .next()
        .ok_or_else(|| ParseError::missing(&form, "clause body"))?;
    Ok(MatchClause {
        guard,
        body: build_expression(body_pair)?,
    })
}

// --- loop / recur ---

pub(super) fn build_loop(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let mut items = operands(pair).into_iter();
    let initial = take_expression(&mut items, &form, "initial loop state")?;
    let body = take_expression(&mut items, &form, "loop body")?;
    Ok(Expression::Loop(LoopExpr {
        initial: Box::new(initial),
        body: Box::new(body),
    }))
}

pub(super) fn build_recur(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let (line, column) = pair.as_span().start_pos().line_col();
    let mut items = operands(pair).into_iter();
    let value = take_expression(&mut items, &form, "next loop state")?;
    Ok(Expression::Recur(RecurExpr {
        value: Box::new(value),
        pos: SourcePos { line, column },
    }))
}

// --- model / try ---

pub(super) fn build_model(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let mut items = operands(pair).into_iter();
    let template_pair = items
        .next()
        .ok_or_else(|| ParseError::missing(&form, "prompt template"))?;
    let template = build_string(template_pair)?;
    let options = items
        .next()
        .map(build_expression)
        .transpose()?
        .map(Box::new);
    Ok(Expression::Model(ModelExpr { template, options }))
}

pub(super) fn build_try(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let form = pair.clone();
    let mut items = operands(pair).into_iter();
    let inner = take_expression(&mut items, &form, "guarded expression")?;
    Ok(Expression::Try(Box::new(inner)))
}

// --- Collections ---

pub(super) fn build_object(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let mut entries: Vec<(String, Expression)> = Vec::new();
    for entry in pair.into_inner() {
        let entry_span = entry.clone();
        let mut inner = entry.into_inner();
        let key_pair = inner
            .next()
            .ok_or_else(|| ParseError::missing(&entry_span, "object key"))?;
        let key = build_key(key_pair)?;
        if entries.iter().any(|(existing, _)| *existing == key) {
            return Err(ParseError::at(
                ParseErrorKind::DuplicateKey,
                &entry_span,
                format!("key `{}` appears more than once in object literal", key),
            ));
        }
        let value_pair = inner
            .next()
            .ok_or_else(|| ParseError::missing(&entry_span, "object value"))?;
        entries.push((key, build_expression(value_pair)?));
    }
    Ok(Expression::Object(entries))
}

pub(super) fn build_array(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let items = pair
        .into_inner()
        .map(build_expression)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expression::Array(items))
}
