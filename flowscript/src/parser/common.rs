use pest::iterators::Pair;

use super::errors::{ParseError, ParseErrorKind};
use super::utils::unescape;
use super::Rule;
use crate::ast::{Literal, Symbol};

// --- Helper Builders ---

pub(super) fn build_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let literal_pair = pair.clone();
    let inner_pair = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::missing(&literal_pair, "literal value"))?;
    match inner_pair.as_rule() {
        Rule::integer => inner_pair.as_str().parse().map(Literal::Integer).map_err(|_| {
            ParseError::at(
                ParseErrorKind::Syntax,
                &inner_pair,
                format!("integer out of range: {}", inner_pair.as_str()),
            )
        }),
        Rule::float => inner_pair.as_str().parse().map(Literal::Float).map_err(|_| {
            ParseError::at(
                ParseErrorKind::Syntax,
                &inner_pair,
                format!("invalid float: {}", inner_pair.as_str()),
            )
        }),
        Rule::string => build_string(inner_pair).map(Literal::String),
        Rule::boolean => Ok(Literal::Boolean(inner_pair.as_str() == "true")),
        Rule::null => Ok(Literal::Null),
        _ => Err(ParseError::unexpected(&inner_pair, "literal")),
    }
}

/// Strips the quotes of a `string` pair and resolves escapes.
pub(super) fn build_string(pair: Pair<Rule>) -> Result<String, ParseError> {
    let raw = pair.as_str();
    let content = &raw[1..raw.len() - 1];
    unescape(content).map_err(|sequence| {
        ParseError::at(
            ParseErrorKind::Syntax,
            &pair,
            format!("invalid escape sequence `{}`", sequence),
        )
    })
}

pub(super) fn build_identifier(pair: Pair<Rule>) -> Result<Symbol, ParseError> {
    if pair.as_rule() != Rule::identifier {
        return Err(ParseError::unexpected(&pair, "identifier position"));
    }
    Ok(Symbol(pair.as_str().to_string()))
}

/// Object keys and field names: either a bare word or a quoted string.
pub(super) fn build_key(pair: Pair<Rule>) -> Result<String, ParseError> {
    match pair.as_rule() {
        Rule::bare_key | Rule::identifier => Ok(pair.as_str().to_string()),
        Rule::string => build_string(pair),
        _ => Err(ParseError::unexpected(&pair, "key position")),
    }
}
