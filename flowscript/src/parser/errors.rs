use std::fmt;

use pest::error::LineColLocation;
use pest::iterators::Pair;
use thiserror::Error;

use super::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    DuplicateKey,
    MalformedFunctionHeader,
    RecurOutsideLoop,
    DuplicateDefinition,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseErrorKind::Syntax => "syntax error",
            ParseErrorKind::DuplicateKey => "duplicate key",
            ParseErrorKind::MalformedFunctionHeader => "malformed function header",
            ParseErrorKind::RecurOutsideLoop => "recur outside loop",
            ParseErrorKind::DuplicateDefinition => "duplicate definition",
        };
        f.write_str(name)
    }
}

/// A rejected program, positioned at the offending token (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {line}:{column}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, line: usize, column: usize, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            line,
            column,
            message: message.into(),
        }
    }

    /// Error positioned at the start of `pair`.
    pub fn at(kind: ParseErrorKind, pair: &Pair<Rule>, message: impl Into<String>) -> Self {
        let (line, column) = pair.as_span().start_pos().line_col();
        ParseError::new(kind, line, column, message)
    }

    pub fn unexpected(pair: &Pair<Rule>, context: &str) -> Self {
        ParseError::at(
            ParseErrorKind::Syntax,
            pair,
            format!(
                "unexpected {:?} `{}` in {}",
                pair.as_rule(),
                pair.as_str(),
                context
            ),
        )
    }

    pub fn missing(pair: &Pair<Rule>, what: &str) -> Self {
        ParseError::at(
            ParseErrorKind::Syntax,
            pair,
            format!("missing {} in `{}`", what, pair.as_str()),
        )
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        ParseError::new(
            ParseErrorKind::Syntax,
            line,
            column,
            err.variant.message().into_owned(),
        )
    }
}
