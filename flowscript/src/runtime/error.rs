// Runtime error taxonomy for flowscript evaluation

use thiserror::Error;

use crate::runtime::dispatcher::ModelError;
use crate::runtime::values::Value;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Coarse classification of a [`RuntimeError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnboundIdentifier,
    TypeMismatch,
    NoMatch,
    RecurOutsideLoop,
    Model,
    StackOverflow,
    DivisionByZero,
    Internal,
}

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("unbound identifier `{name}`")]
    UnboundIdentifier { name: String },

    /// Wrong kind of value for an operation. Also used for arity violations.
    #[error("type mismatch in {operand}: expected {expected}, got {actual}")]
    TypeMismatch {
        operand: String,
        expected: String,
        actual: String,
    },

    #[error("no match clause selected for {scrutinee}")]
    NoMatch { scrutinee: String },

    #[error("recur used outside the body of a loop")]
    RecurOutsideLoop,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("call depth limit of {depth} frames exceeded")]
    StackOverflow { depth: usize },

    #[error("division by zero")]
    DivisionByZero,

    /// A fatal error escaped a loop body; the state of the failing iteration is kept.
    #[error("loop aborted in iteration {iteration}: {source}")]
    LoopAborted {
        iteration: u64,
        last_state: Value,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn type_mismatch(
        operand: impl Into<String>,
        expected: impl Into<String>,
        actual: &Value,
    ) -> Self {
        RuntimeError::TypeMismatch {
            operand: operand.into(),
            expected: expected.into(),
            actual: actual.type_name().to_string(),
        }
    }

    pub fn arity(function: &str, expected: impl std::fmt::Display, actual: usize) -> Self {
        RuntimeError::TypeMismatch {
            operand: format!("arguments to `{}`", function),
            expected: format!("{} argument(s)", expected),
            actual: format!("{} argument(s)", actual),
        }
    }

    /// The innermost error, looking through `LoopAborted` wrappers.
    pub fn root_cause(&self) -> &RuntimeError {
        let mut current = self;
        while let RuntimeError::LoopAborted { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            RuntimeError::UnboundIdentifier { .. } => ErrorKind::UnboundIdentifier,
            RuntimeError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            RuntimeError::NoMatch { .. } => ErrorKind::NoMatch,
            RuntimeError::RecurOutsideLoop => ErrorKind::RecurOutsideLoop,
            RuntimeError::Model(_) => ErrorKind::Model,
            RuntimeError::StackOverflow { .. } => ErrorKind::StackOverflow,
            RuntimeError::DivisionByZero => ErrorKind::DivisionByZero,
            RuntimeError::LoopAborted { .. } | RuntimeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The loop states recorded on the way out, outermost loop first.
    pub fn loop_states(&self) -> Vec<&Value> {
        let mut states = Vec::new();
        let mut current = self;
        while let RuntimeError::LoopAborted {
            last_state, source, ..
        } = current
        {
            states.push(last_state);
            current = source;
        }
        states
    }

    pub fn model_error(&self) -> Option<&ModelError> {
        match self.root_cause() {
            RuntimeError::Model(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatcher::PermanentReason;

    #[test]
    fn root_cause_unwraps_nested_loops() {
        let inner = RuntimeError::Model(ModelError::Permanent {
            reason: PermanentReason::ParseError,
            message: "not json".to_string(),
        });
        let wrapped = RuntimeError::LoopAborted {
            iteration: 2,
            last_state: Value::Integer(1),
            source: Box::new(RuntimeError::LoopAborted {
                iteration: 5,
                last_state: Value::Integer(2),
                source: Box::new(inner),
            }),
        };
        assert_eq!(wrapped.kind(), ErrorKind::Model);
        assert!(wrapped.model_error().is_some());
        assert_eq!(
            wrapped.loop_states(),
            vec![&Value::Integer(1), &Value::Integer(2)]
        );
    }

    #[test]
    fn arity_errors_are_type_mismatches() {
        let err = RuntimeError::arity("join", 2, 3);
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            err.to_string(),
            "type mismatch in arguments to `join`: expected 2 argument(s), got 3 argument(s)"
        );
    }
}
