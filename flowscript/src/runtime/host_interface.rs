//! Defines the `ModelBackend` trait that decouples the runtime from any concrete
//! generative-model service.

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

use crate::runtime::values::Value;

/// One attempt at a model call, as seen by a backend.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Invocation sequence number, shared by every retry of the same call.
    pub sequence: u64,
    /// 1-based attempt number within the invocation.
    pub attempt: u32,
    pub template: String,
    /// The value piped into the model handle.
    pub context: Value,
    /// Template with placeholders filled from `context`.
    pub prompt: String,
    pub options: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Transient,
    Permanent,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Transient => write!(f, "transient"),
            BackendErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} backend failure: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }
}

/// `ModelBackend` is the single contract between the evaluator's effect
/// dispatcher and a generative-model service.
///
/// Implementations only perform one attempt; timeouts, retries and backoff are
/// applied by the dispatcher around this call. A backend reports throttling,
/// timeouts and network faults as [`BackendErrorKind::Transient`] and rejected
/// or malformed requests as [`BackendErrorKind::Permanent`].
#[async_trait]
pub trait ModelBackend: Send + Sync + fmt::Debug {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, BackendError>;

    fn name(&self) -> &str {
        "backend"
    }
}
