//! Flowscript runtime
//!
//! Values, environments, the async evaluator and the effect boundary to model
//! backends. [`workflow`] ties them together behind a program's `main`.

pub mod coercion;
pub mod dispatcher;
pub mod echo_host;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod host_interface;
#[cfg(feature = "http")]
pub mod http_host;
pub mod operators;
pub mod scripted_host;
pub mod stdlib;
pub mod values;
pub mod workflow;

pub use coercion::{grammar_by_name, JsonGrammar, KeyValueGrammar, ResponseGrammar};
pub use dispatcher::{EffectDispatcher, ModelError, PermanentReason, RetryPolicy};
pub use echo_host::EchoBackend;
pub use environment::Environment;
pub use error::{ErrorKind, RuntimeError, RuntimeResult};
pub use evaluator::{Evaluator, EvaluatorConfig};
pub use host_interface::{BackendError, BackendErrorKind, ModelBackend, ModelRequest};
#[cfg(feature = "http")]
pub use http_host::HttpBackend;
pub use scripted_host::{ScriptedBackend, ScriptedReply};
pub use stdlib::StandardLibrary;
pub use values::{ErrorValue, Function, Value};
pub use workflow::{
    HistoryEntry, RefinementReport, RefinementStatus, ReportError, Workflow, WorkflowError,
    WorkflowRunner,
};
