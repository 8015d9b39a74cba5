// Flowscript Library
// A small pipe-oriented language for orchestrating generative model agents
pub mod ast;
pub mod config;
pub mod parser;
pub mod runtime;
pub mod stack;

// Re-export the parsing entry points and the AST.
pub use ast::*;
pub use parser::{parse_expression, parse_program, ParseError, ParseErrorKind};

// Re-export the pieces needed to run a workflow.
pub use config::{ConfigError, FlowConfig};
pub use runtime::{
    EffectDispatcher, Evaluator, EvaluatorConfig, ModelBackend, RuntimeError, Value, Workflow,
    WorkflowError, WorkflowRunner,
};
