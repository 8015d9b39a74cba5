//! Effect dispatcher: the only path from the evaluator to a model backend.
//!
//! Every call gets a sequence number, a per-attempt timeout and bounded
//! exponential backoff between transient failures. Transient failures never
//! leave [`EffectDispatcher::invoke`]: they are either retried or escalated
//! to [`ModelError::Permanent`] once the attempt budget is spent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::runtime::coercion::{JsonGrammar, ResponseGrammar};
use crate::runtime::host_interface::{BackendError, ModelBackend, ModelRequest};
use crate::runtime::values::{ModelTemplate, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentReason {
    /// The backend refused the request (malformed input, policy rejection).
    Rejected,
    RetriesExhausted { attempts: u32 },
    /// A response could not be coerced into structured data.
    ParseError,
}

impl fmt::Display for PermanentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentReason::Rejected => write!(f, "rejected"),
            PermanentReason::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {} attempts", attempts)
            }
            PermanentReason::ParseError => write!(f, "parse error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("transient model failure: {message}")]
    Transient { message: String },
    #[error("model failure ({reason}): {message}")]
    Permanent {
        reason: PermanentReason,
        message: String,
    },
}

impl ModelError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        ModelError::Permanent {
            reason: PermanentReason::ParseError,
            message: message.into(),
        }
    }

    /// Value of the `kind` field of the error value `try(...)` produces.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ModelError::Transient { .. } => "transient",
            ModelError::Permanent {
                reason: PermanentReason::ParseError,
                ..
            } => "parse_error",
            ModelError::Permanent { .. } => "permanent",
        }
    }
}

/// Timeout and backoff settings applied to every model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug)]
pub struct EffectDispatcher {
    backend: Arc<dyn ModelBackend>,
    policy: RetryPolicy,
    grammar: Arc<dyn ResponseGrammar>,
    sequence: AtomicU64,
}

impl EffectDispatcher {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        EffectDispatcher {
            backend,
            policy: RetryPolicy::default(),
            grammar: Arc::new(JsonGrammar),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_grammar(mut self, grammar: Arc<dyn ResponseGrammar>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Grammar used by the `object` builtin.
    pub fn grammar(&self) -> Arc<dyn ResponseGrammar> {
        self.grammar.clone()
    }

    /// Number of invocations started so far.
    pub fn invocations(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Calls the backend with `input` as prompt context. Succeeds with the
    /// response text as a string value.
    pub async fn invoke(&self, template: &ModelTemplate, input: Value) -> Result<Value, ModelError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let prompt = render_prompt(&template.template, &input);
        info!(
            sequence,
            backend = self.backend.name(),
            template = %preview(&template.template),
            "model invocation started"
        );

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let request = ModelRequest {
                sequence,
                attempt,
                template: template.template.clone(),
                context: input.clone(),
                prompt: prompt.clone(),
                options: template.options.clone(),
            };

            let outcome = match tokio::time::timeout(self.policy.timeout, self.backend.invoke(&request)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::transient(format!(
                    "timed out after {} ms",
                    self.policy.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(text) => {
                    info!(sequence, attempt, chars = text.len(), "model invocation succeeded");
                    return Ok(Value::String(text));
                }
                Err(err) if !err.is_transient() => {
                    warn!(sequence, attempt, error = %err.message, "model invocation rejected");
                    return Err(ModelError::Permanent {
                        reason: PermanentReason::Rejected,
                        message: err.message,
                    });
                }
                Err(err) if attempt >= self.policy.max_attempts => {
                    warn!(sequence, attempts = attempt, error = %err.message, "model invocation retries exhausted");
                    return Err(ModelError::Permanent {
                        reason: PermanentReason::RetriesExhausted { attempts: attempt },
                        message: err.message,
                    });
                }
                Err(err) => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        sequence,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.message,
                        "transient model failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn preview(template: &str) -> String {
    let first_line = template.lines().next().unwrap_or("");
    if first_line.chars().count() > 60 {
        let cut: String = first_line.chars().take(60).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}

// --- Prompt rendering ---

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z_][A-Za-z0-9_\-]*)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Fills `{{input}}`, `{{input.a.b}}` and `{{a.b}}` placeholders from `context`.
/// Placeholders that do not resolve are left as written.
pub fn render_prompt(template: &str, context: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let path: Vec<&str> = caps[1].split('.').collect();
            let resolved = match path.split_first() {
                Some((&"input", rest)) => lookup_path(context, rest),
                _ => lookup_path(context, &path),
            };
            match resolved {
                Some(value) => value.render_text(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lookup_path<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(*segment)?;
    }
    debug!(path = ?path, "resolved prompt placeholder");
    Some(current)
}
