//! Configuration for flowscript runs
//!
//! Loaded from TOML. Every key is optional; missing keys take the defaults
//! of [`EvaluatorConfig`] and [`RetryPolicy`].
//!
//! ```toml
//! [runtime]
//! max_call_depth = 256
//!
//! [model]
//! timeout_ms = 30000
//! grammar = "key-value"
//!
//! [backend]
//! kind = "http"
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::coercion::{grammar_by_name, ResponseGrammar};
use crate::runtime::dispatcher::{EffectDispatcher, RetryPolicy};
use crate::runtime::echo_host::EchoBackend;
use crate::runtime::evaluator::EvaluatorConfig;
use crate::runtime::host_interface::ModelBackend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown response grammar `{0}` (expected \"json\" or \"key-value\")")]
    UnknownGrammar(String),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("backend `{0}` is not available in this build")]
    BackendUnavailable(String),
    #[error("environment variable `{0}` is not set")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub runtime: RuntimeSettings,
    pub model: ModelSettings,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub max_call_depth: usize,
    pub parallel_bindings: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let defaults = EvaluatorConfig::default();
        RuntimeSettings {
            max_call_depth: defaults.max_call_depth,
            parallel_bindings: defaults.parallel_bindings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Grammar used by `object()`: "json" or "key-value".
    pub grammar: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        ModelSettings {
            timeout_ms: policy.timeout.as_millis() as u64,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            grammar: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Echo,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            kind: BackendKind::Echo,
            base_url: "http://localhost:8080/v1".to_string(),
            model: "default".to_string(),
            api_key_env: None,
        }
    }
}

impl FlowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "model.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.model.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "model.timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.model.backoff_multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                key: "model.backoff_multiplier",
                reason: format!("{} is below 1.0", self.model.backoff_multiplier),
            });
        }
        if self.runtime.max_call_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "runtime.max_call_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        self.grammar().map(|_| ())
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            max_call_depth: self.runtime.max_call_depth,
            parallel_bindings: self.runtime.parallel_bindings,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.model.max_attempts,
            timeout: Duration::from_millis(self.model.timeout_ms),
            initial_backoff: Duration::from_millis(self.model.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.model.max_backoff_ms),
            backoff_multiplier: self.model.backoff_multiplier,
        }
    }

    pub fn grammar(&self) -> Result<Arc<dyn ResponseGrammar>, ConfigError> {
        grammar_by_name(&self.model.grammar)
            .map(Arc::from)
            .ok_or_else(|| ConfigError::UnknownGrammar(self.model.grammar.clone()))
    }

    pub fn backend(&self) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        match self.backend.kind {
            BackendKind::Echo => Ok(Arc::new(EchoBackend::new())),
            BackendKind::Http => self.http_backend(),
        }
    }

    #[cfg(feature = "http")]
    fn http_backend(&self) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        let mut backend =
            crate::runtime::http_host::HttpBackend::new(&self.backend.base_url, &self.backend.model);
        if let Some(var) = &self.backend.api_key_env {
            let key = std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var.clone()))?;
            backend = backend.with_api_key(key);
        }
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "http"))]
    fn http_backend(&self) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        Err(ConfigError::BackendUnavailable("http".to_string()))
    }

    /// Dispatcher over `backend` with this config's retry policy and grammar.
    pub fn dispatcher_for(&self, backend: Arc<dyn ModelBackend>) -> Result<EffectDispatcher, ConfigError> {
        Ok(EffectDispatcher::new(backend)
            .with_policy(self.retry_policy())
            .with_grammar(self.grammar()?))
    }

    pub fn dispatcher(&self) -> Result<EffectDispatcher, ConfigError> {
        self.dispatcher_for(self.backend()?)
    }
}
