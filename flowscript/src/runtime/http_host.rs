//! Backend for OpenAI-compatible chat completion endpoints.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::runtime::host_interface::{BackendError, ModelBackend, ModelRequest};

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpBackend {
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `model` - default model name; a `model` option on the template wins
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        HttpBackend {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn body(&self, request: &ModelRequest) -> Result<serde_json::Value, BackendError> {
        let mut body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        })
        .map_err(|e| BackendError::permanent(format!("cannot encode request: {}", e)))?;
        if let Some(fields) = body.as_object_mut() {
            for (key, value) in &request.options {
                let value = value
                    .to_json()
                    .map_err(|e| BackendError::permanent(format!("option `{}`: {}", key, e)))?;
                fields.insert(key.clone(), value);
            }
        }
        Ok(body)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Throttling, request timeouts and server faults are worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl ModelBackend for HttpBackend {
    #[instrument(skip(self, request), fields(model = %self.model, sequence = request.sequence, attempt = request.attempt))]
    async fn invoke(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let body = self.body(request)?;
        let mut call = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| BackendError::transient(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("endpoint returned {}: {}", status, detail.trim());
            return Err(if is_transient_status(status) {
                BackendError::transient(message)
            } else {
                BackendError::permanent(message)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::permanent(format!("unreadable response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::permanent("response has no message content"))?;
        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::values::Value;
    use indexmap::IndexMap;

    #[test]
    fn status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn template_options_are_merged_into_the_body() {
        let backend = HttpBackend::new("http://localhost:8080/v1/", "small");
        let mut options = IndexMap::new();
        options.insert("temperature".to_string(), Value::Float(0.2));
        options.insert("model".to_string(), Value::string("large"));
        let request = ModelRequest {
            sequence: 1,
            attempt: 1,
            template: "t".into(),
            context: Value::Null,
            prompt: "hello".into(),
            options,
        };
        let body = backend.body(&request).unwrap();
        assert_eq!(body["model"], "large");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(backend.base_url, "http://localhost:8080/v1");
    }
}
