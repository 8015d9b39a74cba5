//! Deterministic backend driven by canned replies.
//!
//! Replies are keyed by a substring of the template or the rendered prompt.
//! Each key owns a queue; the last reply of a queue repeats once the others
//! are consumed. Every attempt is recorded so tests can assert how often a model was called.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::runtime::host_interface::{BackendError, ModelBackend, ModelRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    Transient(String),
    Permanent(String),
    /// Waits before producing the inner reply; used to trigger timeouts.
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        ScriptedReply::Text(s.into())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub sequence: u64,
    pub attempt: u32,
    pub template: String,
    pub prompt: String,
}

impl RecordedCall {
    fn mentions(&self, pattern: &str) -> bool {
        self.template.contains(pattern) || self.prompt.contains(pattern)
    }
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, VecDeque<ScriptedReply>)>,
    fallback: Option<ScriptedReply>,
    calls: Vec<RecordedCall>,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `replies` for calls mentioning `pattern`. Rules are tried
    /// in registration order.
    pub fn on(self, pattern: &str, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        {
            let mut script = self.lock();
            script
                .rules
                .push((pattern.to_string(), replies.into_iter().collect()));
        }
        self
    }

    /// Reply used when no rule matches.
    pub fn otherwise(self, reply: ScriptedReply) -> Self {
        self.lock().fallback = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of attempts whose template or prompt contained `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.mentions(pattern))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, request: &ModelRequest) -> Option<ScriptedReply> {
        let mut guard = self.lock();
        let script = &mut *guard;
        script.calls.push(RecordedCall {
            sequence: request.sequence,
            attempt: request.attempt,
            template: request.template.clone(),
            prompt: request.prompt.clone(),
        });
        let queue = script
            .rules
            .iter_mut()
            .find(|(pattern, _)| {
                request.template.contains(pattern.as_str()) || request.prompt.contains(pattern.as_str())
            })
            .map(|(_, queue)| queue);
        match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => script.fallback.clone(),
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let mut reply = self.next_reply(request).ok_or_else(|| {
            BackendError::permanent(format!("no scripted reply for `{}`", request.template))
        })?;
        loop {
            match reply {
                ScriptedReply::Text(text) => return Ok(text),
                ScriptedReply::Transient(message) => return Err(BackendError::transient(message)),
                ScriptedReply::Permanent(message) => return Err(BackendError::permanent(message)),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
