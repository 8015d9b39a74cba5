//! Offline backend for dry runs and tests.
//!
//! Returns the rendered prompt unchanged, so a workflow can be exercised end to
//! end without any model service.

use async_trait::async_trait;

use crate::runtime::host_interface::{BackendError, ModelBackend, ModelRequest};

#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, BackendError> {
        Ok(request.prompt.clone())
    }

    fn name(&self) -> &str {
        "echo"
    }
}
