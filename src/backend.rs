//! Generation backend contract
//!
//! The text-generation backend is an external collaborator: prompt in, text
//! out, with a coarse failure classification. Nothing here knows about any
//! particular provider or wire protocol.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;

/// Default per-call timeout when the caller does not supply one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A single generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub messages: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            temperature: 0.7,
            max_tokens: 2048,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Trait for generation backends
///
/// Implementations must be thread-safe; the parallel strategy calls
/// `generate` from several spawned tasks at once.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text for the given request
    async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError>;
}

/// Strip a markdown code fence from backend output, if present
///
/// Backends frequently wrap requested JSON in ```json fences; plan and
/// learning parsing both want the raw payload.
pub(crate) fn extract_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Human-readable description of a backend failure, suitable for logs and
/// for the caller-facing result string. Never a raw trace.
pub(crate) fn describe_backend_error(err: &BackendError) -> String {
    match err {
        BackendError::RateLimited => "the generation backend rate limited the request".to_string(),
        BackendError::Timeout => "the generation backend call timed out".to_string(),
        BackendError::Unauthorized => {
            "the generation backend rejected the credentials".to_string()
        }
        BackendError::Unknown(detail) => format!("the generation backend failed: {detail}"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for tests: pops canned responses in call order.

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    pub(crate) struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<String, BackendError>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(responses: Vec<Result<String, BackendError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// All requests seen so far, in call order
        pub(crate) fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().clone()
        }

        pub(crate) fn call_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Unknown("script exhausted".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payload_plain() {
        assert_eq!(extract_payload("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_payload_fenced() {
        let fenced = "```json\n{\"strategy\": \"simple\"}\n```";
        assert_eq!(extract_payload(fenced), "{\"strategy\": \"simple\"}");
    }

    #[test]
    fn test_extract_payload_fence_without_tag() {
        let fenced = "```\n[1, 2]\n```";
        assert_eq!(extract_payload(fenced), "[1, 2]");
    }

    #[tokio::test]
    async fn test_scripted_backend_pops_in_order() {
        let backend = testing::ScriptedBackend::new(vec![
            Ok("first".into()),
            Err(BackendError::RateLimited),
        ]);

        let req = GenerateRequest::new("sys", vec!["hi".into()]);
        assert_eq!(backend.generate(req.clone()).await.unwrap(), "first");
        assert_eq!(
            backend.generate(req).await.unwrap_err(),
            BackendError::RateLimited
        );
        assert_eq!(backend.call_count(), 2);
    }
}
