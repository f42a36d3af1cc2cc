//! LLM provider client.
//!
//! [`Provider`] routes a message history to a named backend (`openai`,
//! `ollama`, `test`) and normalizes failures into the three observable
//! classes the conversation engine relies on:
//!
//! - recoverable overload -> in-band "try again later" answer string
//! - connection refused / unreachable -> in-band "server offline" string
//! - anything else -> [`Error::Provider`], raised
//!
//! A cooperative interrupt flag translates a user cancel into the
//! [`REQUEST_EXIT`] sentinel instead of an error. Cloud providers are marked
//! unsafe: constructing one with `is_local = false` logs a warning and
//! resolves `<PROVIDER>_API_KEY` from the environment.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{docker_internal_url, env_api_key};
use crate::error::{Error, Result};
use crate::types::{
    ChatWireMessage, Message, OllamaChatRequest, OllamaChatResponse, OpenAiChatRequest,
    OpenAiChatResponse,
};

/// Sentinel appended to the in-band answer when the user interrupts a
/// generation. Callers treat an answer containing this marker as a cancel.
pub const REQUEST_EXIT: &str = "REQUEST_EXIT";

/// Providers that ship data to a third-party cloud.
const UNSAFE_PROVIDERS: &[&str] = &[
    "openai",
    "deepseek",
    "dsk_deepseek",
    "together",
    "google",
    "openrouter",
];

/// Default canned answer served by the `test` backend.
const TEST_BACKEND_ANSWER: &str = "<think>\nThe query is a routine request; \
a short direct reply covers it.\n</think>\nThis is a canned answer from the \
test backend.";

// ============================================================================
// TEST BACKEND SCRIPT
// ============================================================================

/// Scripted outcomes for the `test` backend.
///
/// Tests push `Ok` answers or `Err` backend failures; `respond` consumes them
/// in order and falls back to a canned answer when the script runs dry. The
/// handle is cheap to clone and can be held after the provider is built.
#[derive(Debug, Clone, Default)]
pub struct TestScript {
    outcomes: Arc<Mutex<VecDeque<std::result::Result<String, String>>>>,
}

impl TestScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful generation.
    pub fn push_answer(&self, text: impl Into<String>) {
        self.outcomes.lock().push_back(Ok(text.into()));
    }

    /// Queue a backend failure with the given message.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.outcomes.lock().push_back(Err(message.into()));
    }

    fn next(&self) -> std::result::Result<String, String> {
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(TEST_BACKEND_ANSWER.to_string()))
    }
}

// ============================================================================
// BACKENDS
// ============================================================================

#[derive(Debug)]
enum Backend {
    /// OpenAI-compatible `POST {base}/v1/chat/completions`.
    OpenAi,
    /// Ollama native `POST {base}/api/chat`.
    Ollama,
    /// In-process scripted responder for tests.
    Test(TestScript),
}

// ============================================================================
// PROVIDER
// ============================================================================

/// Stateless text-generation client over a message history.
#[derive(Debug)]
pub struct Provider {
    provider_name: String,
    model: String,
    server_address: String,
    is_local: bool,
    api_key: Option<String>,
    backend: Backend,
    http: reqwest::Client,
    interrupted: AtomicBool,
}

impl Provider {
    /// Construct a provider client.
    ///
    /// Unknown backend names are a fatal configuration error. Cloud
    /// providers used with `is_local = false` log a data-leaves-the-machine
    /// warning and require `<PROVIDER>_API_KEY` in the environment.
    pub fn new(
        provider_name: &str,
        model: &str,
        server_address: &str,
        is_local: bool,
    ) -> Result<Self> {
        let provider_name = provider_name.to_lowercase();

        let backend = match provider_name.as_str() {
            "openai" => Backend::OpenAi,
            "ollama" => Backend::Ollama,
            "test" => Backend::Test(TestScript::new()),
            other => return Err(Error::config(format!("Unknown provider: {other}"))),
        };

        let mut api_key = None;
        if UNSAFE_PROVIDERS.contains(&provider_name.as_str()) && !is_local {
            tracing::warn!(
                provider = %provider_name,
                "using an API provider: your data will be sent to the cloud"
            );
            api_key = Some(env_api_key(&provider_name)?);
        } else if provider_name != "ollama" {
            tracing::info!(
                provider = %provider_name,
                address = %server_address,
                "provider initialized"
            );
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            provider_name,
            model: model.to_string(),
            server_address: server_address.to_string(),
            is_local,
            api_key,
            backend,
            http,
            interrupted: AtomicBool::new(false),
        })
    }

    /// The active model tag.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Backend tag this client routes to.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Whether the backend runs on local hardware.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Handle to the `test` backend script, when this provider uses it.
    pub fn test_script(&self) -> Option<TestScript> {
        match &self.backend {
            Backend::Test(script) => Some(script.clone()),
            _ => None,
        }
    }

    /// Request cooperative cancellation of the in-flight generation.
    ///
    /// Safe to call from any task; the next `respond` boundary returns the
    /// [`REQUEST_EXIT`] sentinel instead of a model answer.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Generate a completion for the history.
    ///
    /// Overload and connectivity failures come back as `Ok` human-readable
    /// strings; only unexpected failures raise.
    pub async fn respond(&self, history: &[Message]) -> Result<String> {
        if self.interrupted.swap(false, Ordering::SeqCst) {
            tracing::warn!("user interrupted the generation before dispatch");
            return Ok(format!("Operation interrupted by user. {REQUEST_EXIT}"));
        }

        let outcome = self.call_backend(history).await;

        // An interrupt that landed while the call was in flight wins over
        // whatever the backend produced.
        if self.interrupted.swap(false, Ordering::SeqCst) {
            tracing::warn!("user interrupted the generation mid-flight");
            return Ok(format!("Operation interrupted by user. {REQUEST_EXIT}"));
        }

        match outcome {
            Ok(text) => Ok(text),
            Err(err) => self.normalize_error(err),
        }
    }

    /// Map a backend failure onto the observable error classes.
    fn normalize_error(&self, err: Error) -> Result<String> {
        let message = err.to_string();
        let lower = message.to_lowercase();

        if lower.contains("try again later") {
            tracing::warn!(provider = %self.provider_name, "provider overloaded");
            return Ok(format!(
                "{} server is overloaded. Please try again later.",
                self.provider_name
            ));
        }

        let refused = lower.contains("refused")
            || matches!(&err, Error::Http(e) if e.is_connect() || e.is_timeout());
        if refused {
            tracing::warn!(
                provider = %self.provider_name,
                address = %self.server_address,
                "provider unreachable"
            );
            return Ok(format!(
                "Server {} seem offline. Unable to answer.",
                self.server_address
            ));
        }

        Err(Error::provider(&self.provider_name, message))
    }

    async fn call_backend(&self, history: &[Message]) -> Result<String> {
        match &self.backend {
            Backend::OpenAi => self.openai_chat(history).await,
            Backend::Ollama => self.ollama_chat(history).await,
            Backend::Test(script) => match script.next() {
                Ok(text) => Ok(text),
                Err(message) => Err(Error::other(message)),
            },
        }
    }

    /// Base URL with scheme, honoring the `DOCKER_INTERNAL_URL` rewrite for
    /// localhost addresses.
    fn base_url(&self) -> String {
        let addr = self.server_address.trim_end_matches('/');
        let with_scheme = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        if let Some(internal) = docker_internal_url() {
            if with_scheme.contains("localhost") || with_scheme.contains("127.0.0.1") {
                let port = with_scheme.rsplit(':').next().unwrap_or("").to_string();
                let internal = internal.trim_end_matches('/');
                return if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() {
                    format!("{internal}:{port}")
                } else {
                    internal.to_string()
                };
            }
        }
        with_scheme
    }

    async fn openai_chat(&self, history: &[Message]) -> Result<String> {
        let request = OpenAiChatRequest {
            model: self.model.clone(),
            messages: history.iter().map(ChatWireMessage::from).collect(),
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());
        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(Error::Http)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::other(format!("OpenAI API error {status}: {body}")));
        }

        let parsed: OpenAiChatResponse = response.json().await.map_err(Error::Http)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::other("OpenAI response is empty"))
    }

    async fn ollama_chat(&self, history: &[Message]) -> Result<String> {
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: history.iter().map(ChatWireMessage::from).collect(),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url());
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(600))
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::other(format!("Ollama API error {status}: {body}")));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(Error::Http)?;
        Ok(parsed.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn history() -> Vec<Message> {
        vec![
            Message::new(Role::System, "You are helpful", "test-model"),
            Message::new(Role::User, "hello", "test-model"),
        ]
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let err = Provider::new("frobnicate", "m", "127.0.0.1:1", true).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_canned_answer_when_script_empty() {
        let provider = Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap();
        let answer = provider.respond(&history()).await.unwrap();
        assert!(answer.contains("canned answer"));
    }

    #[tokio::test]
    async fn test_scripted_answers_consumed_in_order() {
        let provider = Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap();
        let script = provider.test_script().unwrap();
        script.push_answer("first");
        script.push_answer("second");

        assert_eq!(provider.respond(&history()).await.unwrap(), "first");
        assert_eq!(provider.respond(&history()).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_overload_is_in_band() {
        let provider = Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap();
        let script = provider.test_script().unwrap();
        script.push_failure("model busy, try again later");

        let answer = provider.respond(&history()).await.unwrap();
        assert_eq!(
            answer,
            "test server is overloaded. Please try again later."
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_in_band() {
        let provider = Provider::new("test", "test-model", "10.0.0.9:5000", true).unwrap();
        let script = provider.test_script().unwrap();
        script.push_failure("connection refused by peer");

        let answer = provider.respond(&history()).await.unwrap();
        assert_eq!(answer, "Server 10.0.0.9:5000 seem offline. Unable to answer.");
    }

    #[tokio::test]
    async fn test_unexpected_failure_raises() {
        let provider = Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap();
        let script = provider.test_script().unwrap();
        script.push_failure("schema mismatch in response");

        let err = provider.respond(&history()).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[tokio::test]
    async fn test_interrupt_returns_sentinel() {
        let provider = Provider::new("test", "test-model", "127.0.0.1:1", true).unwrap();
        provider.interrupt();

        let answer = provider.respond(&history()).await.unwrap();
        assert!(answer.contains(REQUEST_EXIT));

        // Flag is consumed: the next call generates normally.
        let answer = provider.respond(&history()).await.unwrap();
        assert!(!answer.contains(REQUEST_EXIT));
    }

    #[test]
    fn test_cloud_provider_requires_api_key() {
        // SAFETY: test-scoped env mutation; no other test in this binary
        // reads or writes OPENAI_API_KEY.
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
        }
        let err = Provider::new("openai", "m", "api.openai.com", false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // SAFETY: as above.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-test");
        }
        let provider = Provider::new("openai", "m", "api.openai.com", false).unwrap();
        assert_eq!(provider.provider_name(), "openai");
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
        }
    }
}
