//! Error types for the orchestrator.
//!
//! Only failures that should abort a caller become `Error` variants.
//! Transient provider overload, connection-refused, and user interrupts are
//! normalized into in-band answer strings by the provider client and never
//! surface here; persistence failures are logged by the memory layer and the
//! turn still succeeds.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration: unknown provider backend, missing env var,
    /// unreadable settings file. Fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A heavyweight per-session resource (browser driver, document store)
    /// could not be acquired. Fatal to that session only; the session is
    /// never registered.
    #[error("Resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    /// Unexpected provider failure. Raised; the session survives.
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// Document-store I/O failure. Callers log this and keep the in-memory
    /// view authoritative.
    #[error("Memory persistence failed: {0}")]
    Persistence(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new resource acquisition error
    pub fn resource(msg: impl Into<String>) -> Self {
        Error::ResourceAcquisition(msg.into())
    }

    /// Create a new provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Unknown provider: frobnicate");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Unknown provider: frobnicate"
        );
    }

    #[test]
    fn test_error_resource() {
        let err = Error::resource("browser driver refused to start");
        assert!(matches!(err, Error::ResourceAcquisition(_)));
        assert_eq!(
            err.to_string(),
            "Resource acquisition failed: browser driver refused to start"
        );
    }

    #[test]
    fn test_error_provider() {
        let err = Error::provider("openai", "HTTP 500");
        assert!(matches!(err, Error::Provider { .. }));
        assert_eq!(err.to_string(), "Provider openai failed: HTTP 500");
    }

    #[test]
    fn test_error_persistence() {
        let err = Error::persistence("upsert timed out");
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(err.to_string(), "Memory persistence failed: upsert timed out");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::other("boom"))
        }
    }
}
