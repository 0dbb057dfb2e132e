//! Error types for the gateway core

use thiserror::Error;

/// Result type alias for the gateway core
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway core
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity lookup failures (model, provider, account, task)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller does not own the addressed resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation illegal in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Provider circuit open or no healthy candidate
    #[error("Unhealthy: {0}")]
    Unhealthy(String),

    /// Routing pipeline produced no candidate
    #[error("Routing error: {0}")]
    Routing(String),

    /// Upstream returned non-2xx or a transport failure occurred
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Poll cap or deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Requested operation is not supported by the selected adapter
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Encryption or decryption failures
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Repository failures other than NotFound
    #[error("Repository error: {0}")]
    Repository(String),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether a fallback re-route may recover from this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unhealthy(_)
                | GatewayError::Upstream(_)
                | GatewayError::Timeout(_)
                | GatewayError::HttpClient(_)
        )
    }
}
