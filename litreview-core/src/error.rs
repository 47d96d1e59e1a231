//! Error types for the LitReview client core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering query validation, the REST API, the live channel, and configuration.

/// Top-level error type for the LitReview core library.
#[derive(Debug, thiserror::Error)]
pub enum LitReviewError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Live channel error: {0}")]
    Live(#[from] LiveError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised before a run is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("At least one keyword is required")]
    EmptyKeywords,

    #[error("max_papers must be between {min} and {max}, got {value}")]
    MaxPapersOutOfRange { value: u32, min: u32, max: u32 },
}

/// Errors from the pipeline REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Backend returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Pipeline session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Pipeline {session_id} is still running")]
    StillRunning { session_id: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Errors from the live update channel.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("Invalid live channel URL: {url}")]
    InvalidUrl { url: String },

    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// A type alias for results using the top-level `LitReviewError`.
pub type Result<T> = std::result::Result<T, LitReviewError>;
