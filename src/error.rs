use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Request failed validation (missing type, missing required parameter, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No enricher or resource matched the lookup
    #[error("Not found: {0}")]
    NotFound(String),

    /// Third-party provider call failed
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// Provider payload could not be mapped to the target shape
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Fail-fast batch stopped at the first failed item
    #[error("Batch aborted at item {index}: {message}")]
    BatchAborted { index: usize, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build a provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Provider { .. } => "PROVIDER_ERROR",
            AppError::Mapping(_) => "MAPPING_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::BatchAborted { .. } => "BATCH_ABORTED",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short label used for the `error_kind` metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Provider { .. } => "provider",
            AppError::Mapping(_) => "mapping",
            AppError::Cache(_) => "cache",
            AppError::Timeout(_) => "timeout",
            AppError::Configuration(_) => "configuration",
            AppError::Serialization(_) => "serialization",
            AppError::BatchAborted { .. } => "batch_aborted",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the error reflects a caller mistake rather than a fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::NotFound(_))
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from redis::RedisError
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
