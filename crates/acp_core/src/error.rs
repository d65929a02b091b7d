use serde::{Deserialize, Serialize};
use std::fmt;

pub const INVALID_CONFIGURATION: &str = "INVALID_CONFIGURATION";
pub const EMBEDDING_UNAVAILABLE: &str = "EMBEDDING_UNAVAILABLE";
pub const GENERATION_UNAVAILABLE: &str = "GENERATION_UNAVAILABLE";
pub const EMPTY_INDEX: &str = "EMPTY_INDEX";
pub const INGESTION_IN_PROGRESS: &str = "INGESTION_IN_PROGRESS";
pub const INDEX_CORRUPTION: &str = "INDEX_CORRUPTION";
pub const INDEX_IO_FAILED: &str = "INDEX_IO_FAILED";
pub const QUERY_INVALID: &str = "QUERY_INVALID";
pub const QUERY_CANCELLED: &str = "QUERY_CANCELLED";
pub const DOCUMENT_INVALID: &str = "DOCUMENT_INVALID";
pub const DOCUMENT_NOT_FOUND: &str = "DOCUMENT_NOT_FOUND";
pub const OLLAMA_UNHEALTHY: &str = "OLLAMA_UNHEALTHY";
pub const OLLAMA_UNREACHABLE: &str = "OLLAMA_UNREACHABLE";

/// Single structured error shape shared by every pipeline stage and returned to callers.
///
/// `code` is one of the constants in this module. `retryable` tells the caller whether
/// resubmitting the same request can succeed (service unavailable, ingestion busy) or
/// not (bad configuration, corrupt index, empty scope).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(INVALID_CONFIGURATION, message)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details.as_deref() {
            Some(d) => write!(f, "[{}] {} ({})", self.code, self.message, d),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}
