//! Error taxonomy for the pipeline.
//!
//! Four families, matching how callers must react:
//! - `InvalidInput`: rejected immediately, no partial processing
//! - `Upstream`: a backend (vector store, embedding provider) failed after
//!   its bounded retries
//! - `Timeout`: the overall deadline elapsed; never degraded to a partial
//!   result
//! - `Internal`: unexpected state inside the pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream '{service}' failed: {message}")]
    Upstream { service: String, message: String },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidInput(message.into())
    }

    pub fn upstream(service: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RagError::Upstream {
            service: service.into(),
            message: err.to_string(),
        }
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        RagError::Internal(err.to_string())
    }

    /// Whether retrying the operation could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RagError::Upstream { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RagError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        let upstream = RagError::upstream("vector_store", "connection refused");
        assert!(upstream.is_recoverable());
        assert!(!upstream.is_timeout());

        let timeout = RagError::Timeout(5_000);
        assert!(timeout.is_timeout());
        assert!(!timeout.is_recoverable());

        let invalid = RagError::invalid("empty batch");
        assert!(!invalid.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = RagError::upstream("embedding", "503");
        assert_eq!(err.to_string(), "upstream 'embedding' failed: 503");
    }
}
