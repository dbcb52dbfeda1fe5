// fusillade-engine: Error types

use std::collections::HashMap;
use thiserror::Error;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Bytes kept of an error response body
pub const SNIPPET_CAP: usize = 1024;

/// Engine error taxonomy
///
/// Every attempt outcome that is not a success maps onto exactly one of
/// these kinds; `status_bucket` turns the kind into the roll-up key the
/// metrics collector counts under.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("request build failed: {0}")]
    BuildFailed(String),

    #[error("transport error: {0}")]
    TransportIo(String),

    #[error("status {status}: {snippet}")]
    TransportStatus { status: u16, snippet: String },

    #[error("grpc {code}: {message}")]
    GrpcStatus {
        code: String,
        code_value: i32,
        message: String,
    },

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("feeder exhausted")]
    FeederExhausted,
}

impl EngineError {
    /// Whether the retry decorator may re-invoke the inner requester
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::TransportIo(_) | EngineError::HandshakeFailed(_) => true,
            EngineError::TransportStatus { status, .. } => *status == 429 || *status >= 500,
            EngineError::GrpcStatus { code, .. } => matches!(
                code.as_str(),
                "Unavailable" | "ResourceExhausted" | "Internal" | "DeadlineExceeded"
            ),
            _ => false,
        }
    }

    /// Custom counters a failed attempt still carries
    ///
    /// A gRPC status means one message went out and the server answered
    /// with a code, so those counters survive the failure.
    pub fn failure_counters(&self) -> HashMap<String, u64> {
        let mut counters = HashMap::new();
        if let EngineError::GrpcStatus { code_value, .. } = self {
            counters.insert("status_code".to_string(), *code_value as u64);
            counters.insert("messages_sent".to_string(), 1);
        }
        counters
    }

    /// Roll-up key for the status-bucket counters
    pub fn status_bucket(&self) -> String {
        match self {
            EngineError::TransportStatus { status, .. } => status.to_string(),
            EngineError::GrpcStatus { code, .. } => code.clone(),
            EngineError::ConfigInvalid(_) => "config_invalid".to_string(),
            EngineError::BuildFailed(_) => "build_failed".to_string(),
            EngineError::TransportIo(_) => "transport_io".to_string(),
            EngineError::HandshakeFailed(_) => "handshake_failed".to_string(),
            EngineError::DeadlineExceeded => "deadline_exceeded".to_string(),
            EngineError::Cancelled => "cancelled".to_string(),
            EngineError::AuthFailed(_) => "auth_failed".to_string(),
            EngineError::FeederExhausted => "feeder_exhausted".to_string(),
        }
    }
}

/// Truncate an error response body to the snippet cap
pub fn truncate_snippet(body: &str) -> String {
    if body.len() <= SNIPPET_CAP {
        return body.to_string();
    }
    let mut end = SNIPPET_CAP;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(EngineError::TransportStatus {
            status: 429,
            snippet: String::new()
        }
        .is_retryable());
        assert!(EngineError::TransportStatus {
            status: 503,
            snippet: String::new()
        }
        .is_retryable());
        assert!(!EngineError::TransportStatus {
            status: 404,
            snippet: String::new()
        }
        .is_retryable());
        assert!(EngineError::TransportIo("connection refused".to_string()).is_retryable());
        assert!(!EngineError::DeadlineExceeded.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::AuthFailed("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_grpc_retryable_codes() {
        let unavailable = EngineError::GrpcStatus {
            code: "Unavailable".to_string(),
            code_value: 14,
            message: String::new(),
        };
        let not_found = EngineError::GrpcStatus {
            code: "NotFound".to_string(),
            code_value: 5,
            message: String::new(),
        };
        assert!(unavailable.is_retryable());
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_grpc_failure_keeps_status_code_counter() {
        let err = EngineError::GrpcStatus {
            code: "Unavailable".to_string(),
            code_value: 14,
            message: String::new(),
        };
        let counters = err.failure_counters();
        assert_eq!(counters.get("status_code"), Some(&14));
        assert_eq!(counters.get("messages_sent"), Some(&1));

        assert!(EngineError::DeadlineExceeded.failure_counters().is_empty());
        assert!(EngineError::TransportStatus {
            status: 500,
            snippet: String::new()
        }
        .failure_counters()
        .is_empty());
    }

    #[test]
    fn test_status_buckets() {
        let err = EngineError::TransportStatus {
            status: 502,
            snippet: String::new(),
        };
        assert_eq!(err.status_bucket(), "502");
        assert_eq!(EngineError::DeadlineExceeded.status_bucket(), "deadline_exceeded");
    }

    #[test]
    fn test_snippet_truncation() {
        let long = "x".repeat(4096);
        assert_eq!(truncate_snippet(&long).len(), SNIPPET_CAP);
        assert_eq!(truncate_snippet("short"), "short");

        // Multi-byte boundary must not be split
        let multi = "é".repeat(1000);
        let snippet = truncate_snippet(&multi);
        assert!(snippet.len() <= SNIPPET_CAP);
        assert!(multi.starts_with(&snippet));
    }
}
