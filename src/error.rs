//! Error types for the gateway.
//!
//! Every [`GatewayError`] classifies into exactly one canonical [`ErrorKind`];
//! the per-protocol status codes and bodies live in [`crate::translate::errors`].

use thiserror::Error;

/// Canonical failure kinds shared by all wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedRequest,
    ModelNotFound,
    PermissionDenied,
    ContentBlocked,
    QuotaExceeded,
    Internal,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::MalformedRequest,
        ErrorKind::ModelNotFound,
        ErrorKind::PermissionDenied,
        ErrorKind::ContentBlocked,
        ErrorKind::QuotaExceeded,
        ErrorKind::Internal,
        ErrorKind::Unknown,
    ];
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Content blocked: {message}")]
    ContentBlocked { message: String },

    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Failure reported by the underlying provider, possibly with a nested status payload.
    #[error("{message}")]
    Provider { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: msg.into(),
        }
    }

    pub fn model_not_found(model: impl Into<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Resolve the canonical kind and client-facing message.
    ///
    /// Provider errors go through the nested-payload parser and fall back to
    /// `Unknown` with the raw message when nothing can be recovered.
    pub fn classify(&self) -> (ErrorKind, String) {
        match self {
            Self::MalformedRequest { message } => (ErrorKind::MalformedRequest, message.clone()),
            Self::ModelNotFound { model } => {
                (ErrorKind::ModelNotFound, format!("Model '{model}' not found"))
            }
            Self::PermissionDenied { message } => (ErrorKind::PermissionDenied, message.clone()),
            Self::ContentBlocked { message } => (ErrorKind::ContentBlocked, message.clone()),
            Self::QuotaExceeded { message } => (ErrorKind::QuotaExceeded, message.clone()),
            Self::Provider { message } => crate::translate::errors::parse_nested_error(message)
                .map_or_else(
                    || (ErrorKind::Unknown, message.clone()),
                    |nested| (nested.kind, nested.message),
                ),
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => {
                (ErrorKind::Internal, self.to_string())
            }
            Self::Http(_) | Self::Other(_) => (ErrorKind::Unknown, self.to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.classify().0
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_kinds() {
        assert_eq!(
            GatewayError::malformed("missing messages").kind(),
            ErrorKind::MalformedRequest
        );
        assert_eq!(
            GatewayError::model_not_found("nope").kind(),
            ErrorKind::ModelNotFound
        );
        assert_eq!(GatewayError::config("bad").kind(), ErrorKind::Internal);
        assert_eq!(GatewayError::other("???").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_provider_error_without_payload_is_unknown() {
        let (kind, message) = GatewayError::provider("socket closed").classify();
        assert_eq!(kind, ErrorKind::Unknown);
        assert_eq!(message, "socket closed");
    }

    #[test]
    fn test_provider_error_with_nested_payload_is_remapped() {
        let err = GatewayError::provider(
            r#"Request Failed: 429 {"error":{"type":"rate_limit_error","message":"slow down"}}"#,
        );
        let (kind, message) = err.classify();
        assert_eq!(kind, ErrorKind::QuotaExceeded);
        assert_eq!(message, "slow down");
    }
}
