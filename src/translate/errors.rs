//! Canonical error kinds to per-protocol HTTP status codes and error bodies.
//!
//! Every error body the gateway sends goes through [`map_error`].

use std::sync::LazyLock;

use axum::http::StatusCode;
use regex::Regex;
use serde_json::Value;

use super::anthropic_types::ErrorResponse;
use super::gemini_types::{GoogleError, GoogleErrorResponse};
use super::openai_types::{ChatError, ChatErrorResponse};
use crate::error::ErrorKind;
use crate::protocol::Protocol;

/// `Request Failed: <status> <json>` as produced by upstream HTTP failures.
static NESTED_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Request Failed: (\d{3}) (\{.*\})").expect("nested error pattern is valid")
});

pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
        ErrorKind::ModelNotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied | ErrorKind::ContentBlocked => StatusCode::FORBIDDEN,
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn openai_type(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MalformedRequest => "invalid_request_error",
        ErrorKind::ModelNotFound => "not_found_error",
        ErrorKind::PermissionDenied => "access_terminated",
        ErrorKind::ContentBlocked => "blocked",
        ErrorKind::QuotaExceeded => "insufficient_quota",
        ErrorKind::Internal | ErrorKind::Unknown => "server_error",
    }
}

fn anthropic_type(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MalformedRequest => "invalid_request_error",
        ErrorKind::ModelNotFound => "not_found_error",
        ErrorKind::PermissionDenied | ErrorKind::ContentBlocked => "permission_error",
        ErrorKind::QuotaExceeded => "rate_limit_error",
        ErrorKind::Internal | ErrorKind::Unknown => "api_error",
    }
}

fn gemini_status(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MalformedRequest => "INVALID_ARGUMENT",
        ErrorKind::ModelNotFound => "NOT_FOUND",
        ErrorKind::PermissionDenied | ErrorKind::ContentBlocked => "PERMISSION_DENIED",
        ErrorKind::QuotaExceeded => "RESOURCE_EXHAUSTED",
        ErrorKind::Internal | ErrorKind::Unknown => "INTERNAL",
    }
}

fn default_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MalformedRequest => "The request was malformed",
        ErrorKind::ModelNotFound => "The requested model was not found",
        ErrorKind::PermissionDenied => "Permission denied",
        ErrorKind::ContentBlocked => "The request was blocked by content policy",
        ErrorKind::QuotaExceeded => "Quota exceeded",
        ErrorKind::Internal => "Internal server error",
        ErrorKind::Unknown => "An unknown error occurred",
    }
}

/// Status code and protocol-shaped error body for a canonical failure.
pub fn map_error(kind: ErrorKind, message: &str, protocol: Protocol) -> (StatusCode, Value) {
    let status = status_code(kind);
    let message = if message.trim().is_empty() {
        default_message(kind).to_string()
    } else {
        message.to_string()
    };

    let body = match protocol {
        Protocol::OpenAi => serde_json::to_value(ChatErrorResponse {
            error: ChatError {
                message,
                error_type: openai_type(kind).to_string(),
                param: None,
                code: None,
            },
        }),
        Protocol::Anthropic => serde_json::to_value(ErrorResponse::new(anthropic_type(kind), message)),
        Protocol::Gemini => serde_json::to_value(GoogleErrorResponse {
            error: GoogleError {
                code: status.as_u16(),
                message,
                status: gemini_status(kind).to_string(),
            },
        }),
    };

    // These types are plain strings and numbers; serialization cannot fail.
    (status, body.unwrap_or(Value::Null))
}

/// A structured error recovered from a provider error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Recover a structured error from `Request Failed: <status> <json>`.
///
/// The kind comes from the embedded error type when it names one, otherwise from the
/// status code. Returns `None` when the message does not have that shape at all.
pub fn parse_nested_error(message: &str) -> Option<NestedError> {
    let captures = NESTED_ERROR.captures(message)?;
    let status: u16 = captures.get(1)?.as_str().parse().ok()?;
    let payload: Option<Value> = captures
        .get(2)
        .and_then(|m| serde_json::from_str(m.as_str()).ok());

    let error = payload.as_ref().map(|p| p.get("error").unwrap_or(p));
    let embedded_type = error
        .and_then(|e| e.get("type").or_else(|| e.get("status")))
        .and_then(Value::as_str);
    let embedded_message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty());

    let kind = embedded_type
        .and_then(kind_from_type)
        .unwrap_or_else(|| kind_from_status(status));

    Some(NestedError {
        kind,
        message: embedded_message.map_or_else(|| message.to_string(), str::to_string),
    })
}

fn kind_from_type(error_type: &str) -> Option<ErrorKind> {
    let kind = match error_type.to_ascii_lowercase().as_str() {
        "invalid_request_error" | "invalid_argument" => ErrorKind::MalformedRequest,
        "not_found_error" | "not_found" | "model_not_found" => ErrorKind::ModelNotFound,
        "permission_error" | "permission_denied" | "access_terminated" | "authentication_error" => {
            ErrorKind::PermissionDenied
        }
        "blocked" | "content_filter" => ErrorKind::ContentBlocked,
        "rate_limit_error" | "insufficient_quota" | "resource_exhausted" => ErrorKind::QuotaExceeded,
        "api_error" | "server_error" | "internal" | "overloaded_error" => ErrorKind::Internal,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::MalformedRequest,
        401 | 403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::ModelNotFound,
        429 => ErrorKind::QuotaExceeded,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Unknown,
    }
}
