//! Wire types for the ARM-style REST contract and status mapping.

use converge::{DeclaredConfiguration, Error, InstanceStatus, ObservedState, OperationStatus, ResourceId};
use serde::Deserialize;

/// `GET {id}` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEnvelope {
    pub id: ResourceId,
    #[serde(default)]
    pub managed_by: Option<ResourceId>,
    pub configuration: DeclaredConfiguration,
}

impl From<ResourceEnvelope> for ObservedState {
    fn from(envelope: ResourceEnvelope) -> Self {
        Self {
            id: envelope.id,
            configuration: envelope.configuration,
            managed_by: envelope.managed_by,
        }
    }
}

/// `GET {id}/instanceView` body.
#[derive(Debug, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceStatus>,
}

/// `GET {operation}` body.
#[derive(Debug, Deserialize)]
pub struct OperationBody {
    pub status: String,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl OperationBody {
    /// Unknown status strings are treated as still running.
    pub fn into_status(self) -> OperationStatus {
        match self.status.to_ascii_lowercase().as_str() {
            "succeeded" => OperationStatus::Succeeded,
            "failed" => OperationStatus::Failed {
                message: self
                    .error
                    .map(ErrorDetail::into_message)
                    .unwrap_or_else(|| "operation failed".to_string()),
            },
            "canceled" | "cancelled" => OperationStatus::Canceled,
            _ => OperationStatus::InProgress,
        }
    }
}

/// Status of a successful (2xx) operation poll.
///
/// `Location` polls answer 202 with an empty body while running and end
/// with the resource itself, which carries no operation `status`.
pub fn operation_status(http_status: u16, body: &str) -> OperationStatus {
    if http_status == 202 || body.trim().is_empty() {
        return OperationStatus::InProgress;
    }
    serde_json::from_str::<OperationBody>(body)
        .map_or(OperationStatus::Succeeded, OperationBody::into_status)
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorDetail {
    fn into_message(self) -> String {
        match (self.code, self.message) {
            (_, Some(message)) => message,
            (Some(code), None) => code,
            (None, None) => "no error detail".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

/// Provider message carried by an error body, or the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.into_message())
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Map a non-success HTTP status to an error.
///
/// 409 keeps the provider's message verbatim; 408, 429 and 5xx are
/// retryable transport faults.
pub fn status_error(status: u16, resource: &ResourceId, body: &str) -> Error {
    match status {
        404 => Error::NotFound {
            resource: resource.to_string(),
        },
        409 => Error::Conflict {
            message: error_message(body),
        },
        408 | 429 | 500..=599 => Error::Transport {
            message: format!("HTTP {status}: {}", error_message(body)),
            retryable: true,
        },
        _ => Error::Transport {
            message: format!("HTTP {status}: {}", error_message(body)),
            retryable: false,
        },
    }
}

/// Map a ureq failure (connection, TLS, timeout) to a transport error.
pub fn transport_error(err: &ureq::Error) -> Error {
    let retryable = matches!(
        err,
        ureq::Error::Io(_) | ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed
    );
    Error::Transport {
        message: err.to_string(),
        retryable,
    }
}
