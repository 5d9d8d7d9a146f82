// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Returned by suspension points whose cancellation token fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("queue still full after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to encode payload: {0}")]
    Payload(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("collector responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl DeliveryError {
    /// Transport failures and 5xx responses are worth another attempt. A 4xx means the
    /// collector understood and rejected the batch, so resending it cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Timeout(_) | DeliveryError::Connection(_) => true,
            DeliveryError::Status { status, .. } => !(400..500).contains(status),
            DeliveryError::Payload(_) | DeliveryError::Cancelled(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("collector {collector} failed: {reason}")]
pub struct CollectError {
    pub collector: &'static str,
    pub reason: String,
}

impl CollectError {
    pub fn new(collector: &'static str, reason: impl Into<String>) -> Self {
        Self {
            collector,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(DeliveryError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(DeliveryError::Connection("refused".into()).is_retryable());
        assert!(DeliveryError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());

        assert!(!DeliveryError::Status {
            status: 400,
            body: "bad metric".into()
        }
        .is_retryable());
        assert!(!DeliveryError::Payload("bad json".into()).is_retryable());
        assert!(!DeliveryError::Cancelled(Cancelled).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = DeliveryError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(error.to_string(), "collector responded 404: not found");
        assert_eq!(
            QueueError::from(Cancelled).to_string(),
            "operation cancelled"
        );
        assert_eq!(
            CollectError::new("host", "no cpus").to_string(),
            "collector host failed: no cpus"
        );
    }
}
