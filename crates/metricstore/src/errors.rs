// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Validation errors raised while building a metric from untrusted input.
///
/// Every variant carries the offending input so it can be echoed back to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),
    #[error("metric name is empty")]
    EmptyName,
    #[error("invalid {kind} value for metric {name:?}: {value:?}")]
    InvalidValue {
        kind: String,
        name: String,
        value: String,
    },
    #[error("missing {field} for {kind} metric {name:?}")]
    MissingField {
        field: &'static str,
        kind: String,
        name: String,
    },
}

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage closed")]
    Closed,
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("restore failed at line {line}: {reason}")]
    Restore { line: usize, reason: String },
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub fn is_closed(&self) -> bool {
        matches!(self, StorageError::Closed)
    }
}
