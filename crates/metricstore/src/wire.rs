// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON shapes exchanged between the agent and the collector.

use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::metric::{Metric, MetricKind, MetricValue};

/// One metric on the wire: `{"id": ..., "type": ..., "delta": ..., "value": ...}`.
///
/// Counters carry `delta`, Gauges carry `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Lookup request for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&Metric> for MetricPayload {
    fn from(metric: &Metric) -> Self {
        let (delta, value) = match metric.value() {
            MetricValue::Counter(v) => (Some(v), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        Self {
            id: metric.name().to_string(),
            kind: metric.kind().to_string(),
            delta,
            value,
        }
    }
}

impl TryFrom<&MetricPayload> for Metric {
    type Error = ParseError;

    fn try_from(payload: &MetricPayload) -> Result<Self, Self::Error> {
        let kind = payload.kind.parse::<MetricKind>()?;
        if payload.id.is_empty() {
            return Err(ParseError::EmptyName);
        }
        let missing = |field| ParseError::MissingField {
            field,
            kind: kind.to_string(),
            name: payload.id.clone(),
        };
        match kind {
            MetricKind::Counter => payload
                .delta
                .map(|delta| Metric::counter(payload.id.clone(), delta))
                .ok_or_else(|| missing("delta")),
            MetricKind::Gauge => match payload.value {
                Some(value) if value.is_finite() => Ok(Metric::gauge(payload.id.clone(), value)),
                Some(value) => Err(ParseError::InvalidValue {
                    kind: kind.to_string(),
                    name: payload.id.clone(),
                    value: value.to_string(),
                }),
                None => Err(missing("value")),
            },
        }
    }
}

/// Structured error returned by the collector.
///
/// `details` are sorted and de-duplicated on construction so clients can compare them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new<I, S>(code: u16, message: impl Into<String>, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut details: Vec<String> = details.into_iter().map(Into::into).collect();
        details.sort();
        details.dedup();
        Self {
            code,
            message: message.into(),
            details,
        }
    }
}
