// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed metric samples and the rule used to combine a new sample with a stored one.
//!
//! A metric is a name plus a kind-specific scalar. The kind is fixed at construction;
//! only the scalar can change afterwards, and only Counters accumulate.

use std::fmt;
use std::str::FromStr;

use crate::errors::ParseError;

const GAUGE: &str = "gauge";
const COUNTER: &str = "counter";

/// Discriminator of a metric's value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => GAUGE,
            MetricKind::Counter => COUNTER,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE => Ok(MetricKind::Gauge),
            COUNTER => Ok(MetricKind::Counter),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Kind-specific payload of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

/// A named, typed sample.
///
/// Cloning a metric copies its value; clones never share state with the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(value),
        }
    }

    /// Builds a metric from its textual `(type, name, value)` triple.
    ///
    /// Gauges accept any finite `f64` literal, Counters only base-10 `i64`. NaN and the
    /// infinities are rejected.
    pub fn parse(kind: &str, name: &str, value: &str) -> Result<Self, ParseError> {
        let kind = kind.parse::<MetricKind>()?;
        if name.is_empty() {
            return Err(ParseError::EmptyName);
        }
        let invalid = || ParseError::InvalidValue {
            kind: kind.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        };
        let value = value.trim();
        match kind {
            MetricKind::Gauge => match value.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Metric::gauge(name, v)),
                _ => Err(invalid()),
            },
            MetricKind::Counter => value
                .parse::<i64>()
                .map(|v| Metric::counter(name, v))
                .map_err(|_| invalid()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn as_gauge(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(v) => Some(v),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Adds `delta` to a Counter. Returns `false` and leaves the metric untouched for Gauges.
    pub fn add(&mut self, delta: i64) -> bool {
        match &mut self.value {
            MetricValue::Counter(v) => {
                *v = v.wrapping_add(delta);
                true
            }
            MetricValue::Gauge(_) => false,
        }
    }

    /// Textual form of the value: shortest round-trippable decimal for Gauges, base-10
    /// integer for Counters.
    pub fn string_value(&self) -> String {
        match self.value {
            MetricValue::Gauge(v) => v.to_string(),
            MetricValue::Counter(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind(), self.name, self.string_value())
    }
}

/// Combines a new sample with the prior stored one for the same name.
///
/// Counter over Counter adds; anything else (no prior, kind change, Gauge) replaces.
pub fn merge(prior: Option<&Metric>, incoming: Metric) -> Metric {
    match (prior.map(Metric::value), incoming.value) {
        (Some(MetricValue::Counter(old)), MetricValue::Counter(delta))
            if prior.is_some_and(|p| p.name == incoming.name) =>
        {
            Metric {
                name: incoming.name,
                value: MetricValue::Counter(old.wrapping_add(delta)),
            }
        }
        _ => incoming,
    }
}
