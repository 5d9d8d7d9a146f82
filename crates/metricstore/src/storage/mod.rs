// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage contract shared by every backend.
//!
//! Backends are kind-agnostic: `save` stores exactly what it is given. Accumulating
//! Counters is the [`Manager`](crate::manager::Manager)'s job.
//!
//! Available backends:
//! - [`memory::MemoryStorage`]: volatile map
//! - [`dump::DumpStorage`]: decorator adding a line-delimited JSON snapshot file
//! - [`sql::SqlStorage`]: sqlite table with transactional batches

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::StorageError;
use crate::metric::Metric;

pub mod dump;
pub mod memory;
pub mod migrations;
pub mod sql;

/// Capacity of the channel behind a [`MetricStream`]. Producers run at most this far
/// ahead of the consumer.
const STREAM_BUFFER_SIZE: usize = 64;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns a copy of the metric stored under `name`, or `None` if it is unknown.
    async fn get(&self, name: &str) -> Result<Option<Metric>, StorageError>;

    /// Returns a lazy sequence over copies of every stored metric, in no particular order.
    async fn get_all(&self) -> Result<MetricStream, StorageError>;

    /// Upserts `metric` by name, overwriting any previous value verbatim.
    async fn save(&self, metric: Metric) -> Result<(), StorageError>;

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;

    /// Releases the backend. A second call fails with [`StorageError::Closed`], as does
    /// every other operation afterwards.
    async fn close(&self) -> Result<(), StorageError>;

    /// Removes every stored metric.
    async fn reset(&self) -> Result<(), StorageError>;
}

/// Pull-based sequence of metrics produced by a background task.
///
/// Dropping the stream stops the producer on its next send.
#[derive(Debug)]
pub struct MetricStream {
    rx: mpsc::Receiver<Result<Metric, StorageError>>,
}

pub(crate) type MetricSink = mpsc::Sender<Result<Metric, StorageError>>;

impl MetricStream {
    pub(crate) fn channel() -> (MetricSink, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_SIZE);
        (tx, Self { rx })
    }

    /// Next metric, an error if the backend failed mid-sequence, or `None` at the end.
    pub async fn next(&mut self) -> Option<Result<Metric, StorageError>> {
        self.rx.recv().await
    }

    /// Drains the stream, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<Metric>, StorageError> {
        let mut metrics = Vec::new();
        while let Some(item) = self.next().await {
            metrics.push(item?);
        }
        Ok(metrics)
    }
}

/// Open/closed state shared by backends.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the backend closed. Only the first caller gets `Ok`.
    pub(crate) fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}
