// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::debug;

use crate::errors::StorageError;
use crate::metric::Metric;
use crate::storage::{Lifecycle, MetricStream, Storage};

type MetricMap = HashMap<String, Metric>;

/// Volatile backend keeping the current metric set in a map.
///
/// `get_all` snapshots the key set, then looks each name up separately from a background
/// task, so enumeration never holds the map lock across a consumer await.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    metrics: Arc<RwLock<MetricMap>>,
    lifecycle: Arc<Lifecycle>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&MetricMap) -> R) -> R {
        #[allow(clippy::expect_used)]
        let metrics = self.metrics.read().expect("lock poisoned");
        f(&metrics)
    }

    fn write<R>(&self, f: impl FnOnce(&mut MetricMap) -> R) -> R {
        #[allow(clippy::expect_used)]
        let mut metrics = self.metrics.write().expect("lock poisoned");
        f(&mut metrics)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, name: &str) -> Result<Option<Metric>, StorageError> {
        self.lifecycle.ensure_open()?;
        Ok(self.read(|metrics| metrics.get(name).cloned()))
    }

    async fn get_all(&self) -> Result<MetricStream, StorageError> {
        self.lifecycle.ensure_open()?;
        let names: Vec<String> = self.read(|metrics| metrics.keys().cloned().collect());
        let (tx, stream) = MetricStream::channel();
        let metrics = Arc::clone(&self.metrics);
        let lifecycle = Arc::clone(&self.lifecycle);

        tokio::spawn(async move {
            for name in names {
                if lifecycle.is_closed() {
                    let _ = tx.send(Err(StorageError::Closed)).await;
                    return;
                }
                let metric = {
                    #[allow(clippy::expect_used)]
                    let metrics = metrics.read().expect("lock poisoned");
                    metrics.get(&name).cloned()
                };
                // removed by a concurrent reset
                let Some(metric) = metric else { continue };
                if tx.send(Ok(metric)).await.is_err() {
                    debug!("Metric stream consumer dropped, stopping enumeration");
                    return;
                }
            }
        });

        Ok(stream)
    }

    async fn save(&self, metric: Metric) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.write(|metrics| {
            metrics.insert(metric.name().to_string(), metric);
        });
        Ok(())
    }

    async fn save_batch(&self, batch: Vec<Metric>) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        // one write lock for the whole batch: other callers see all of it or none of it
        self.write(|metrics| {
            for metric in batch {
                metrics.insert(metric.name().to_string(), metric);
            }
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.lifecycle.close()?;
        self.write(|metrics| {
            metrics.clear();
            metrics.shrink_to_fit();
        });
        debug!("Memory storage closed");
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.write(MetricMap::clear);
        Ok(())
    }
}
