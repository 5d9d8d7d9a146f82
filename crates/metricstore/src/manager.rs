// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter-aware front end over a [`Storage`] backend.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use tracing::debug;

use crate::errors::StorageError;
use crate::metric::{merge, Metric, MetricKind};
use crate::named_mutex::NamedMutex;
use crate::storage::{MetricStream, Storage};

/// Idle time after which an unused per-name lock is evicted.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Applies the merge rule on top of a kind-agnostic backend.
///
/// Every read-merge-write runs while holding the per-name lock of each name involved,
/// so concurrent Counter updates never lose increments.
pub struct Manager {
    storage: Arc<dyn Storage>,
    locks: NamedMutex,
}

impl Manager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_lock_ttl(storage, DEFAULT_LOCK_TTL)
    }

    pub fn with_lock_ttl(storage: Arc<dyn Storage>, lock_ttl: Duration) -> Self {
        Self {
            storage,
            locks: NamedMutex::new(lock_ttl),
        }
    }

    /// Returns the metric stored under `name` only if it has the requested kind.
    pub async fn get(&self, kind: MetricKind, name: &str) -> Result<Option<Metric>, StorageError> {
        let metric = self.storage.get(name).await?;
        Ok(metric.filter(|m| m.kind() == kind))
    }

    /// Merges `metric` into the stored value and returns what was saved.
    pub async fn save(&self, metric: Metric) -> Result<Metric, StorageError> {
        let _guard = self.locks.lock(metric.name()).await;
        let merged = self.resolve(None, metric).await?;
        self.storage.save(merged.clone()).await?;
        Ok(merged)
    }

    /// Merges every item in order and persists the results with one backend call.
    ///
    /// Duplicate Counter names accumulate left to right. The returned metrics line up
    /// with the input.
    pub async fn save_batch(&self, metrics: Vec<Metric>) -> Result<Vec<Metric>, StorageError> {
        if metrics.is_empty() {
            return Ok(Vec::new());
        }

        // sorted acquisition order keeps overlapping batches from deadlocking
        let names: BTreeSet<String> = metrics.iter().map(|m| m.name().to_string()).collect();
        let mut guards = Vec::with_capacity(names.len());
        for name in &names {
            guards.push(self.locks.lock(name).await);
        }

        let mut pending: HashMap<String, Metric> = HashMap::with_capacity(names.len());
        let mut merged = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let prior = pending.get(metric.name()).cloned();
            let resolved = self.resolve(prior, metric).await?;
            pending.insert(resolved.name().to_string(), resolved.clone());
            merged.push(resolved);
        }

        debug!(
            "Saving batch of {} metrics ({} distinct names)",
            merged.len(),
            pending.len()
        );
        self.storage
            .save_batch(pending.into_values().collect())
            .await?;
        Ok(merged)
    }

    pub async fn get_all(&self) -> Result<MetricStream, StorageError> {
        self.storage.get_all().await
    }

    pub async fn ping_storage(&self) -> Result<(), StorageError> {
        self.storage.ping().await
    }

    /// Applies the merge rule against `prior`, reading the stored value when no in-flight
    /// value is known. Gauges never need the read.
    async fn resolve(&self, prior: Option<Metric>, incoming: Metric) -> Result<Metric, StorageError> {
        if incoming.kind() != MetricKind::Counter {
            return Ok(incoming);
        }
        let prior = match prior {
            Some(prior) => Some(prior),
            None => self.storage.get(incoming.name()).await?,
        };
        Ok(merge(prior.as_ref(), incoming))
    }
}
