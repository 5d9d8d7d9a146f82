// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric sources sampled on every collection round.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use metricstore::metric::Metric;
use tracing::debug;

use crate::errors::CollectError;

pub mod host;
pub mod random;
pub mod runtime;

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<Vec<Metric>, CollectError>;
}

/// Outcome of running every collector once.
#[derive(Debug, Default)]
pub struct CollectRound {
    /// Samples from every collector that succeeded.
    pub metrics: Vec<Metric>,
    /// First failure in registration order, if any.
    pub error: Option<CollectError>,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct CollectorSet {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new(collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// Runtime, random and host collectors.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Arc::new(runtime::RuntimeCollector::default()),
            Arc::new(random::RandomCollector),
            Arc::new(host::HostCollector::new()),
        ])
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Runs all collectors concurrently and waits for every one of them. A failing
    /// collector does not discard its siblings' samples.
    pub async fn collect(&self) -> CollectRound {
        let results = join_all(self.collectors.iter().map(|c| c.collect())).await;

        let mut round = CollectRound::default();
        for (collector, result) in self.collectors.iter().zip(results) {
            match result {
                Ok(metrics) => {
                    debug!("Collector {} produced {} metrics", collector.name(), metrics.len());
                    round.metrics.extend(metrics);
                }
                Err(e) => {
                    round.failed += 1;
                    round.error.get_or_insert(e);
                }
            }
        }
        round
    }
}
