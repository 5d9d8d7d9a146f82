// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use metricstore::metric::Metric;

use crate::collector::Collector;
use crate::errors::CollectError;

/// Emits a `RandomValue` gauge and a `PollCount` counter delta of 1 per round, which the
/// collector accumulates into the number of rounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCollector;

#[async_trait]
impl Collector for RandomCollector {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
        Ok(vec![
            Metric::gauge("RandomValue", rand::random::<f64>()),
            Metric::counter("PollCount", 1),
        ])
    }
}
