// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host memory and per-CPU utilization.
//!
//! CPU usage is computed by sysinfo from the difference between two refreshes, so the
//! first round after startup reports 0 for every CPU.

use std::sync::Mutex;

use async_trait::async_trait;
use metricstore::metric::Metric;
use sysinfo::System;

use crate::collector::Collector;
use crate::errors::CollectError;

pub struct HostCollector {
    system: Mutex<System>,
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

#[async_trait]
impl Collector for HostCollector {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| CollectError::new("host", "system handle poisoned"))?;
        system.refresh_memory();
        system.refresh_cpu();

        let mut metrics = Vec::with_capacity(2 + system.cpus().len());
        metrics.push(Metric::gauge("TotalMemory", system.total_memory() as f64));
        metrics.push(Metric::gauge("FreeMemory", system.free_memory() as f64));
        for (idx, cpu) in system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", idx + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        Ok(metrics)
    }
}
