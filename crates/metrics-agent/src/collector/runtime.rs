// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-level samples read from procfs.
//!
//! Sources that cannot be read (non-Linux hosts, restricted containers) are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use metricstore::metric::Metric;
use tracing::debug;

use crate::collector::Collector;
use crate::errors::CollectError;

const PROC_SELF: &str = "/proc/self";

#[derive(Debug, Clone)]
pub struct RuntimeCollector {
    proc_dir: PathBuf,
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::with_proc_dir(PROC_SELF)
    }
}

impl RuntimeCollector {
    /// Reads from `proc_dir` instead of `/proc/self`.
    pub fn with_proc_dir(proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_dir: proc_dir.into(),
        }
    }

    fn read_samples(&self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(4);

        let statm_path = self.proc_dir.join("statm");
        match fs::read_to_string(&statm_path)
            .ok()
            .and_then(|contents| parse_statm(&contents))
        {
            Some((virtual_pages, resident_pages)) => {
                metrics.push(Metric::gauge("VirtualMemoryPages", virtual_pages as f64));
                metrics.push(Metric::gauge("ResidentMemoryPages", resident_pages as f64));
            }
            None => debug!("Could not read memory usage from {}", statm_path.display()),
        }

        for (name, dir) in [("OpenFileDescriptors", "fd"), ("Threads", "task")] {
            let path = self.proc_dir.join(dir);
            match count_entries(&path) {
                Some(count) => metrics.push(Metric::gauge(name, count as f64)),
                None => debug!("Could not count entries in {}", path.display()),
            }
        }

        metrics
    }
}

/// Total program size and resident set size, both in pages.
fn parse_statm(contents: &str) -> Option<(u64, u64)> {
    let mut fields = contents.split_whitespace();
    let size = fields.next()?.parse().ok()?;
    let resident = fields.next()?.parse().ok()?;
    Some((size, resident))
}

fn count_entries(path: &Path) -> Option<usize> {
    fs::read_dir(path).ok().map(|entries| entries.count())
}

#[async_trait]
impl Collector for RuntimeCollector {
    fn name(&self) -> &'static str {
        "runtime"
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
        Ok(self.read_samples())
    }
}
