// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durability decorator writing the full metric set to a snapshot file.
//!
//! The file holds one JSON object per line:
//!
//! ```text
//! {"type":"counter","name":"hits","value":"5"}
//! {"type":"gauge","name":"temp","value":"36.6"}
//! ```
//!
//! With a zero store interval every write is followed by a full dump (write-through).
//! Otherwise a background task dumps on a fixed period until the storage is closed.
//! Closing always performs a final dump before closing the wrapped backend.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::StorageError;
use crate::metric::Metric;
use crate::storage::{Lifecycle, MetricStream, Storage};

#[derive(Debug, Serialize, Deserialize)]
struct DumpRecord {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    value: String,
}

impl From<&Metric> for DumpRecord {
    fn from(metric: &Metric) -> Self {
        Self {
            kind: metric.kind().to_string(),
            name: metric.name().to_string(),
            value: metric.string_value(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub path: PathBuf,
    /// Period between background dumps. Zero means write-through.
    pub store_interval: Duration,
    /// Replace the wrapped backend's contents with the file's before accepting writes.
    pub restore: bool,
}

/// Serializes dumps of a backend into one file.
struct Dumper {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl Dumper {
    async fn dump(&self) -> Result<usize, StorageError> {
        let _guard = self.file_lock.lock().await;

        let metrics = self.storage.get_all().await?.try_collect().await?;
        let mut contents = Vec::with_capacity(metrics.len() * 48);
        for metric in &metrics {
            serde_json::to_writer(&mut contents, &DumpRecord::from(metric))?;
            contents.push(b'\n');
        }

        // write next to the target and rename so readers never see a partial file
        let tmp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(
            "Dumped {} metrics to {}",
            metrics.len(),
            self.path.display()
        );
        Ok(metrics.len())
    }
}

/// Wraps another [`Storage`] and adds snapshot-file durability around it.
pub struct DumpStorage {
    dumper: Arc<Dumper>,
    write_through: bool,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    flush_task: StdMutex<Option<JoinHandle<()>>>,
}

impl DumpStorage {
    pub async fn open(storage: Arc<dyn Storage>, config: DumpConfig) -> Result<Self, StorageError> {
        if config.path.as_os_str().is_empty() {
            return Err(StorageError::InvalidConfig(
                "dump file path cannot be empty".to_string(),
            ));
        }
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(StorageError::InvalidConfig(format!(
                    "dump directory {} does not exist",
                    parent.display()
                )));
            }
        }

        if config.restore {
            let restored = restore(storage.as_ref(), &config.path).await?;
            info!(
                "Restored {restored} metrics from {}",
                config.path.display()
            );
        }

        let dumper = Arc::new(Dumper {
            storage,
            path: config.path,
            file_lock: Mutex::new(()),
        });
        let cancel = CancellationToken::new();
        let write_through = config.store_interval.is_zero();

        let flush_task = if write_through {
            None
        } else {
            Some(spawn_periodic_dump(
                Arc::clone(&dumper),
                config.store_interval,
                cancel.clone(),
            ))
        };

        Ok(Self {
            dumper,
            write_through,
            lifecycle: Lifecycle::default(),
            cancel,
            flush_task: StdMutex::new(flush_task),
        })
    }

    /// Writes the current metric set to the snapshot file.
    pub async fn dump(&self) -> Result<usize, StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.dump().await
    }

    /// Write-through dump after a successful inner write.
    ///
    /// A failed dump is logged, not returned. The inner write has already been applied and
    /// the next dump, or the final one on close, persists it.
    async fn after_write(&self) {
        if self.write_through {
            if let Err(e) = self.dumper.dump().await {
                error!(
                    "Write-through dump to {} failed: {e}",
                    self.dumper.path.display()
                );
            }
        }
    }
}

fn spawn_periodic_dump(
    dumper: Arc<Dumper>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // discard first tick, which is instantaneous
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = dumper.dump().await {
                        error!("Periodic dump to {} failed: {e}", dumper.path.display());
                    }
                }
                () = cancel.cancelled() => {
                    debug!("Periodic dump task stopped");
                    break;
                }
            }
        }
    })
}

/// Replaces the contents of `storage` with the records in `path`.
///
/// A missing file restores nothing. Blank lines are skipped; any malformed line aborts
/// the restore before anything is written.
async fn restore(storage: &dyn Storage, path: &Path) -> Result<usize, StorageError> {
    storage.reset().await?;

    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No dump file at {}, nothing to restore", path.display());
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut metrics = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: DumpRecord =
            serde_json::from_str(line).map_err(|e| StorageError::Restore {
                line: idx + 1,
                reason: e.to_string(),
            })?;
        let metric = Metric::parse(&record.kind, &record.name, &record.value).map_err(|e| {
            StorageError::Restore {
                line: idx + 1,
                reason: e.to_string(),
            }
        })?;
        metrics.push(metric);
    }

    let restored = metrics.len();
    storage.save_batch(metrics).await?;
    Ok(restored)
}

#[async_trait]
impl Storage for DumpStorage {
    async fn get(&self, name: &str) -> Result<Option<Metric>, StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.get(name).await
    }

    async fn get_all(&self) -> Result<MetricStream, StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.get_all().await
    }

    async fn save(&self, metric: Metric) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.save(metric).await?;
        self.after_write().await;
        Ok(())
    }

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.save_batch(metrics).await?;
        self.after_write().await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.ping().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.lifecycle.close()?;
        self.cancel.cancel();

        let flush_task = {
            #[allow(clippy::expect_used)]
            let mut guard = self.flush_task.lock().expect("lock poisoned");
            guard.take()
        };
        if let Some(handle) = flush_task {
            if let Err(e) = handle.await {
                error!("Periodic dump task failed: {e}");
            }
        }

        let dumped = self.dumper.dump().await;
        let closed = self.dumper.storage.close().await;
        match dumped {
            Ok(count) => info!("Final dump wrote {count} metrics"),
            Err(e) => {
                error!("Final dump failed: {e}");
                return Err(e);
            }
        }
        closed
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        self.dumper.storage.reset().await?;
        self.after_write().await;
        Ok(())
    }
}
