// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use metricstore::errors::StorageError;
use metricstore::storage::dump::{DumpConfig, DumpStorage};
use metricstore::storage::memory::MemoryStorage;
use metricstore::storage::sql::SqlStorage;
use metricstore::storage::Storage;
use tracing::info;

use crate::config::Config;

/// Builds the backend the configuration asks for: relational if a DSN is set, otherwise
/// memory wrapped in the dump decorator if a snapshot path is set, otherwise plain memory.
pub async fn open(config: &Config) -> Result<Arc<dyn Storage>, StorageError> {
    if let Some(dsn) = &config.database_dsn {
        info!("Using relational storage");
        return Ok(Arc::new(SqlStorage::open(dsn).await?));
    }

    if let Some(path) = &config.file_storage_path {
        info!(
            "Using memory storage with snapshots to {} every {:?}",
            path.display(),
            config.store_interval
        );
        let dump = DumpStorage::open(
            Arc::new(MemoryStorage::new()),
            DumpConfig {
                path: path.clone(),
                store_interval: config.store_interval,
                restore: config.restore,
            },
        )
        .await?;
        return Ok(Arc::new(dump));
    }

    info!("Using memory storage, metrics will not survive a restart");
    Ok(Arc::new(MemoryStorage::new()))
}
