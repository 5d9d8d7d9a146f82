// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::errors::StorageError;
use crate::metric::{Metric, MetricKind, MetricValue};
use crate::storage::{migrations, Lifecycle, MetricStream, Storage};

const MAX_CONNECTIONS: u32 = 5;

const UPSERT_METRIC: &str = r#"
    INSERT INTO metric (name, type, value, delta) VALUES (?, ?, ?, ?)
    ON CONFLICT (name) DO UPDATE
    SET type = excluded.type, value = excluded.value, delta = excluded.delta
"#;

const SELECT_ALL: &str = "SELECT name, type, value, delta FROM metric";

const SELECT_ONE: &str = "SELECT name, type, value, delta FROM metric WHERE name = ?";

/// Relational backend keeping one row per metric name.
///
/// Gauges live in the `value` column. Counters are kept exactly in the `delta` integer
/// column and mirrored into `value` for readers of the plain schema.
#[derive(Debug)]
pub struct SqlStorage {
    pool: SqlitePool,
    lifecycle: Lifecycle,
}

impl SqlStorage {
    /// Connects to `dsn` (e.g. `sqlite://metrics.db`) and applies pending migrations.
    #[instrument(skip(dsn))]
    pub async fn open(dsn: &str) -> Result<Self, StorageError> {
        if dsn.trim().is_empty() {
            return Err(StorageError::InvalidConfig("database DSN cannot be empty".into()));
        }

        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

        // every connection to an in-memory database sees its own database
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { MAX_CONNECTIONS })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;
        info!("Relational storage ready");

        Ok(Self {
            pool,
            lifecycle: Lifecycle::default(),
        })
    }
}

fn upsert(metric: &Metric) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    let (value, delta) = match metric.value() {
        MetricValue::Gauge(v) => (v, None),
        MetricValue::Counter(v) => (v as f64, Some(v)),
    };
    sqlx::query(UPSERT_METRIC)
        .bind(metric.name())
        .bind(metric.kind().as_str())
        .bind(value)
        .bind(delta)
}

fn decode_row(row: &SqliteRow) -> Result<Metric, StorageError> {
    let name: String = row.try_get("name")?;
    let kind: String = row.try_get("type")?;
    let value: f64 = row.try_get("value")?;
    let delta: Option<i64> = row.try_get("delta")?;
    let kind = MetricKind::from_str(&kind).map_err(|e| {
        StorageError::Database(sqlx::Error::Decode(Box::new(e)))
    })?;
    Ok(match kind {
        MetricKind::Gauge => Metric::gauge(name, value),
        MetricKind::Counter => Metric::counter(name, delta.unwrap_or(value as i64)),
    })
}

#[async_trait]
impl Storage for SqlStorage {
    async fn get(&self, name: &str) -> Result<Option<Metric>, StorageError> {
        self.lifecycle.ensure_open()?;
        let row = sqlx::query(SELECT_ONE)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn get_all(&self) -> Result<MetricStream, StorageError> {
        self.lifecycle.ensure_open()?;
        let (tx, stream) = MetricStream::channel();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut rows = sqlx::query(SELECT_ALL).fetch(&pool);
            while let Some(row) = rows.next().await {
                let item = match row {
                    Ok(row) => decode_row(&row),
                    Err(sqlx::Error::PoolClosed) => Err(StorageError::Closed),
                    Err(e) => Err(e.into()),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    debug!("Metric stream consumer dropped, stopping row fetch");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(stream)
    }

    async fn save(&self, metric: Metric) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        upsert(&metric).execute(&self.pool).await?;
        Ok(())
    }

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        let mut tx = self.pool.begin().await?;
        for metric in &metrics {
            let result = upsert(metric).execute(&mut *tx).await;
            if let Err(e) = result {
                tx.rollback().await?;
                return Err(e.into());
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.lifecycle.close()?;
        self.pool.close().await;
        debug!("Relational storage closed");
        Ok(())
    }

    async fn reset(&self) -> Result<(), StorageError> {
        self.lifecycle.ensure_open()?;
        sqlx::query("DELETE FROM metric").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, SqlStorage) {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}", dir.path().join("metrics.db").display());
        let storage = SqlStorage::open(&dsn).await.expect("failed to open sqlite storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (_dir, storage) = open_temp().await;
        storage.save(Metric::counter("hits", 5)).await.unwrap();
        storage.save(Metric::counter("hits", 9)).await.unwrap();
        storage.save(Metric::gauge("temp", 36.6)).await.unwrap();

        assert_eq!(
            storage.get("hits").await.unwrap(),
            Some(Metric::counter("hits", 9))
        );
        assert_eq!(
            storage.get("temp").await.unwrap(),
            Some(Metric::gauge("temp", 36.6))
        );
        assert_eq!(storage.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kind_change_replaces_row() {
        let (_dir, storage) = open_temp().await;
        storage.save(Metric::counter("x", 5)).await.unwrap();
        storage.save(Metric::gauge("x", 0.25)).await.unwrap();
        assert_eq!(storage.get("x").await.unwrap(), Some(Metric::gauge("x", 0.25)));
    }

    #[tokio::test]
    async fn test_batch_and_stream() {
        let (_dir, storage) = open_temp().await;
        let batch: Vec<Metric> = (0..100)
            .map(|i| Metric::counter(format!("c{i}"), i))
            .collect();
        storage.save_batch(batch).await.unwrap();

        let all = storage.get_all().await.unwrap().try_collect().await.unwrap();
        assert_eq!(all.len(), 100);
        assert!(all.contains(&Metric::counter("c42", 42)));

        storage.reset().await.unwrap();
        assert_eq!(storage.get("c42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_keeps_full_precision() {
        let (_dir, storage) = open_temp().await;
        let exact = (1_i64 << 53) + 1;
        storage.save(Metric::counter("big", exact)).await.unwrap();
        storage
            .save_batch(vec![Metric::counter("max", i64::MAX)])
            .await
            .unwrap();

        assert_eq!(
            storage.get("big").await.unwrap(),
            Some(Metric::counter("big", exact))
        );
        let all = storage.get_all().await.unwrap().try_collect().await.unwrap();
        assert!(all.contains(&Metric::counter("max", i64::MAX)));
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let (_dir, storage) = open_temp().await;
        storage.save(Metric::counter("a", 1)).await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_poison BEFORE INSERT ON metric
            WHEN NEW.name = 'poison'
            BEGIN SELECT RAISE(ABORT, 'poison row rejected'); END
            "#,
        )
        .execute(&storage.pool)
        .await
        .unwrap();

        let result = storage
            .save_batch(vec![
                Metric::counter("a", 5),
                Metric::gauge("poison", 1.0),
                Metric::counter("c", 1),
            ])
            .await;

        assert!(matches!(result, Err(StorageError::Database(_))));
        assert_eq!(storage.get("a").await.unwrap(), Some(Metric::counter("a", 1)));
        assert_eq!(storage.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}", dir.path().join("metrics.db").display());
        let storage = SqlStorage::open(&dsn).await.unwrap();
        storage.save(Metric::gauge("temp", 1.0)).await.unwrap();
        storage.close().await.unwrap();

        let reopened = SqlStorage::open(&dsn).await.unwrap();
        assert_eq!(
            reopened.get("temp").await.unwrap(),
            Some(Metric::gauge("temp", 1.0))
        );
    }

    #[tokio::test]
    async fn test_in_memory_dsn() {
        let storage = SqlStorage::open("sqlite::memory:").await.unwrap();
        storage.save(Metric::counter("hits", 1)).await.unwrap();
        assert_eq!(
            storage.get("hits").await.unwrap(),
            Some(Metric::counter("hits", 1))
        );
        storage.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_everything() {
        let (_dir, storage) = open_temp().await;
        storage.close().await.unwrap();

        assert!(storage.get("a").await.unwrap_err().is_closed());
        assert!(storage.get_all().await.unwrap_err().is_closed());
        assert!(storage
            .save(Metric::counter("a", 1))
            .await
            .unwrap_err()
            .is_closed());
        assert!(storage.reset().await.unwrap_err().is_closed());
        assert!(storage.close().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_empty_dsn_is_rejected() {
        assert!(matches!(
            SqlStorage::open("  ").await,
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
