// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Versioned schema migrations for the relational backend.

use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

use crate::errors::StorageError;

pub const SCHEMA_VERSION: i64 = 2;

/// Brings the schema up to [`SCHEMA_VERSION`]. Each step runs in its own transaction.
#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await?;
    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        debug!("Database schema is up to date (version {current_version})");
        return Ok(());
    }

    info!("Migrating database from version {current_version} to {SCHEMA_VERSION}");

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }
    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    Ok(())
}

async fn migrate_to_v1(pool: &SqlitePool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric (
            name TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL,
            value DOUBLE PRECISION NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Adds an exact integer column for Counters; `value` alone loses precision past 2^53.
async fn migrate_to_v2(pool: &SqlitePool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    sqlx::query("ALTER TABLE metric ADD COLUMN delta INTEGER")
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE metric SET delta = CAST(value AS INTEGER) WHERE type = 'counter'")
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (2)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_v1_counters_are_carried_into_delta() {
        // one connection, or each query would see its own in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE schema_version (version INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        migrate_to_v1(&pool).await.unwrap();
        sqlx::query("INSERT INTO metric (name, type, value) VALUES ('hits', 'counter', 42)")
            .execute(&pool)
            .await
            .unwrap();

        run(&pool).await.unwrap();

        let delta: Option<i64> = sqlx::query_scalar("SELECT delta FROM metric WHERE name = 'hits'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(delta, Some(42));
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
