use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use crate::ledger::{KvStore, StoreError};

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .journal_mode(SqliteJournalMode::Delete)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

#[async_trait]
impl KvStore for Storage {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut tx = self.begin().await?;
        let value = tx.get_value(key).await?;
        tx.commit().await?;

        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        tx.put_value(key, value).await?;
        tx.commit().await?;

        Ok(())
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_value(&mut self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            "SELECT value
            FROM kv
            WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the value of `{key}`"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn put_value(&mut self, key: &str, value: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        debug!(%key, %value, "Storing value");

        sqlx::query(
            "INSERT
            INTO kv (key, value, updated)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
              value = excluded.value,
              updated = excluded.updated",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not store the value of `{key}`"))?;

        Ok(())
    }
}
