//! SQLite-backed cache index.

use crate::error::{IndexError, IndexResult};
use crate::models::{IndexRecord, VersionRecord};
use crate::CacheIndex;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use vitrine_core::registry::{ProviderVersions, VersionMetadata};
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};

/// SQLite-based cache index.
pub struct SqliteIndex {
    pool: Pool<Sqlite>,
}

impl SqliteIndex {
    /// Open (or create) the index database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(IndexError::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under request concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let index = Self { pool };
        index.migrate().await?;
        Ok(index)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> IndexResult<()> {
        sqlx::query(
            r#"
            create table if not exists index_entries (
                key        text primary key,
                document   text,
                negative   integer not null default 0,
                fetched_at integer not null
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            create table if not exists version_entries (
                key        text primary key,
                document   text,
                negative   integer not null default 0,
                fetched_at integer not null
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            create table if not exists artifact_sources (
                digest      text primary key,
                url         text not null,
                version_key text not null,
                updated_at  integer not null
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "create index if not exists idx_artifact_sources_version
             on artifact_sources (version_key)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn decode_index_row(row: &sqlx::sqlite::SqliteRow) -> IndexResult<IndexRecord> {
    let negative: bool = row.try_get("negative")?;
    let fetched_at: i64 = row.try_get("fetched_at")?;
    let document: Option<String> = row.try_get("document")?;
    let document = match (negative, document) {
        (true, _) => None,
        (false, Some(text)) => Some(serde_json::from_str::<ProviderVersions>(&text)?),
        (false, None) => {
            return Err(IndexError::Internal(
                "positive index entry without document".to_string(),
            ))
        }
    };
    Ok(IndexRecord {
        document,
        negative,
        fetched_at,
    })
}

fn decode_version_row(row: &sqlx::sqlite::SqliteRow) -> IndexResult<VersionRecord> {
    let negative: bool = row.try_get("negative")?;
    let fetched_at: i64 = row.try_get("fetched_at")?;
    let document: Option<String> = row.try_get("document")?;
    let document = match (negative, document) {
        (true, _) => None,
        (false, Some(text)) => Some(serde_json::from_str::<VersionMetadata>(&text)?),
        (false, None) => {
            return Err(IndexError::Internal(
                "positive version entry without document".to_string(),
            ))
        }
    };
    Ok(VersionRecord {
        document,
        negative,
        fetched_at,
    })
}

#[async_trait]
impl CacheIndex for SqliteIndex {
    async fn get_index(&self, key: &ProviderKey) -> IndexResult<Option<IndexRecord>> {
        let row = sqlx::query(
            "select document, negative, fetched_at from index_entries where key = ?1",
        )
        .bind(key.cache_key())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_index_row).transpose()
    }

    async fn put_index(
        &self,
        key: &ProviderKey,
        document: &ProviderVersions,
        fetched_at: i64,
    ) -> IndexResult<()> {
        let text = serde_json::to_string(document)?;
        sqlx::query(
            r#"
            insert into index_entries (key, document, negative, fetched_at)
            values (?1, ?2, 0, ?3)
            on conflict (key) do update set
                document = excluded.document,
                negative = excluded.negative,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key.cache_key())
        .bind(text)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key = %key, "stored index entry");
        Ok(())
    }

    async fn put_index_negative(&self, key: &ProviderKey, fetched_at: i64) -> IndexResult<()> {
        sqlx::query(
            r#"
            insert into index_entries (key, document, negative, fetched_at)
            values (?1, null, 1, ?2)
            on conflict (key) do update set
                document = null,
                negative = 1,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key.cache_key())
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key = %key, "stored negative index entry");
        Ok(())
    }

    async fn invalidate_index(&self, key: &ProviderKey) -> IndexResult<()> {
        sqlx::query("delete from index_entries where key = ?1")
            .bind(key.cache_key())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_version(&self, key: &VersionKey) -> IndexResult<Option<VersionRecord>> {
        let row = sqlx::query(
            "select document, negative, fetched_at from version_entries where key = ?1",
        )
        .bind(key.cache_key())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_version_row).transpose()
    }

    async fn put_version(
        &self,
        key: &VersionKey,
        document: &VersionMetadata,
        fetched_at: i64,
    ) -> IndexResult<()> {
        let text = serde_json::to_string(document)?;
        let cache_key = key.cache_key();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            insert into version_entries (key, document, negative, fetched_at)
            values (?1, ?2, 0, ?3)
            on conflict (key) do update set
                document = excluded.document,
                negative = excluded.negative,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&cache_key)
        .bind(text)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("delete from artifact_sources where version_key = ?1")
            .bind(&cache_key)
            .execute(&mut *tx)
            .await?;

        for package in document.platforms.values() {
            let Ok(digest) = ArtifactDigest::from_hex(&package.shasum) else {
                tracing::warn!(
                    key = %key,
                    shasum = %package.shasum,
                    "platform shasum is not a SHA-256; archive will not be mirrored"
                );
                continue;
            };
            sqlx::query(
                r#"
                insert into artifact_sources (digest, url, version_key, updated_at)
                values (?1, ?2, ?3, ?4)
                on conflict (digest) do update set
                    url = excluded.url,
                    version_key = excluded.version_key,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(digest.to_hex())
            .bind(package.download_url.as_str())
            .bind(&cache_key)
            .bind(fetched_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(key = %key, platforms = document.platforms.len(), "stored version entry");
        Ok(())
    }

    async fn put_version_negative(&self, key: &VersionKey, fetched_at: i64) -> IndexResult<()> {
        sqlx::query(
            r#"
            insert into version_entries (key, document, negative, fetched_at)
            values (?1, null, 1, ?2)
            on conflict (key) do update set
                document = null,
                negative = 1,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key.cache_key())
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        tracing::debug!(key = %key, "stored negative version entry");
        Ok(())
    }

    async fn invalidate_version(&self, key: &VersionKey) -> IndexResult<()> {
        let cache_key = key.cache_key();
        let mut tx = self.pool.begin().await?;
        sqlx::query("delete from version_entries where key = ?1")
            .bind(&cache_key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from artifact_sources where version_key = ?1")
            .bind(&cache_key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn artifact_source(&self, digest: &ArtifactDigest) -> IndexResult<Option<Url>> {
        let row = sqlx::query("select url from artifact_sources where digest = ?1")
            .bind(digest.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let url: String = row.try_get("url")?;
        let url = Url::parse(&url)
            .map_err(|e| IndexError::Internal(format!("stored source URL invalid: {e}")))?;
        Ok(Some(url))
    }

    async fn live_digests(
        &self,
        version_ttl_secs: i64,
        now: i64,
    ) -> IndexResult<HashSet<ArtifactDigest>> {
        let rows = sqlx::query(
            r#"
            select distinct s.digest
            from artifact_sources s
            join version_entries v on v.key = s.version_key
            where v.negative = 0 and v.fetched_at + ?1 > ?2
            "#,
        )
        .bind(version_ttl_secs)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut digests = HashSet::with_capacity(rows.len());
        for row in rows {
            let hex: String = row.try_get("digest")?;
            if let Ok(digest) = ArtifactDigest::from_hex(&hex) {
                digests.insert(digest);
            }
        }
        Ok(digests)
    }

    async fn health_check(&self) -> IndexResult<()> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }
}
