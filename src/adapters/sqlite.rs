//! src/adapters/sqlite.rs
//!
//! SQLite backend for one metabase shard. `SqliteAdapter` owns the pool;
//! `TransactionAdapter` wraps one open transaction and exposes the statements
//! the precommit engine and external begin/finalize flows run inside it.
//! Nothing here locks in-process: isolation comes from SQLite transactions.

use crate::{
    config::ShardConfig,
    errors::{MetabaseError, MetabaseResult, convert_rows},
    models::{
        Object, ObjectLocation, Segment, Version,
        object::{OBJECT_COLUMNS, ObjectRow},
        segment::{SEGMENT_COLUMNS, SegmentRow},
    },
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};
use tracing::{debug, info, warn};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// One physical metadata backend.
#[derive(Clone, Debug)]
pub struct SqliteAdapter {
    name: String,
    pool: SqlitePool,
}

impl SqliteAdapter {
    /// Open a pool for `shard`, creating the database file and its parent
    /// directory when they are missing.
    pub async fn connect(
        shard: &ShardConfig,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> MetabaseResult<Self> {
        let db_url = &shard.database_url;
        debug!(shard = %shard.name, "connecting using raw URL => {}", db_url);

        // Extract the local file path SQLx will use
        let db_path = db_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if !db_path.is_empty() && db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        MetabaseError::Config(format!(
                            "creating directory {:?} for shard `{}`: {}",
                            parent, shard.name, err
                        ))
                    })?;
                    info!("Created missing directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(shard = %shard.name, "connected metabase shard");
        Ok(Self::from_pool(shard.name.clone(), pool))
    }

    pub fn from_pool(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `objects` and `segments` tables if they do not exist.
    pub async fn ensure_schema(&self) -> MetabaseResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!(shard = %self.name, "running {} schema statements", statements.len());
        for stmt in statements {
            debug!("executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Open a transaction. Prefer [`SqliteAdapter::with_tx`], which always
    /// commits or rolls back.
    pub async fn begin(&self) -> MetabaseResult<TransactionAdapter> {
        let tx = self.pool.begin().await?;
        Ok(TransactionAdapter {
            shard: self.name.clone(),
            tx,
            now: Utc::now(),
        })
    }

    /// Run `f` inside one transaction: commit when it returns `Ok`, roll back
    /// when it returns `Err`. Dropping the returned future before it finishes
    /// drops the transaction, which rolls it back.
    pub async fn with_tx<T, F>(&self, f: F) -> MetabaseResult<T>
    where
        F: for<'t> FnOnce(&'t mut TransactionAdapter) -> BoxFuture<'t, MetabaseResult<T>>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(shard = %self.name, "rollback after `{}` failed: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Every object row on this shard, ordered by location and version.
    pub async fn testing_all_objects(&self) -> MetabaseResult<Vec<Object>> {
        let rows: Vec<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects \
             ORDER BY project_id, bucket_name, object_key, version"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert_rows(rows, Object::try_from)
    }

    /// Every segment row on this shard, ordered by stream and position.
    pub async fn testing_all_segments(&self) -> MetabaseResult<Vec<Segment>> {
        let rows: Vec<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments ORDER BY stream_id, position"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert_rows(rows, Segment::try_from)
    }

    pub async fn testing_delete_all(&self) -> MetabaseResult<()> {
        sqlx::query("DELETE FROM segments").execute(&self.pool).await?;
        sqlx::query("DELETE FROM objects").execute(&self.pool).await?;
        Ok(())
    }
}

/// An open transaction on one shard.
///
/// `now` is captured when the transaction begins; retention checks made
/// through this transaction all use that instant.
pub struct TransactionAdapter {
    shard: String,
    tx: Transaction<'static, Sqlite>,
    now: DateTime<Utc>,
}

impl TransactionAdapter {
    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub async fn commit(self) -> MetabaseResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> MetabaseResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Insert an object row as-is. Used by begin/finalize flows after the
    /// precommit step has reconciled the location.
    pub async fn insert_object(&mut self, object: &Object) -> MetabaseResult<()> {
        object.verify()?;
        let loc = object.location();

        sqlx::query(
            r#"
            INSERT INTO objects (
                project_id, bucket_name, object_key, version, stream_id,
                status, created_at, expires_at, segment_count,
                encrypted_metadata_nonce, encrypted_metadata, encrypted_metadata_encrypted_key,
                total_plain_size, total_encrypted_size, fixed_segment_size, encryption,
                retention_mode, retain_until
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loc.project_id)
        .bind(&loc.bucket_name)
        .bind(&loc.object_key)
        .bind(object.version())
        .bind(object.stream_id())
        .bind(object.status.code())
        .bind(object.created_at)
        .bind(object.expires_at)
        .bind(object.segment_count)
        .bind(object.encrypted_metadata_nonce.as_deref())
        .bind(object.encrypted_metadata.as_deref())
        .bind(object.encrypted_metadata_encrypted_key.as_deref())
        .bind(object.total_plain_size)
        .bind(object.total_encrypted_size)
        .bind(object.fixed_segment_size)
        .bind(object.encryption.pack())
        .bind(object.retention.mode.code())
        .bind(object.retention.retain_until)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                MetabaseError::Conflict(format!(
                    "object {} version {} already exists",
                    loc, object.version()
                ))
            } else {
                MetabaseError::Database(err)
            }
        })?;
        Ok(())
    }

    pub async fn insert_segment(&mut self, segment: &Segment) -> MetabaseResult<()> {
        segment.verify()?;
        let redundancy = serde_json::to_string(&segment.redundancy)
            .map_err(|err| MetabaseError::invalid(format!("encoding redundancy: {err}")))?;
        let pieces = serde_json::to_string(&segment.pieces)
            .map_err(|err| MetabaseError::invalid(format!("encoding pieces: {err}")))?;

        sqlx::query(
            r#"
            INSERT INTO segments (
                stream_id, position, root_piece_id,
                encrypted_key_nonce, encrypted_key,
                encrypted_size, plain_offset, plain_size,
                redundancy, inline_data, remote_pieces
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(segment.stream_id)
        .bind(segment.position.encode())
        .bind(&segment.root_piece_id.0[..])
        .bind(&segment.encrypted_key_nonce)
        .bind(&segment.encrypted_key)
        .bind(segment.encrypted_size)
        .bind(segment.plain_offset)
        .bind(segment.plain_size)
        .bind(redundancy)
        .bind(segment.inline_data.as_deref())
        .bind(pieces)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                MetabaseError::Conflict(format!(
                    "segment {}/{} already exists",
                    segment.stream_id, segment.position
                ))
            } else {
                MetabaseError::Database(err)
            }
        })?;
        Ok(())
    }

    /// Highest version at `loc` over pending and committed rows; `0` when
    /// there is none.
    pub(crate) async fn highest_version(&mut self, loc: &ObjectLocation) -> MetabaseResult<Version> {
        let highest = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM objects
             WHERE project_id = ? AND bucket_name = ? AND object_key = ?",
        )
        .bind(loc.project_id)
        .bind(&loc.bucket_name)
        .bind(&loc.object_key)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(highest.unwrap_or(0))
    }

    /// Every object at `loc`, pending and committed, ordered by version.
    pub(crate) async fn objects_at(&mut self, loc: &ObjectLocation) -> MetabaseResult<Vec<Object>> {
        let rows: Vec<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE project_id = ? AND bucket_name = ? AND object_key = ?
             ORDER BY version ASC"
        ))
        .bind(loc.project_id)
        .bind(&loc.bucket_name)
        .bind(&loc.object_key)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_rows(rows, Object::try_from)
    }

    /// Delete `object` and all of its segments.
    ///
    /// The object delete is conditional on the exact row that was read (full
    /// key, stream id and status); if it no longer matches, the row changed
    /// under this transaction and nothing is deleted.
    pub(crate) async fn delete_object_with_segments(
        &mut self,
        object: &Object,
    ) -> MetabaseResult<u64> {
        let loc = object.location();
        let deleted = sqlx::query(
            "DELETE FROM objects
             WHERE project_id = ? AND bucket_name = ? AND object_key = ? AND version = ?
               AND stream_id = ? AND status = ?",
        )
        .bind(loc.project_id)
        .bind(&loc.bucket_name)
        .bind(&loc.object_key)
        .bind(object.version())
        .bind(object.stream_id())
        .bind(object.status.code())
        .execute(&mut *self.tx)
        .await?;

        if deleted.rows_affected() != 1 {
            return Err(MetabaseError::Conflict(format!(
                "object {} version {} changed during precommit",
                loc, object.version()
            )));
        }

        let segments = sqlx::query("DELETE FROM segments WHERE stream_id = ?")
            .bind(object.stream_id())
            .execute(&mut *self.tx)
            .await?;
        Ok(segments.rows_affected())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
