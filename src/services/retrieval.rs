//! src/services/retrieval.rs
//!
//! Read side of the metabase: exact and latest object versions, segment
//! lookup by position or plaintext offset, and bucket emptiness.
//!
//! Lookups run on the pool of the shard owning the project, outside any write
//! transaction. Each one is a single statement (the latest stream is resolved
//! by a sub-select), so it reads one consistent snapshot and can never observe
//! a precommit half way through.

use crate::{
    errors::{MetabaseError, MetabaseResult},
    models::{
        COMMITTED_STATUS, Object, ObjectLocation, Segment, SegmentPosition, Version,
        object::{OBJECT_COLUMNS, ObjectRow},
        segment::{SEGMENT_COLUMNS, SegmentRow},
    },
    services::metabase::Metabase,
};
use tracing::debug;
use uuid::Uuid;

impl Metabase {
    /// The committed object at exactly `version`.
    pub async fn get_object_exact_version(
        &self,
        location: &ObjectLocation,
        version: Version,
    ) -> MetabaseResult<Object> {
        location.verify()?;
        if version <= 0 {
            return Err(MetabaseError::invalid(format!("Version invalid: {}", version)));
        }
        debug!(location = %location, version, "get object exact version");

        let row: Option<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE project_id = ? AND bucket_name = ? AND object_key = ? AND version = ?
               AND status = ?"
        ))
        .bind(location.project_id)
        .bind(&location.bucket_name)
        .bind(&location.object_key)
        .bind(version)
        .bind(COMMITTED_STATUS)
        .fetch_optional(self.choose_adapter(location.project_id).pool())
        .await?;

        match row {
            Some(row) => decode_object(row),
            None => Err(MetabaseError::ObjectNotFound(format!(
                "{} version {}",
                location, version
            ))),
        }
    }

    /// The committed object with the greatest version. Pending objects are
    /// never returned, whatever their version.
    pub async fn get_object_latest_version(
        &self,
        location: &ObjectLocation,
    ) -> MetabaseResult<Object> {
        location.verify()?;
        debug!(location = %location, "get object latest version");

        let row: Option<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE project_id = ? AND bucket_name = ? AND object_key = ? AND status = ?
             ORDER BY version DESC
             LIMIT 1"
        ))
        .bind(location.project_id)
        .bind(&location.bucket_name)
        .bind(&location.object_key)
        .bind(COMMITTED_STATUS)
        .fetch_optional(self.choose_adapter(location.project_id).pool())
        .await?;

        match row {
            Some(row) => decode_object(row),
            None => Err(MetabaseError::ObjectNotFound(location.to_string())),
        }
    }

    /// The segment at `position` of `stream_id`. `project_id` selects the
    /// shard the stream lives on.
    pub async fn get_segment_by_position(
        &self,
        project_id: Uuid,
        stream_id: Uuid,
        position: SegmentPosition,
    ) -> MetabaseResult<Segment> {
        if project_id.is_nil() {
            return Err(MetabaseError::invalid("ProjectID missing"));
        }
        if stream_id.is_nil() {
            return Err(MetabaseError::invalid("StreamID missing"));
        }
        debug!(%stream_id, %position, "get segment by position");

        let row: Option<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments
             WHERE stream_id = ? AND position = ?"
        ))
        .bind(stream_id)
        .bind(position.encode())
        .fetch_optional(self.choose_adapter(project_id).pool())
        .await?;

        match row {
            Some(row) => decode_segment(row),
            None => Err(MetabaseError::SegmentNotFound(format!(
                "{}/{}",
                stream_id, position
            ))),
        }
    }

    /// The highest-position segment of the latest committed object.
    pub async fn get_latest_object_last_segment(
        &self,
        location: &ObjectLocation,
    ) -> MetabaseResult<Segment> {
        location.verify()?;
        debug!(location = %location, "get latest object last segment");

        let row: Option<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments
             WHERE stream_id = (
                SELECT stream_id FROM objects
                WHERE project_id = ? AND bucket_name = ? AND object_key = ? AND status = ?
                ORDER BY version DESC
                LIMIT 1
             )
             ORDER BY position DESC
             LIMIT 1"
        ))
        .bind(location.project_id)
        .bind(&location.bucket_name)
        .bind(&location.object_key)
        .bind(COMMITTED_STATUS)
        .fetch_optional(self.choose_adapter(location.project_id).pool())
        .await?;

        match row {
            Some(row) => decode_segment(row),
            None => Err(MetabaseError::ObjectNotFound(format!(
                "{}: object or segment missing",
                location
            ))),
        }
    }

    /// The segment of the latest committed object whose plaintext range
    /// `[plain_offset, plain_offset + plain_size)` contains `plain_offset`.
    /// Should several match, the one starting first wins.
    pub async fn get_segment_by_offset(
        &self,
        location: &ObjectLocation,
        plain_offset: i64,
    ) -> MetabaseResult<Segment> {
        location.verify()?;
        if plain_offset < 0 {
            return Err(MetabaseError::invalid(format!(
                "Invalid PlainOffset: {}",
                plain_offset
            )));
        }
        debug!(location = %location, plain_offset, "get segment by offset");

        let row: Option<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments
             WHERE stream_id = (
                SELECT stream_id FROM objects
                WHERE project_id = ? AND bucket_name = ? AND object_key = ? AND status = ?
                ORDER BY version DESC
                LIMIT 1
             )
               AND plain_offset <= ?
               AND (plain_offset + plain_size) > ?
             ORDER BY plain_offset ASC
             LIMIT 1"
        ))
        .bind(location.project_id)
        .bind(&location.bucket_name)
        .bind(&location.object_key)
        .bind(COMMITTED_STATUS)
        .bind(plain_offset)
        .bind(plain_offset)
        .fetch_optional(self.choose_adapter(location.project_id).pool())
        .await?;

        match row {
            Some(row) => decode_segment(row),
            None => Err(MetabaseError::ObjectNotFound(format!(
                "{}: no segment covers offset {}",
                location, plain_offset
            ))),
        }
    }

    /// True when the bucket holds no objects at all, pending or committed.
    /// Does not check that the bucket exists.
    pub async fn bucket_empty(&self, project_id: Uuid, bucket_name: &str) -> MetabaseResult<bool> {
        if project_id.is_nil() {
            return Err(MetabaseError::invalid("ProjectID missing"));
        }
        if bucket_name.is_empty() {
            return Err(MetabaseError::invalid("BucketName missing"));
        }

        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM objects WHERE project_id = ? AND bucket_name = ? LIMIT 1",
        )
        .bind(project_id)
        .bind(bucket_name)
        .fetch_optional(self.choose_adapter(project_id).pool())
        .await?;

        Ok(found.is_none())
    }
}

fn decode_object(row: ObjectRow) -> MetabaseResult<Object> {
    Object::try_from(row).map_err(|reason| MetabaseError::RowDecode(vec![reason]))
}

fn decode_segment(row: SegmentRow) -> MetabaseResult<Segment> {
    Segment::try_from(row).map_err(|reason| MetabaseError::RowDecode(vec![reason]))
}
