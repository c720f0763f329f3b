//! Object metadata rows.
//!
//! An [`Object`] describes one upload into a location. The bytes themselves
//! live on storage nodes; the metabase only keeps the metadata needed to find
//! and reassemble them.

use super::location::{ObjectLocation, ObjectStream, Version};
use super::retention::{Retention, RetentionMode};
use crate::errors::{MetabaseError, MetabaseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an object row.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectStatus {
    Pending,
    Committed,
}

/// Stored value of [`ObjectStatus::Pending`].
pub const PENDING_STATUS: i32 = 1;
/// Stored value of [`ObjectStatus::Committed`]. Every query testing for
/// committed rows binds this value.
pub const COMMITTED_STATUS: i32 = 3;

impl ObjectStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Pending => PENDING_STATUS,
            Self::Committed => COMMITTED_STATUS,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            PENDING_STATUS => Some(Self::Pending),
            COMMITTED_STATUS => Some(Self::Committed),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CipherSuite {
    #[default]
    Unspecified,
    Null,
    AesGcm,
    Secretbox,
    NullBase64,
}

impl CipherSuite {
    fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Null => 1,
            Self::AesGcm => 2,
            Self::Secretbox => 3,
            Self::NullBase64 => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            1 => Some(Self::Null),
            2 => Some(Self::AesGcm),
            3 => Some(Self::Secretbox),
            4 => Some(Self::NullBase64),
            _ => None,
        }
    }
}

/// Client-side encryption settings. Stored packed in `objects.encryption` as
/// `cipher << 32 | block_size`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncryptionParameters {
    pub cipher_suite: CipherSuite,
    pub block_size: i32,
}

impl EncryptionParameters {
    pub fn pack(&self) -> i64 {
        (i64::from(self.cipher_suite.code()) << 32) | i64::from(self.block_size as u32)
    }

    pub fn unpack(packed: i64) -> Result<Self, String> {
        let cipher = (packed >> 32) as u8;
        let cipher_suite = CipherSuite::from_code(cipher)
            .ok_or_else(|| format!("unknown cipher suite {cipher}"))?;
        Ok(Self {
            cipher_suite,
            block_size: packed as u32 as i32,
        })
    }
}

/// Object metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub stream: ObjectStream,
    pub status: ObjectStatus,

    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,

    pub segment_count: i32,

    pub encrypted_metadata_nonce: Option<Vec<u8>>,
    pub encrypted_metadata: Option<Vec<u8>>,
    pub encrypted_metadata_encrypted_key: Option<Vec<u8>>,

    pub total_plain_size: i64,
    pub total_encrypted_size: i64,
    pub fixed_segment_size: i32,

    pub encryption: EncryptionParameters,
    pub retention: Retention,
}

impl Object {
    pub fn location(&self) -> &ObjectLocation {
        &self.stream.location
    }

    pub fn version(&self) -> Version {
        self.stream.version
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream.stream_id
    }

    pub fn is_committed(&self) -> bool {
        self.status == ObjectStatus::Committed
    }

    /// Validate an object before it is written.
    pub fn verify(&self) -> MetabaseResult<()> {
        self.stream.verify()?;
        self.retention.verify()?;
        if self.segment_count < 0 {
            return Err(MetabaseError::invalid(format!(
                "SegmentCount negative: {}",
                self.segment_count
            )));
        }
        if self.total_plain_size < 0 || self.total_encrypted_size < 0 {
            return Err(MetabaseError::invalid("object sizes must not be negative"));
        }
        if self.fixed_segment_size < 0 {
            return Err(MetabaseError::invalid(format!(
                "FixedSegmentSize negative: {}",
                self.fixed_segment_size
            )));
        }
        Ok(())
    }
}

/// Column list matching [`ObjectRow`].
pub(crate) const OBJECT_COLUMNS: &str = "project_id, bucket_name, object_key, version, stream_id, \
     status, created_at, expires_at, segment_count, \
     encrypted_metadata_nonce, encrypted_metadata, encrypted_metadata_encrypted_key, \
     total_plain_size, total_encrypted_size, fixed_segment_size, encryption, \
     retention_mode, retain_until";

/// `objects` row as stored.
#[derive(Clone, FromRow, Debug)]
pub(crate) struct ObjectRow {
    pub project_id: Uuid,
    pub bucket_name: String,
    pub object_key: String,
    pub version: i64,
    pub stream_id: Uuid,
    pub status: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub segment_count: i32,
    pub encrypted_metadata_nonce: Option<Vec<u8>>,
    pub encrypted_metadata: Option<Vec<u8>>,
    pub encrypted_metadata_encrypted_key: Option<Vec<u8>>,
    pub total_plain_size: i64,
    pub total_encrypted_size: i64,
    pub fixed_segment_size: i32,
    pub encryption: i64,
    pub retention_mode: i32,
    pub retain_until: Option<DateTime<Utc>>,
}

impl TryFrom<ObjectRow> for Object {
    type Error = String;

    fn try_from(row: ObjectRow) -> Result<Self, Self::Error> {
        let context = format!(
            "object {}/{}/{} v{}",
            row.project_id, row.bucket_name, row.object_key, row.version
        );
        let status = ObjectStatus::from_code(row.status)
            .ok_or_else(|| format!("{context}: unknown status {}", row.status))?;
        let encryption =
            EncryptionParameters::unpack(row.encryption).map_err(|e| format!("{context}: {e}"))?;
        let mode = RetentionMode::from_code(row.retention_mode)
            .ok_or_else(|| format!("{context}: unknown retention mode {}", row.retention_mode))?;

        Ok(Object {
            stream: ObjectStream {
                location: ObjectLocation {
                    project_id: row.project_id,
                    bucket_name: row.bucket_name,
                    object_key: row.object_key,
                },
                version: row.version,
                stream_id: row.stream_id,
            },
            status,
            created_at: row.created_at,
            expires_at: row.expires_at,
            segment_count: row.segment_count,
            encrypted_metadata_nonce: row.encrypted_metadata_nonce,
            encrypted_metadata: row.encrypted_metadata,
            encrypted_metadata_encrypted_key: row.encrypted_metadata_encrypted_key,
            total_plain_size: row.total_plain_size,
            total_encrypted_size: row.total_encrypted_size,
            fixed_segment_size: row.fixed_segment_size,
            encryption,
            retention: Retention {
                mode,
                retain_until: row.retain_until,
            },
        })
    }
}
