//! Identifiers addressing an object slot and a specific upload into it.

use crate::errors::{MetabaseError, MetabaseResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object version. Positive and monotonic per location; `0` means "none".
pub type Version = i64;

/// A logical object slot, independent of version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub project_id: Uuid,
    pub bucket_name: String,
    pub object_key: String,
}

impl ObjectLocation {
    pub fn new(
        project_id: Uuid,
        bucket_name: impl Into<String>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            bucket_name: bucket_name.into(),
            object_key: object_key.into(),
        }
    }

    /// Reject locations with any identifier missing.
    pub fn verify(&self) -> MetabaseResult<()> {
        if self.project_id.is_nil() {
            return Err(MetabaseError::invalid("ProjectID missing"));
        }
        if self.bucket_name.is_empty() {
            return Err(MetabaseError::invalid("BucketName missing"));
        }
        if self.object_key.is_empty() {
            return Err(MetabaseError::invalid("ObjectKey missing"));
        }
        Ok(())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project_id, self.bucket_name, self.object_key)
    }
}

/// One upload into a location: the location plus the version it occupies and
/// the globally unique stream id assigned when it began.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectStream {
    pub location: ObjectLocation,
    pub version: Version,
    pub stream_id: Uuid,
}

impl ObjectStream {
    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub fn verify(&self) -> MetabaseResult<()> {
        self.location.verify()?;
        if self.version <= 0 {
            return Err(MetabaseError::invalid(format!(
                "Version invalid: {}",
                self.version
            )));
        }
        if self.stream_id.is_nil() {
            return Err(MetabaseError::invalid("StreamID missing"));
        }
        Ok(())
    }
}
