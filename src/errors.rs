//! Error kinds surfaced by the metabase.
//!
//! Every failure keeps its kind on the way out: callers branch on the variant
//! (object lock vs. conflict vs. not found) and decide whether to roll back,
//! retry or report. Backend failures are passed through untouched.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetabaseError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("segment not found: {0}")]
    SegmentNotFound(String),
    #[error("object protected by object lock: {0}")]
    ObjectLock(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unable to decode {} stored row(s): {}", .0.len(), .0.join("; "))]
    RowDecode(Vec<String>),
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type MetabaseResult<T> = Result<T, MetabaseError>;

impl MetabaseError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// True for both object and segment misses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_) | Self::SegmentNotFound(_))
    }

    pub fn is_object_lock(&self) -> bool {
        matches!(self, Self::ObjectLock(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

/// Convert a batch of stored rows, reporting every row that fails rather than
/// stopping at the first one.
pub fn convert_rows<R, T, F>(rows: Vec<R>, mut convert: F) -> MetabaseResult<Vec<T>>
where
    F: FnMut(R) -> Result<T, String>,
{
    let mut converted = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();
    for row in rows {
        match convert(row) {
            Ok(value) => converted.push(value),
            Err(reason) => failures.push(reason),
        }
    }
    if failures.is_empty() {
        Ok(converted)
    } else {
        Err(MetabaseError::RowDecode(failures))
    }
}
