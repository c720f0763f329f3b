//! Core data model of the metabase.
//!
//! Locations and streams identify objects, objects and segments describe
//! stored data, retention describes Object Lock protection. Stored rows map
//! to `objects` and `segments` through `sqlx::FromRow` row types and are
//! converted into these models with `TryFrom`.

pub mod location;
pub mod object;
pub mod retention;
pub mod segment;

pub use location::{ObjectLocation, ObjectStream, Version};
pub use object::{
    COMMITTED_STATUS, CipherSuite, EncryptionParameters, Object, ObjectStatus, PENDING_STATUS,
};
pub use retention::{Retention, RetentionMode, is_protected};
pub use segment::{
    Piece, PieceId, RedundancyAlgorithm, RedundancyScheme, Segment, SegmentPosition,
};
