//! Segment metadata: where each slice of an object's plaintext lives.

use crate::errors::{MetabaseError, MetabaseResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Position of a segment within its stream, ordered by part then index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentPosition {
    pub part: u32,
    pub index: u32,
}

impl SegmentPosition {
    /// Highest part a stored segment may use. Larger parts would encode to a
    /// negative integer and sort before every other position.
    pub const MAX_PART: u32 = i32::MAX as u32;

    pub fn new(part: u32, index: u32) -> Self {
        Self { part, index }
    }

    /// Encode as `part << 32 | index`. Integer order equals position order
    /// for every part up to [`Self::MAX_PART`].
    pub fn encode(self) -> i64 {
        ((u64::from(self.part) << 32) | u64::from(self.index)) as i64
    }

    pub fn decode(encoded: i64) -> Self {
        let raw = encoded as u64;
        Self {
            part: (raw >> 32) as u32,
            index: raw as u32,
        }
    }
}

impl fmt::Display for SegmentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.part, self.index)
    }
}

/// Root piece identifier a segment's piece ids derive from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PieceId(pub [u8; 32]);

impl TryFrom<&[u8]> for PieceId {
    type Error = String;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("piece id must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self(raw))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RedundancyAlgorithm {
    #[default]
    ReedSolomon,
}

/// Erasure coding parameters for a remote segment.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RedundancyScheme {
    pub algorithm: RedundancyAlgorithm,
    pub share_size: i32,
    pub required_shares: i16,
    pub repair_shares: i16,
    pub optimal_shares: i16,
    pub total_shares: i16,
}

impl RedundancyScheme {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn verify(&self) -> MetabaseResult<()> {
        let ordered = 0 < self.required_shares
            && self.required_shares <= self.repair_shares
            && self.repair_shares <= self.optimal_shares
            && self.optimal_shares <= self.total_shares;
        if !ordered || self.share_size <= 0 {
            return Err(MetabaseError::invalid(format!(
                "invalid redundancy scheme {self:?}"
            )));
        }
        Ok(())
    }
}

/// A piece of a remote segment stored on one node.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Piece {
    pub number: u16,
    pub storage_node: Uuid,
}

/// Segment metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub stream_id: Uuid,
    pub position: SegmentPosition,

    pub root_piece_id: PieceId,
    pub encrypted_key_nonce: Vec<u8>,
    pub encrypted_key: Vec<u8>,

    pub encrypted_size: i32,
    pub plain_offset: i64,
    pub plain_size: i32,

    pub redundancy: RedundancyScheme,

    pub inline_data: Option<Vec<u8>>,
    pub pieces: Vec<Piece>,
}

impl Segment {
    pub fn is_inline(&self) -> bool {
        self.inline_data.is_some()
    }

    pub fn is_remote(&self) -> bool {
        !self.pieces.is_empty()
    }

    /// Whether `plain_offset` falls inside this segment's half-open range.
    pub fn contains_offset(&self, plain_offset: i64) -> bool {
        self.plain_offset <= plain_offset
            && plain_offset < self.plain_offset + i64::from(self.plain_size)
    }

    /// Validate a segment before it is written. A segment is either inline
    /// or remote, never both.
    pub fn verify(&self) -> MetabaseResult<()> {
        if self.stream_id.is_nil() {
            return Err(MetabaseError::invalid("StreamID missing"));
        }
        if self.encrypted_key.is_empty() || self.encrypted_key_nonce.is_empty() {
            return Err(MetabaseError::invalid("EncryptedKey missing"));
        }
        if self.encrypted_size < 0 || self.plain_size < 0 || self.plain_offset < 0 {
            return Err(MetabaseError::invalid(format!(
                "segment {} has negative size or offset",
                self.position
            )));
        }
        if self.position.part > SegmentPosition::MAX_PART {
            return Err(MetabaseError::invalid(format!(
                "segment part {} exceeds {}",
                self.position.part,
                SegmentPosition::MAX_PART
            )));
        }
        match (self.is_inline(), self.is_remote()) {
            (true, true) => Err(MetabaseError::invalid(
                "segment cannot carry both inline data and remote pieces",
            )),
            (false, false) => Err(MetabaseError::invalid("remote segment has no pieces")),
            (false, true) => self.redundancy.verify(),
            (true, false) if !self.redundancy.is_zero() => Err(MetabaseError::invalid(
                "inline segment cannot carry a redundancy scheme",
            )),
            (true, false) => Ok(()),
        }
    }
}

/// Column list matching [`SegmentRow`].
pub(crate) const SEGMENT_COLUMNS: &str = "stream_id, position, root_piece_id, \
     encrypted_key_nonce, encrypted_key, encrypted_size, plain_offset, plain_size, \
     redundancy, inline_data, remote_pieces";

/// `segments` row as stored.
#[derive(Clone, FromRow, Debug)]
pub(crate) struct SegmentRow {
    pub stream_id: Uuid,
    pub position: i64,
    pub root_piece_id: Vec<u8>,
    pub encrypted_key_nonce: Vec<u8>,
    pub encrypted_key: Vec<u8>,
    pub encrypted_size: i32,
    pub plain_offset: i64,
    pub plain_size: i32,
    pub redundancy: String,
    pub inline_data: Option<Vec<u8>>,
    pub remote_pieces: String,
}

impl TryFrom<SegmentRow> for Segment {
    type Error = String;

    fn try_from(row: SegmentRow) -> Result<Self, Self::Error> {
        let position = SegmentPosition::decode(row.position);
        let context = format!("segment {}/{}", row.stream_id, position);
        let root_piece_id = PieceId::try_from(row.root_piece_id.as_slice())
            .map_err(|e| format!("{context}: {e}"))?;
        let redundancy: RedundancyScheme = serde_json::from_str(&row.redundancy)
            .map_err(|e| format!("{context}: redundancy: {e}"))?;
        let pieces: Vec<Piece> = serde_json::from_str(&row.remote_pieces)
            .map_err(|e| format!("{context}: remote pieces: {e}"))?;

        Ok(Segment {
            stream_id: row.stream_id,
            position,
            root_piece_id,
            encrypted_key_nonce: row.encrypted_key_nonce,
            encrypted_key: row.encrypted_key,
            encrypted_size: row.encrypted_size,
            plain_offset: row.plain_offset,
            plain_size: row.plain_size,
            redundancy,
            inline_data: row.inline_data,
            pieces,
        })
    }
}
