//! Metabase operations: shard wiring, the precommit constraint and the
//! retrieval index.

pub mod metabase;
pub mod precommit;
pub mod retrieval;
