//! Metadata-consistency core of an object storage control plane.
//!
//! The crate owns two things:
//!
//! - the **precommit constraint** ([`TransactionAdapter::precommit_constraint`]),
//!   run by commit and delete flows inside their own transaction to enforce a
//!   single unversioned object per location, Object Lock protection, and
//!   version assignment;
//! - the **retrieval index** (lookups on [`Metabase`]) resolving exact and
//!   latest versions and locating segments by position or plaintext offset.
//!
//! Metadata is sharded across SQLite databases by project. All mutual
//! exclusion comes from backend transactions; nothing in this crate locks.

pub mod adapters;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;

pub use adapters::{AdapterRouter, SqliteAdapter, TransactionAdapter};
pub use config::{MetabaseConfig, ShardConfig};
pub use errors::{MetabaseError, MetabaseResult};
pub use models::*;
pub use services::{
    metabase::Metabase,
    precommit::{
        PRECOMMIT_DELETE_MODES, PrecommitConstraint, PrecommitConstraintResult,
        PrecommitConstraintWithNonPendingResult, PrecommitDeleteMode,
    },
};
