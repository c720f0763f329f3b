//! Project → shard routing.
//!
//! Every project's metadata lives on exactly one shard. The router maps a
//! project id to that shard deterministically: an explicit pin from the
//! configuration wins, every other project is placed by the first eight bytes
//! of `md5(project_id)` modulo the shard count.

pub mod sqlite;

use crate::errors::{MetabaseError, MetabaseResult};
use std::collections::HashMap;
use uuid::Uuid;

pub use sqlite::{SqliteAdapter, TransactionAdapter};

/// Anything that can be routed to needs a name pins can refer to.
pub trait NamedShard {
    fn shard_name(&self) -> &str;
}

impl NamedShard for SqliteAdapter {
    fn shard_name(&self) -> &str {
        self.name()
    }
}

#[derive(Debug, Clone)]
pub struct AdapterRouter<A> {
    adapters: Vec<A>,
    pins: HashMap<Uuid, usize>,
}

impl<A: NamedShard> AdapterRouter<A> {
    /// Build a router over `adapters`. `pins` maps projects to shard names.
    pub fn new(adapters: Vec<A>, pins: &HashMap<Uuid, String>) -> MetabaseResult<Self> {
        if adapters.is_empty() {
            return Err(MetabaseError::Config("no metabase shards configured".into()));
        }

        let mut resolved = HashMap::with_capacity(pins.len());
        for (project, shard) in pins {
            let index = adapters
                .iter()
                .position(|a| a.shard_name() == shard)
                .ok_or_else(|| {
                    MetabaseError::Config(format!(
                        "project {} pinned to unknown shard `{}`",
                        project, shard
                    ))
                })?;
            resolved.insert(*project, index);
        }

        Ok(Self {
            adapters,
            pins: resolved,
        })
    }

    /// The adapter owning `project_id`. Total: every id maps to some shard.
    pub fn choose_adapter(&self, project_id: Uuid) -> &A {
        let index = match self.pins.get(&project_id) {
            Some(index) => *index,
            None => shard_index(project_id, self.adapters.len()),
        };
        &self.adapters[index]
    }

    pub fn adapters(&self) -> &[A] {
        &self.adapters
    }
}

/// Hash placement for unpinned projects.
fn shard_index(project_id: Uuid, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let digest = md5::compute(project_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count as u64) as usize
}
