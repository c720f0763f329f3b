//! src/services/metabase.rs
//!
//! `Metabase` ties the configured shards together: it opens one
//! [`SqliteAdapter`] per shard, routes projects to them, and is the receiver
//! for the retrieval index and the routed precommit entry point.

use crate::{
    adapters::{AdapterRouter, SqliteAdapter},
    config::MetabaseConfig,
    errors::MetabaseResult,
};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Metabase {
    router: AdapterRouter<SqliteAdapter>,
}

impl Metabase {
    /// Connect every configured shard.
    pub async fn open(config: &MetabaseConfig) -> MetabaseResult<Self> {
        let mut adapters = Vec::with_capacity(config.shards.len());
        for shard in &config.shards {
            adapters.push(
                SqliteAdapter::connect(shard, config.max_connections, config.busy_timeout).await?,
            );
        }
        info!("metabase opened with {} shard(s)", adapters.len());
        Self::from_adapters(adapters, config)
    }

    /// Build a metabase over already-connected adapters.
    pub fn from_adapters(
        adapters: Vec<SqliteAdapter>,
        config: &MetabaseConfig,
    ) -> MetabaseResult<Self> {
        Ok(Self {
            router: AdapterRouter::new(adapters, &config.project_pins)?,
        })
    }

    /// The adapter owning `project_id`.
    pub fn choose_adapter(&self, project_id: Uuid) -> &SqliteAdapter {
        self.router.choose_adapter(project_id)
    }

    pub fn adapters(&self) -> &[SqliteAdapter] {
        self.router.adapters()
    }

    /// Create the metabase tables on every shard.
    pub async fn ensure_schema(&self) -> MetabaseResult<()> {
        for adapter in self.adapters() {
            adapter.ensure_schema().await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        for adapter in self.adapters() {
            adapter.pool().close().await;
        }
    }
}
