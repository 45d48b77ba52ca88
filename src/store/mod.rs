pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod upstash;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{NotificationEntry, Store, UserRecord};
pub use upstash::UpstashStore;

use crate::config::StoreConfig;
use anyhow::Context;
use std::time::Duration;

/// Factory: create the right store backend from config
pub fn create_store(config: &StoreConfig) -> anyhow::Result<Box<dyn Store>> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "sqlite" => Ok(Box::new(SqliteStore::open(&config.sqlite_path)?)),
        "upstash" => {
            let url = config
                .upstash_url
                .as_deref()
                .context("store.upstash_url is required for the upstash backend")?;
            let token = config
                .upstash_token
                .as_deref()
                .context("store.upstash_token is required for the upstash backend")?;
            Ok(Box::new(UpstashStore::new(
                url,
                token,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => anyhow::bail!("Unknown store backend '{other}'"),
    }
}
