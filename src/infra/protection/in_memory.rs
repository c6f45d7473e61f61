// In-memory protection settings store.
//
// Nothing is persisted; handy for tests and for running the bot with
// settings pushed in at startup.

use crate::core::protection::{GuildProtectionConfig, ProtectionError, ProtectionStore};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryProtectionStore {
    configs: DashMap<u64, GuildProtectionConfig>,
}

impl InMemoryProtectionStore {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }
}

#[async_trait]
impl ProtectionStore for InMemoryProtectionStore {
    async fn get_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<GuildProtectionConfig>, ProtectionError> {
        Ok(self.configs.get(&guild_id).map(|entry| entry.clone()))
    }

    async fn save_config(&self, config: GuildProtectionConfig) -> Result<(), ProtectionError> {
        self.configs.insert(config.guild_id, config);
        Ok(())
    }

    async fn get_all_configs(&self) -> Result<Vec<GuildProtectionConfig>, ProtectionError> {
        Ok(self
            .configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
