// JSON-file protection settings store.
//
// The whole file is loaded once at startup and kept in memory; every save
// rewrites the file. Fine for the handful of guilds a single bot serves.

use crate::core::protection::{GuildProtectionConfig, ProtectionError, ProtectionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::sync::RwLock;

pub struct JsonProtectionStore {
    path: PathBuf,
    cache: RwLock<HashMap<u64, GuildProtectionConfig>>,
}

impl JsonProtectionStore {
    /// Open (or start) a settings file. A missing file means no guild has
    /// configured anything yet; an unreadable one is an error.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ProtectionError> {
        let path = path.into();
        let cache = if path.exists() {
            let file = File::open(&path).map_err(|e| ProtectionError::Storage(e.to_string()))?;
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| ProtectionError::Storage(format!("{}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<(), ProtectionError> {
        let cache = self.cache.read().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProtectionError::Storage(e.to_string()))?;
        }
        let file = File::create(&self.path).map_err(|e| ProtectionError::Storage(e.to_string()))?;
        serde_json::to_writer_pretty(file, &*cache)
            .map_err(|e| ProtectionError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ProtectionStore for JsonProtectionStore {
    async fn get_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<GuildProtectionConfig>, ProtectionError> {
        let cache = self.cache.read().await;
        Ok(cache.get(&guild_id).cloned())
    }

    async fn save_config(&self, config: GuildProtectionConfig) -> Result<(), ProtectionError> {
        let mut cache = self.cache.write().await;
        cache.insert(config.guild_id, config);
        drop(cache); // Release lock before persisting
        self.persist().await
    }

    async fn get_all_configs(&self) -> Result<Vec<GuildProtectionConfig>, ProtectionError> {
        let cache = self.cache.read().await;
        Ok(cache.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::{AntiRaidSetting, PunishmentAction};

    #[tokio::test]
    async fn test_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("protection.json");

        let store = JsonProtectionStore::new(&path).unwrap();
        let mut config = GuildProtectionConfig::new(42);
        config.raid = Some(AntiRaidSetting {
            user_threshold: 8,
            action: PunishmentAction::Kick,
            ..Default::default()
        });
        store.save_config(config.clone()).await.unwrap();

        let reopened = JsonProtectionStore::new(&path).unwrap();
        assert_eq!(reopened.get_config(42).await.unwrap(), Some(config));
        assert_eq!(reopened.get_all_configs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProtectionStore::new(dir.path().join("nope.json")).unwrap();

        assert!(store.get_config(1).await.unwrap().is_none());
        assert!(store.get_all_configs().await.unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protection.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonProtectionStore::new(&path),
            Err(ProtectionError::Storage(_))
        ));
    }
}
