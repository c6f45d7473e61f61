// Bot configuration, read from the environment (and `.env` if present).

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::core::protection::DEFAULT_MAX_TRACKED_MENTIONS;

const DEFAULT_PROTECTION_CONFIG_PATH: &str = "data/protection.json";

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    /// JSON file holding every guild's protection settings
    pub protection_config_path: PathBuf,
    /// Cap on mention timestamps kept per user
    pub max_tracked_mentions: usize,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        // Load environment variables from .env file (if it exists)
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context(
                "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
            )?;

        let protection_config_path = lookup("PROTECTION_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROTECTION_CONFIG_PATH));

        let max_tracked_mentions = match lookup("PROTECTION_MAX_TRACKED_MENTIONS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("PROTECTION_MAX_TRACKED_MENTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_TRACKED_MENTIONS,
        };

        Ok(Self {
            discord_token,
            protection_config_path,
            max_tracked_mentions,
        })
    }
}
