// Protection service - the entry point the Discord layer talks to.
//
// This service handles:
// - Loading per-guild settings from a store and building trackers
// - Routing message/join events to the right guild's trackers
// - Enabling/disabling protections and swapping in fresh trackers
// - Handing verdicts to a punishment executor and reporting what happened
//
// NO Discord dependencies here - just pure domain logic.

use super::protection_models::{
    Detection, GuildProtectionConfig, JoinEvent, MessageEvent, MessageRef, ProtectionType,
    PunishmentAction, PunishmentRequest, Verdict,
};
use super::protection_registry::{GuildProtection, ProtectionRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// How many mention timestamps one user may hold by default.
pub const DEFAULT_MAX_TRACKED_MENTIONS: usize = 100;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("{protection} is not configured for guild {guild_id}")]
    ConfigurationMissing {
        guild_id: u64,
        protection: ProtectionType,
    },

    #[error("Invalid {protection} setting: {reason}")]
    InvalidSetting {
        protection: ProtectionType,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum PunishError {
    #[error("Discord error: {0}")]
    Discord(String),

    #[error("No role configured for {0}")]
    MissingRole(PunishmentAction),
}

// ============================================================================
// PORTS
// ============================================================================

/// Where per-guild protection settings live.
#[async_trait]
pub trait ProtectionStore: Send + Sync {
    /// `None` means the guild never configured any protection.
    async fn get_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<GuildProtectionConfig>, ProtectionError>;

    async fn save_config(&self, config: GuildProtectionConfig) -> Result<(), ProtectionError>;

    async fn get_all_configs(&self) -> Result<Vec<GuildProtectionConfig>, ProtectionError>;
}

/// Carries out punishments. Implemented by the Discord layer.
#[async_trait]
pub trait PunishmentExecutor: Send + Sync {
    async fn apply(&self, request: &PunishmentRequest) -> Result<(), PunishError>;

    async fn delete_message(&self, guild_id: u64, message: MessageRef) -> Result<(), PunishError>;
}

/// Outcome of [`ProtectionService::enforce`].
#[derive(Debug, Default)]
pub struct EnforcementReport {
    pub punished: usize,
    pub deleted: usize,
    pub failures: Vec<PunishError>,
}

impl EnforcementReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ProtectionService<S: ProtectionStore> {
    store: S,
    registry: ProtectionRegistry,
    max_tracked_mentions: usize,
}

impl<S: ProtectionStore> ProtectionService<S> {
    pub fn new(store: S) -> Self {
        Self::with_max_tracked_mentions(store, DEFAULT_MAX_TRACKED_MENTIONS)
    }

    pub fn with_max_tracked_mentions(store: S, max_tracked_mentions: usize) -> Self {
        Self {
            store,
            registry: ProtectionRegistry::new(),
            max_tracked_mentions,
        }
    }

    /// Build trackers for every stored guild. Guilds with broken settings are
    /// logged once and run unprotected so one bad row can't keep the bot from
    /// starting. Returns how many guilds loaded cleanly.
    pub async fn load_all(&self) -> Result<usize, ProtectionError> {
        let configs = self.store.get_all_configs().await?;
        let mut loaded = 0;

        for config in configs {
            let guild = match GuildProtection::from_config(&config, self.max_tracked_mentions) {
                Ok(guild) => {
                    loaded += 1;
                    guild
                }
                Err(e) => invalid_config(config.guild_id, e),
            };
            self.registry.insert(guild);
        }

        Ok(loaded)
    }

    /// Read a guild's settings and (re)build its trackers.
    ///
    /// A guild with no stored settings gets an empty entry so later events
    /// don't hit the store again.
    #[allow(dead_code)]
    pub async fn load_guild(&self, guild_id: u64) -> Result<Arc<GuildProtection>, ProtectionError> {
        let guild = match self.store.get_config(guild_id).await? {
            Some(config) => GuildProtection::from_config(&config, self.max_tracked_mentions)?,
            None => GuildProtection::empty(guild_id),
        };

        tracing::debug!(guild_id, active = ?guild.active(), "Loaded guild protection");
        Ok(self.registry.insert(guild))
    }

    /// Cached trackers for a guild, reading the store on first use.
    ///
    /// Two events racing on an uncached guild may both read the store, but
    /// only the first built instance is registered and both use it.
    async fn guild(&self, guild_id: u64) -> Result<Arc<GuildProtection>, ProtectionError> {
        if let Some(guild) = self.registry.get(guild_id) {
            return Ok(guild);
        }

        let built = match self.store.get_config(guild_id).await? {
            Some(config) => self.build_or_empty(&config),
            None => GuildProtection::empty(guild_id),
        };
        Ok(self.registry.get_or_insert_with(guild_id, || built))
    }

    /// Trackers for a stored config, or an empty guild when the config is invalid.
    fn build_or_empty(&self, config: &GuildProtectionConfig) -> GuildProtection {
        GuildProtection::from_config(config, self.max_tracked_mentions)
            .unwrap_or_else(|e| invalid_config(config.guild_id, e))
    }

    /// Check a guild message against every enabled message protection.
    pub async fn handle_message(&self, event: &MessageEvent) -> Result<Detection, ProtectionError> {
        let guild = self.guild(event.guild_id).await?;
        let detection = guild.check_message(event);
        log_detection(event.guild_id, &detection);
        Ok(detection)
    }

    /// Check a member join against every enabled join protection.
    pub async fn handle_join(&self, event: &JoinEvent) -> Result<Detection, ProtectionError> {
        if event.is_bot {
            return Ok(Detection::NotDetected);
        }

        let guild = self.guild(event.guild_id).await?;
        let detection = guild.check_join(event);
        log_detection(event.guild_id, &detection);
        Ok(detection)
    }

    /// Get the stored settings for a guild (an empty config if none exist).
    #[allow(dead_code)]
    pub async fn get_config(&self, guild_id: u64) -> Result<GuildProtectionConfig, ProtectionError> {
        Ok(self
            .store
            .get_config(guild_id)
            .await?
            .unwrap_or_else(|| GuildProtectionConfig::new(guild_id)))
    }

    /// Validate, persist and activate a full settings snapshot.
    ///
    /// Validation happens first, so an invalid config never reaches the store.
    pub async fn set_config(&self, config: GuildProtectionConfig) -> Result<(), ProtectionError> {
        let guild = GuildProtection::from_config(&config, self.max_tracked_mentions)?;
        self.store.save_config(config).await?;
        self.registry.insert(guild);
        Ok(())
    }

    /// Enable or disable one protection. The protection must already have
    /// settings stored, otherwise there is nothing to enable.
    #[allow(dead_code)]
    pub async fn set_enabled(
        &self,
        guild_id: u64,
        protection: ProtectionType,
        enabled: bool,
    ) -> Result<(), ProtectionError> {
        let missing = || ProtectionError::ConfigurationMissing {
            guild_id,
            protection,
        };

        let mut config = self.store.get_config(guild_id).await?.ok_or_else(missing)?;
        if !config.set_enabled(protection, enabled) {
            return Err(missing());
        }

        tracing::info!(guild_id, %protection, enabled, "Protection toggled");
        self.set_config(config).await
    }

    /// Drop every tracker for a guild (e.g. the bot left it).
    pub fn forget_guild(&self, guild_id: u64) {
        self.registry.remove(guild_id);
    }

    /// Apply a verdict: delete flagged messages, then punish each user.
    ///
    /// Failures are logged and collected, never retried.
    pub async fn enforce(
        &self,
        verdict: &Verdict,
        executor: &dyn PunishmentExecutor,
    ) -> EnforcementReport {
        let mut report = EnforcementReport::default();

        let guild_id = match verdict.punishments.first() {
            Some(p) => p.guild_id,
            None => return report,
        };

        for message in &verdict.delete {
            match executor.delete_message(guild_id, *message).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(
                        guild_id,
                        channel_id = message.channel_id,
                        message_id = message.message_id,
                        "Failed to delete flagged message: {}",
                        e
                    );
                    report.failures.push(e);
                }
            }
        }

        for request in verdict
            .punishments
            .iter()
            .filter(|r| r.action.punishes_member())
        {
            match executor.apply(request).await {
                Ok(()) => report.punished += 1,
                Err(e) => {
                    tracing::warn!(
                        guild_id,
                        user_id = request.user_id,
                        action = %request.action,
                        "Failed to apply punishment: {}",
                        e
                    );
                    report.failures.push(e);
                }
            }
        }

        report
    }
}

/// Log a stored config that failed validation and cache the guild as unprotected,
/// so later events don't re-read and re-report it.
fn invalid_config(guild_id: u64, error: ProtectionError) -> GuildProtection {
    tracing::warn!(guild_id, "Invalid protection config, guild runs unprotected: {}", error);
    GuildProtection::empty(guild_id)
}

fn log_detection(guild_id: u64, detection: &Detection) {
    if let Detection::Detected(verdict) = detection {
        let action = verdict
            .punishments
            .first()
            .map(|p| p.action)
            .unwrap_or(PunishmentAction::None);
        tracing::info!(
            guild_id,
            protection = %verdict.protection,
            %action,
            users = verdict.punishments.len(),
            messages = verdict.delete.len(),
            "Protection triggered"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::protection_models::{
        AntiMassMentionSetting, AntiRaidSetting, AntiSpamSetting,
    };
    use chrono::{DateTime, Utc};
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store for testing. Reads yield once so concurrent callers interleave.
    struct MockProtectionStore {
        configs: DashMap<u64, GuildProtectionConfig>,
        reads: AtomicUsize,
    }

    impl MockProtectionStore {
        fn new() -> Self {
            Self {
                configs: DashMap::new(),
                reads: AtomicUsize::new(0),
            }
        }

        fn with(config: GuildProtectionConfig) -> Self {
            let store = Self::new();
            store.configs.insert(config.guild_id, config);
            store
        }
    }

    #[async_trait]
    impl ProtectionStore for MockProtectionStore {
        async fn get_config(
            &self,
            guild_id: u64,
        ) -> Result<Option<GuildProtectionConfig>, ProtectionError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.configs.get(&guild_id).map(|c| c.clone()))
        }

        async fn save_config(&self, config: GuildProtectionConfig) -> Result<(), ProtectionError> {
            self.configs.insert(config.guild_id, config);
            Ok(())
        }

        async fn get_all_configs(&self) -> Result<Vec<GuildProtectionConfig>, ProtectionError> {
            Ok(self.configs.iter().map(|c| c.value().clone()).collect())
        }
    }

    /// Records every call and fails for one chosen user.
    #[derive(Default)]
    struct RecordingExecutor {
        applied: Mutex<Vec<PunishmentRequest>>,
        deleted: Mutex<Vec<MessageRef>>,
        fail_for_user: Option<u64>,
    }

    #[async_trait]
    impl PunishmentExecutor for RecordingExecutor {
        async fn apply(&self, request: &PunishmentRequest) -> Result<(), PunishError> {
            if self.fail_for_user == Some(request.user_id) {
                return Err(PunishError::Discord("Missing Permissions".to_string()));
            }
            self.applied.lock().push(request.clone());
            Ok(())
        }

        async fn delete_message(&self, _guild_id: u64, message: MessageRef) -> Result<(), PunishError> {
            self.deleted.lock().push(message);
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(guild_id: u64, user_id: u64, content: &str, mentions: u32, secs: i64) -> MessageEvent {
        MessageEvent {
            guild_id,
            user_id,
            channel_id: 10,
            message_id: secs as u64,
            content: content.to_string(),
            mention_count: mentions,
            is_bot: false,
            timestamp: at(secs),
        }
    }

    fn join(guild_id: u64, user_id: u64, secs: i64) -> JoinEvent {
        JoinEvent {
            guild_id,
            user_id,
            username: "someone".to_string(),
            account_created_at: at(-10_000_000),
            is_bot: false,
            timestamp: at(secs),
        }
    }

    fn spam_config(guild_id: u64) -> GuildProtectionConfig {
        let mut config = GuildProtectionConfig::new(guild_id);
        config.spam = Some(AntiSpamSetting {
            message_threshold: 2,
            ..Default::default()
        });
        config
    }

    #[tokio::test]
    async fn test_unconfigured_guild_never_detects() {
        let service = ProtectionService::new(MockProtectionStore::new());

        for i in 0..10 {
            let detection = service
                .handle_message(&message(1, 2, "same", 50, i))
                .await
                .unwrap();
            assert_eq!(detection, Detection::NotDetected);
        }
    }

    #[tokio::test]
    async fn test_loads_guild_lazily_from_store() {
        let service = ProtectionService::new(MockProtectionStore::with(spam_config(1)));

        let first = service.handle_message(&message(1, 2, "buy", 0, 0)).await.unwrap();
        assert!(!first.is_detected());

        let second = service.handle_message(&message(1, 2, "buy", 0, 1)).await.unwrap();
        let Detection::Detected(verdict) = second else {
            panic!("second identical message should be spam");
        };
        assert_eq!(verdict.protection, ProtectionType::Spam);
        assert_eq!(verdict.punishments[0].user_id, 2);
    }

    #[tokio::test]
    async fn test_guilds_are_isolated() {
        let store = MockProtectionStore::with(spam_config(1));
        store.save_config(spam_config(2)).await.unwrap();
        let service = ProtectionService::new(store);

        service.handle_message(&message(1, 5, "x", 0, 0)).await.unwrap();
        let other = service.handle_message(&message(2, 5, "x", 0, 1)).await.unwrap();
        assert!(!other.is_detected());
    }

    #[tokio::test]
    async fn test_set_enabled_requires_existing_setting() {
        let service = ProtectionService::new(MockProtectionStore::new());

        let err = service
            .set_enabled(1, ProtectionType::Raid, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtectionError::ConfigurationMissing {
                guild_id: 1,
                protection: ProtectionType::Raid
            }
        ));
    }

    #[tokio::test]
    async fn test_disable_takes_effect_immediately() {
        let service = ProtectionService::new(MockProtectionStore::with(spam_config(1)));
        service.load_all().await.unwrap();

        service
            .set_enabled(1, ProtectionType::Spam, false)
            .await
            .unwrap();

        service.handle_message(&message(1, 2, "buy", 0, 0)).await.unwrap();
        let detection = service.handle_message(&message(1, 2, "buy", 0, 1)).await.unwrap();
        assert!(!detection.is_detected());
        assert_eq!(service.get_config(1).await.unwrap().spam.map(|s| s.enabled), Some(false));
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_saved() {
        let service = ProtectionService::new(MockProtectionStore::new());
        let mut config = GuildProtectionConfig::new(1);
        config.mass_mention = Some(AntiMassMentionSetting {
            action: PunishmentAction::AddRole,
            role_id: None,
            ..Default::default()
        });

        assert!(service.set_config(config).await.is_err());
        assert!(service.get_config(1).await.unwrap().mass_mention.is_none());
    }

    #[tokio::test]
    async fn test_load_all_skips_broken_guilds() {
        let store = MockProtectionStore::with(spam_config(1));
        let mut broken = GuildProtectionConfig::new(2);
        broken.raid = Some(AntiRaidSetting {
            seconds: 0,
            ..Default::default()
        });
        store.save_config(broken).await.unwrap();

        let service = ProtectionService::new(store);
        assert_eq!(service.load_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enforce_reports_failures_without_stopping() {
        let mut config = GuildProtectionConfig::new(1);
        config.raid = Some(AntiRaidSetting {
            user_threshold: 3,
            ..Default::default()
        });
        let service = ProtectionService::new(MockProtectionStore::with(config));

        let mut verdict = None;
        for user in 1..=3 {
            if let Detection::Detected(v) = service.handle_join(&join(1, user, user as i64)).await.unwrap() {
                verdict = Some(v);
            }
        }
        let verdict = verdict.expect("raid should fire on third join");

        let executor = RecordingExecutor {
            fail_for_user: Some(2),
            ..Default::default()
        };
        let report = service.enforce(&verdict, &executor).await;

        assert_eq!(report.punished, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        let punished: Vec<u64> = executor.applied.lock().iter().map(|p| p.user_id).collect();
        assert_eq!(punished, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_bot_joins_are_ignored() {
        let mut config = GuildProtectionConfig::new(1);
        config.raid = Some(AntiRaidSetting {
            user_threshold: 1,
            ..Default::default()
        });
        let service = ProtectionService::new(MockProtectionStore::with(config));

        let mut bot = join(1, 9, 0);
        bot.is_bot = true;
        assert!(!service.handle_join(&bot).await.unwrap().is_detected());
        assert!(service.handle_join(&join(1, 10, 0)).await.unwrap().is_detected());
    }

    #[tokio::test]
    async fn test_concurrent_first_events_share_one_tracker() {
        let service = ProtectionService::new(MockProtectionStore::with(spam_config(1)));

        let first_msg = message(1, 2, "buy", 0, 0);
        let second_msg = message(1, 2, "buy", 0, 1);
        let (first, second) = tokio::join!(
            service.handle_message(&first_msg),
            service.handle_message(&second_msg),
        );
        let detected = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|d| d.is_detected())
            .count();
        assert_eq!(detected, 1);
    }

    #[tokio::test]
    async fn test_invalid_stored_config_is_read_once() {
        let mut broken = GuildProtectionConfig::new(1);
        broken.raid = Some(AntiRaidSetting {
            seconds: 0,
            ..Default::default()
        });
        let service = ProtectionService::new(MockProtectionStore::with(broken));

        for i in 0..5 {
            let detection = service.handle_join(&join(1, i, i as i64)).await.unwrap();
            assert!(!detection.is_detected());
        }
        assert_eq!(service.store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_all_caches_broken_guilds() {
        let mut broken = GuildProtectionConfig::new(2);
        broken.raid = Some(AntiRaidSetting {
            seconds: 0,
            ..Default::default()
        });
        let service = ProtectionService::new(MockProtectionStore::with(broken));
        service.load_all().await.unwrap();

        service.handle_join(&join(2, 1, 0)).await.unwrap();
        assert_eq!(service.store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_only_verdict_punishes_nobody() {
        let mut config = GuildProtectionConfig::new(1);
        config.spam = Some(AntiSpamSetting {
            message_threshold: 2,
            action: PunishmentAction::Delete,
            ..Default::default()
        });
        let service = ProtectionService::new(MockProtectionStore::with(config));

        service.handle_message(&message(1, 2, "buy", 0, 0)).await.unwrap();
        let Detection::Detected(verdict) =
            service.handle_message(&message(1, 2, "buy", 0, 1)).await.unwrap()
        else {
            panic!("second identical message should be spam");
        };

        let executor = RecordingExecutor::default();
        let report = service.enforce(&verdict, &executor).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.punished, 0);
        assert!(executor.applied.lock().is_empty());
        assert_eq!(executor.deleted.lock()[0].message_id, 1);
    }
}
