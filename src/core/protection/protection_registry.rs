// Per-guild protection state and the registry that owns it.
//
// A `GuildProtection` is built in one go from a config snapshot. Any config
// change produces a brand new instance that replaces the old one in the
// registry, which also throws away every in-flight counter for that guild.

use super::protection_models::{
    Detection, GuildProtectionConfig, JoinEvent, MessageEvent, MessageRef, ProtectionType,
    PunishmentAction, PunishmentRequest, Verdict,
};
use super::protection_service::ProtectionError;
use super::protection_stats::{
    AntiAltStats, AntiMassMentionStats, AntiMassPostStats, AntiPatternStats,
    AntiPostChannelStats, AntiRaidStats, AntiSpamStats,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Every enabled protection tracker for one guild.
pub struct GuildProtection {
    guild_id: u64,
    raid: Option<Mutex<AntiRaidStats>>,
    spam: Option<AntiSpamStats>,
    alt: Option<AntiAltStats>,
    mass_mention: Option<AntiMassMentionStats>,
    pattern: Option<AntiPatternStats>,
    mass_post: Option<AntiMassPostStats>,
    post_channel: Option<AntiPostChannelStats>,
}

impl GuildProtection {
    /// A guild with nothing configured. Every check returns `NotDetected`.
    pub fn empty(guild_id: u64) -> Self {
        Self {
            guild_id,
            raid: None,
            spam: None,
            alt: None,
            mass_mention: None,
            pattern: None,
            mass_post: None,
            post_channel: None,
        }
    }

    /// Build trackers for every enabled setting. Disabled settings are kept
    /// in the store but get no tracker.
    pub fn from_config(
        config: &GuildProtectionConfig,
        max_tracked_mentions: usize,
    ) -> Result<Self, ProtectionError> {
        let mut guild = Self::empty(config.guild_id);

        if let Some(s) = config.raid.as_ref().filter(|s| s.enabled) {
            guild.raid = Some(Mutex::new(AntiRaidStats::new(s.clone())?));
        }
        if let Some(s) = config.spam.as_ref().filter(|s| s.enabled) {
            guild.spam = Some(AntiSpamStats::new(s.clone())?);
        }
        if let Some(s) = config.alt.as_ref().filter(|s| s.enabled) {
            guild.alt = Some(AntiAltStats::new(s.clone())?);
        }
        if let Some(s) = config.mass_mention.as_ref().filter(|s| s.enabled) {
            guild.mass_mention = Some(AntiMassMentionStats::new(s.clone(), max_tracked_mentions)?);
        }
        if let Some(s) = config.pattern.as_ref().filter(|s| s.enabled) {
            guild.pattern = Some(AntiPatternStats::new(s.clone())?);
        }
        if let Some(s) = config.mass_post.as_ref().filter(|s| s.enabled) {
            guild.mass_post = Some(AntiMassPostStats::new(s.clone())?);
        }
        if let Some(s) = config.post_channel.as_ref().filter(|s| s.enabled) {
            guild.post_channel = Some(AntiPostChannelStats::new(s.clone())?);
        }

        Ok(guild)
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    /// Which protections currently have a live tracker.
    pub fn active(&self) -> Vec<ProtectionType> {
        let mut active = Vec::new();
        if self.raid.is_some() {
            active.push(ProtectionType::Raid);
        }
        if self.spam.is_some() {
            active.push(ProtectionType::Spam);
        }
        if self.alt.is_some() {
            active.push(ProtectionType::Alt);
        }
        if self.mass_mention.is_some() {
            active.push(ProtectionType::MassMention);
        }
        if self.pattern.is_some() {
            active.push(ProtectionType::Pattern);
        }
        if self.mass_post.is_some() {
            active.push(ProtectionType::MassPost);
        }
        if self.post_channel.is_some() {
            active.push(ProtectionType::PostChannel);
        }
        active
    }

    /// Run a message through post-channel, spam, mass-mention and mass-post,
    /// in that order. The first protection that fires decides the verdict.
    pub fn check_message(&self, event: &MessageEvent) -> Detection {
        let this_message = MessageRef {
            channel_id: event.channel_id,
            message_id: event.message_id,
        };

        if let Some(stats) = &self.post_channel {
            if stats.check(event) {
                let delete =
                    delete_targets(stats.action(), stats.deletes_messages(), vec![this_message]);
                return self.verdict(
                    ProtectionType::PostChannel,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    "Posted in a honeypot channel".to_string(),
                    delete,
                );
            }
        }

        if let Some(stats) = &self.spam {
            if stats.check(event) {
                return self.verdict(
                    ProtectionType::Spam,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    "Repeated the same message".to_string(),
                    delete_targets(stats.action(), false, vec![this_message]),
                );
            }
        }

        if let Some(stats) = &self.mass_mention {
            if stats.check(event) {
                return self.verdict(
                    ProtectionType::MassMention,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    format!("Mass mentions ({} in last message)", event.mention_count),
                    vec![this_message],
                );
            }
        }

        if let Some(stats) = &self.mass_post {
            if let Some(hits) = stats.check(event) {
                let reason = format!("Posted similar content in {} messages", hits.len());
                let delete = delete_targets(stats.action(), stats.deletes_messages(), hits);
                return self.verdict(
                    ProtectionType::MassPost,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    reason,
                    delete,
                );
            }
        }

        Detection::NotDetected
    }

    /// Run a join through raid, alt and pattern checks.
    ///
    /// Raid goes first so every join is counted, even ones another check
    /// would have caught on its own.
    pub fn check_join(&self, event: &JoinEvent) -> Detection {
        if let Some(raid) = &self.raid {
            let mut stats = raid.lock();
            if let Some(users) = stats.record_join(event.user_id, event.timestamp) {
                let punishment =
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id());
                let reason = format!(
                    "{} joins in {} seconds",
                    users.len(),
                    stats.setting().seconds
                );
                // Start a new detection epoch.
                *stats = stats.next_epoch();
                drop(stats);

                return self.verdict(ProtectionType::Raid, users, punishment, reason, Vec::new());
            }
        }

        if let Some(stats) = &self.alt {
            if stats.check(event) {
                return self.verdict(
                    ProtectionType::Alt,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    "Account is too new".to_string(),
                    Vec::new(),
                );
            }
        }

        if let Some(stats) = &self.pattern {
            if let Some(score) = stats.check(event) {
                return self.verdict(
                    ProtectionType::Pattern,
                    vec![event.user_id],
                    Punishment::new(stats.action(), stats.punish_duration(), stats.role_id()),
                    format!("Username matched a blocked pattern (score {})", score),
                    Vec::new(),
                );
            }
        }

        Detection::NotDetected
    }

    fn verdict(
        &self,
        protection: ProtectionType,
        users: Vec<u64>,
        punishment: Punishment,
        reason: String,
        delete: Vec<MessageRef>,
    ) -> Detection {
        let punishments = users
            .into_iter()
            .map(|user_id| PunishmentRequest {
                guild_id: self.guild_id,
                user_id,
                action: punishment.action,
                duration_minutes: punishment.duration_minutes,
                role_id: punishment.role_id,
                reason: format!("{}: {}", protection, reason),
            })
            .collect();

        Detection::Detected(Verdict {
            protection,
            punishments,
            delete,
        })
    }
}

/// Messages to remove for a verdict. `Delete` always removes the offending
/// messages, whatever the protection's own delete flag says.
fn delete_targets(
    action: PunishmentAction,
    deletes_messages: bool,
    messages: Vec<MessageRef>,
) -> Vec<MessageRef> {
    if deletes_messages || action == PunishmentAction::Delete {
        messages
    } else {
        Vec::new()
    }
}

/// Action parameters copied out of a tracker before its lock is released.
struct Punishment {
    action: PunishmentAction,
    duration_minutes: u32,
    role_id: Option<u64>,
}

impl Punishment {
    fn new(action: PunishmentAction, duration_minutes: u32, role_id: Option<u64>) -> Self {
        Self {
            action,
            duration_minutes,
            role_id,
        }
    }
}

/// Guild id -> live protection state.
///
/// Lookups hand out an `Arc` so no map shard stays locked while a
/// detector runs.
#[derive(Default)]
pub struct ProtectionRegistry {
    guilds: DashMap<u64, Arc<GuildProtection>>,
}

impl ProtectionRegistry {
    pub fn new() -> Self {
        Self {
            guilds: DashMap::new(),
        }
    }

    pub fn get(&self, guild_id: u64) -> Option<Arc<GuildProtection>> {
        self.guilds.get(&guild_id).map(|g| Arc::clone(g.value()))
    }

    /// Insert or replace. Replacing drops all counters of the old instance.
    pub fn insert(&self, guild: GuildProtection) -> Arc<GuildProtection> {
        let guild = Arc::new(guild);
        self.guilds.insert(guild.guild_id(), Arc::clone(&guild));
        guild
    }

    /// Insert only if nothing is registered yet; returns whichever instance won.
    pub fn get_or_insert_with(
        &self,
        guild_id: u64,
        build: impl FnOnce() -> GuildProtection,
    ) -> Arc<GuildProtection> {
        Arc::clone(
            self.guilds
                .entry(guild_id)
                .or_insert_with(|| Arc::new(build()))
                .value(),
        )
    }

    pub fn remove(&self, guild_id: u64) -> Option<Arc<GuildProtection>> {
        self.guilds.remove(&guild_id).map(|(_, guild)| guild)
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }
}
