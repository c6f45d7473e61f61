// Protection domain models - settings, events, and verdicts for the guild protection system.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts gateway events into `MessageEvent` / `JoinEvent`
// and turns `PunishmentRequest`s back into API calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PUNISHMENTS
// ============================================================================

/// What to do to a user once a protection fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunishmentAction {
    /// Add the guild's mute role (chat + voice)
    Mute,
    Kick,
    Ban,
    /// Ban then immediately unban to purge recent messages
    Softban,
    /// Strip every role the member has
    RemoveRoles,
    /// Text-only mute
    ChatMute,
    /// Server voice mute
    VoiceMute,
    /// Add a configured role (e.g. a quarantine role)
    AddRole,
    /// Only delete the offending message(s)
    Delete,
    Warn,
    /// Discord's native communication timeout
    Timeout,
    None,
}

impl PunishmentAction {
    /// Only `AddRole` needs a role id to be meaningful.
    pub fn requires_role(&self) -> bool {
        matches!(self, PunishmentAction::AddRole)
    }

    /// `false` for actions that leave the member alone (`Delete`, `None`).
    pub fn punishes_member(&self) -> bool {
        !matches!(self, PunishmentAction::Delete | PunishmentAction::None)
    }

    /// Actions where a punish duration changes the outcome.
    pub fn uses_duration(&self) -> bool {
        matches!(
            self,
            PunishmentAction::Mute
                | PunishmentAction::ChatMute
                | PunishmentAction::VoiceMute
                | PunishmentAction::AddRole
                | PunishmentAction::Timeout
                | PunishmentAction::Ban
        )
    }
}

impl std::fmt::Display for PunishmentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PunishmentAction::Mute => write!(f, "Mute"),
            PunishmentAction::Kick => write!(f, "Kick"),
            PunishmentAction::Ban => write!(f, "Ban"),
            PunishmentAction::Softban => write!(f, "Softban"),
            PunishmentAction::RemoveRoles => write!(f, "Remove Roles"),
            PunishmentAction::ChatMute => write!(f, "Chat Mute"),
            PunishmentAction::VoiceMute => write!(f, "Voice Mute"),
            PunishmentAction::AddRole => write!(f, "Add Role"),
            PunishmentAction::Delete => write!(f, "Delete"),
            PunishmentAction::Warn => write!(f, "Warn"),
            PunishmentAction::Timeout => write!(f, "Timeout"),
            PunishmentAction::None => write!(f, "None"),
        }
    }
}

/// Which detector produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionType {
    Raid,
    Spam,
    Alt,
    MassMention,
    Pattern,
    MassPost,
    PostChannel,
}

impl std::fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionType::Raid => write!(f, "Anti-Raid"),
            ProtectionType::Spam => write!(f, "Anti-Spam"),
            ProtectionType::Alt => write!(f, "Anti-Alt"),
            ProtectionType::MassMention => write!(f, "Anti-Mass-Mention"),
            ProtectionType::Pattern => write!(f, "Anti-Pattern"),
            ProtectionType::MassPost => write!(f, "Anti-Mass-Post"),
            ProtectionType::PostChannel => write!(f, "Anti-Post-Channel"),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================
// One struct per protection type. A guild stores at most one of each.

/// Mass-join detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiRaidSetting {
    pub enabled: bool,
    /// Joins needed inside the window to call it a raid
    pub user_threshold: u32,
    /// Window length in seconds
    pub seconds: u64,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
}

impl Default for AntiRaidSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            user_threshold: 5,
            seconds: 10,
            action: PunishmentAction::Mute,
            punish_duration_minutes: 0,
            role_id: None,
        }
    }
}

/// Repeated identical messages from one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiSpamSetting {
    pub enabled: bool,
    /// How many identical messages in a row trigger the action
    pub message_threshold: u32,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default)]
    pub ignored_channels: Vec<u64>,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
}

impl Default for AntiSpamSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            message_threshold: 3,
            action: PunishmentAction::Mute,
            punish_duration_minutes: 0,
            role_id: None,
            ignored_channels: Vec::new(),
            ignore_bots: true,
        }
    }
}

/// Accounts too young to be trusted on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiAltSetting {
    pub enabled: bool,
    pub min_age_minutes: u64,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
}

/// Mention spam, both per message and over a sliding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiMassMentionSetting {
    pub enabled: bool,
    /// Mentions in a single message that trigger immediately
    pub mention_threshold: u32,
    /// Mentions summed over the window that trigger
    pub max_mentions_in_window: u32,
    pub time_window_seconds: u64,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
}

impl Default for AntiMassMentionSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            mention_threshold: 5,
            max_mentions_in_window: 10,
            time_window_seconds: 30,
            action: PunishmentAction::Timeout,
            punish_duration_minutes: 10,
            role_id: None,
            ignore_bots: true,
        }
    }
}

/// Username patterns plus account heuristics, checked on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPatternSetting {
    pub enabled: bool,
    /// Regular expressions matched against the joining username
    pub patterns: Vec<String>,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default)]
    pub check_account_age: bool,
    #[serde(default)]
    pub max_account_age_months: u32,
    #[serde(default)]
    pub check_join_timing: bool,
    #[serde(default)]
    pub max_join_hours: u32,
    #[serde(default)]
    pub check_new_accounts: bool,
    #[serde(default)]
    pub new_account_days: u32,
    /// Score a matching user must reach before the action is taken
    #[serde(default)]
    pub minimum_score: u32,
}

/// Same content posted across several channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiMassPostSetting {
    pub enabled: bool,
    /// Distinct channels a similar message must reach
    pub channel_threshold: u32,
    pub time_window_seconds: u64,
    /// 0.0..=1.0, ignored when `require_identical_content` is set
    pub content_similarity_threshold: f64,
    #[serde(default)]
    pub min_content_length: usize,
    #[serde(default)]
    pub check_links_only: bool,
    #[serde(default)]
    pub require_identical_content: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub delete_messages: bool,
    pub max_messages_tracked: usize,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
}

impl Default for AntiMassPostSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_threshold: 3,
            time_window_seconds: 60,
            content_similarity_threshold: 0.8,
            min_content_length: 10,
            check_links_only: false,
            require_identical_content: false,
            case_sensitive: false,
            delete_messages: true,
            max_messages_tracked: 50,
            action: PunishmentAction::Timeout,
            punish_duration_minutes: 60,
            role_id: None,
            ignore_bots: true,
        }
    }
}

/// Honeypot channels: anyone posting in them is treated as a bot/raider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPostChannelSetting {
    pub enabled: bool,
    pub channels: Vec<u64>,
    pub action: PunishmentAction,
    #[serde(default)]
    pub punish_duration_minutes: u32,
    #[serde(default)]
    pub role_id: Option<u64>,
    #[serde(default = "default_true")]
    pub delete_messages: bool,
    #[serde(default = "default_true")]
    pub ignore_bots: bool,
}

fn default_true() -> bool {
    true
}

/// Snapshot of every protection configured for one guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildProtectionConfig {
    pub guild_id: u64,
    #[serde(default)]
    pub raid: Option<AntiRaidSetting>,
    #[serde(default)]
    pub spam: Option<AntiSpamSetting>,
    #[serde(default)]
    pub alt: Option<AntiAltSetting>,
    #[serde(default)]
    pub mass_mention: Option<AntiMassMentionSetting>,
    #[serde(default)]
    pub pattern: Option<AntiPatternSetting>,
    #[serde(default)]
    pub mass_post: Option<AntiMassPostSetting>,
    #[serde(default)]
    pub post_channel: Option<AntiPostChannelSetting>,
}

impl GuildProtectionConfig {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Flip the enabled flag of one protection.
    /// Returns `false` when that protection was never configured.
    pub fn set_enabled(&mut self, protection: ProtectionType, enabled: bool) -> bool {
        let flag = match protection {
            ProtectionType::Raid => self.raid.as_mut().map(|s| &mut s.enabled),
            ProtectionType::Spam => self.spam.as_mut().map(|s| &mut s.enabled),
            ProtectionType::Alt => self.alt.as_mut().map(|s| &mut s.enabled),
            ProtectionType::MassMention => self.mass_mention.as_mut().map(|s| &mut s.enabled),
            ProtectionType::Pattern => self.pattern.as_mut().map(|s| &mut s.enabled),
            ProtectionType::MassPost => self.mass_post.as_mut().map(|s| &mut s.enabled),
            ProtectionType::PostChannel => self.post_channel.as_mut().map(|s| &mut s.enabled),
        };

        match flag {
            Some(flag) => {
                *flag = enabled;
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// EVENTS (INBOUND)
// ============================================================================

/// A guild message, stripped down to what the detectors need.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub content: String,
    /// Users + roles mentioned (+ everyone/here)
    pub mention_count: u32,
    pub is_bot: bool,
    pub timestamp: DateTime<Utc>,
}

/// A member joining a guild.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub username: String,
    pub account_created_at: DateTime<Utc>,
    pub is_bot: bool,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// VERDICTS (OUTBOUND)
// ============================================================================

/// A message that should be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Everything the punishment executor needs to act on one user.
#[derive(Debug, Clone, PartialEq)]
pub struct PunishmentRequest {
    pub guild_id: u64,
    pub user_id: u64,
    pub action: PunishmentAction,
    pub duration_minutes: u32,
    pub role_id: Option<u64>,
    pub reason: String,
}

/// What a detector decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub protection: ProtectionType,
    pub punishments: Vec<PunishmentRequest>,
    pub delete: Vec<MessageRef>,
}

/// Result of running one event through a guild's protections.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    NotDetected,
    Detected(Verdict),
}

impl Detection {
    pub fn is_detected(&self) -> bool {
        matches!(self, Detection::Detected(_))
    }
}
