// Per-guild protection trackers.
//
// Every tracker is built from a settings value it owns, so a tracker without
// settings cannot exist. Constructors validate the settings and refuse to
// build a tracker that could never fire or would crash the dispatcher later.

use super::protection_models::{
    AntiAltSetting, AntiMassMentionSetting, AntiMassPostSetting, AntiPatternSetting,
    AntiPostChannelSetting, AntiRaidSetting, AntiSpamSetting, JoinEvent, MessageEvent,
    MessageRef, PunishmentAction, ProtectionType,
};
use super::protection_service::ProtectionError;
use super::window_stats::{
    MassPostCheck, PostedMessage, UserMassPostStats, UserMentionStats, UserSpamStats,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(https?://|www\.|discord\.gg/)\S+").expect("link regex is valid")
});

fn check_punishment(
    protection: ProtectionType,
    action: PunishmentAction,
    role_id: Option<u64>,
) -> Result<(), ProtectionError> {
    if action.requires_role() && role_id.is_none() {
        return Err(ProtectionError::InvalidSetting {
            protection,
            reason: format!("{} needs a role id", action),
        });
    }
    if role_id == Some(0) {
        return Err(ProtectionError::InvalidSetting {
            protection,
            reason: "role_id cannot be 0".to_string(),
        });
    }
    Ok(())
}

fn require_snowflakes(
    protection: ProtectionType,
    name: &str,
    ids: &[u64],
) -> Result<(), ProtectionError> {
    if ids.contains(&0) {
        return Err(ProtectionError::InvalidSetting {
            protection,
            reason: format!("{} cannot contain 0", name),
        });
    }
    Ok(())
}

fn require_positive(
    protection: ProtectionType,
    name: &str,
    value: u64,
) -> Result<(), ProtectionError> {
    if value == 0 {
        return Err(ProtectionError::InvalidSetting {
            protection,
            reason: format!("{} must be greater than zero", name),
        });
    }
    Ok(())
}

/// A positive length that fits in a `Duration` after unit conversion.
fn require_duration(
    protection: ProtectionType,
    name: &str,
    value: u64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Result<Duration, ProtectionError> {
    require_positive(protection, name, value)?;
    i64::try_from(value)
        .ok()
        .and_then(to_duration)
        .ok_or_else(|| ProtectionError::InvalidSetting {
            protection,
            reason: format!("{} is out of range", name),
        })
}

// ============================================================================
// COUNTER
// ============================================================================

/// Lock-free hit counter. Wraps on overflow instead of panicking.
#[derive(Debug, Default)]
pub struct ProtectionCounter(AtomicI32);

impl ProtectionCounter {
    pub fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    /// Add one and return the new value.
    pub fn increment(&self) -> i32 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RAID
// ============================================================================

/// Join burst tracker for one detection epoch.
///
/// Once a raid fires, the registry swaps in a fresh instance instead of
/// resetting this one.
#[derive(Debug)]
pub struct AntiRaidStats {
    setting: AntiRaidSetting,
    window: Duration,
    counter: ProtectionCounter,
    raid_users: VecDeque<(u64, DateTime<Utc>)>,
}

impl AntiRaidStats {
    pub fn new(setting: AntiRaidSetting) -> Result<Self, ProtectionError> {
        require_positive(ProtectionType::Raid, "user_threshold", setting.user_threshold as u64)?;
        let window =
            require_duration(ProtectionType::Raid, "seconds", setting.seconds, Duration::try_seconds)?;
        check_punishment(ProtectionType::Raid, setting.action, setting.role_id)?;

        Ok(Self {
            setting,
            window,
            counter: ProtectionCounter::new(),
            raid_users: VecDeque::new(),
        })
    }

    /// Record a join. Returns every user that joined inside the window once
    /// the threshold is reached.
    pub fn record_join(&mut self, user_id: u64, now: DateTime<Utc>) -> Option<Vec<u64>> {
        let window = self.window;
        while self
            .raid_users
            .front()
            .is_some_and(|(_, joined)| now - *joined > window)
        {
            self.raid_users.pop_front();
        }

        self.raid_users.push_back((user_id, now));
        self.counter.increment();

        if self.raid_users.len() >= self.setting.user_threshold as usize {
            Some(self.raid_users.iter().map(|(user, _)| *user).collect())
        } else {
            None
        }
    }

    /// An empty tracker for the same (already validated) settings.
    pub fn next_epoch(&self) -> Self {
        Self {
            setting: self.setting.clone(),
            window: self.window,
            counter: ProtectionCounter::new(),
            raid_users: VecDeque::new(),
        }
    }

    pub fn setting(&self) -> &AntiRaidSetting {
        &self.setting
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    /// Joins seen in this epoch.
    pub fn counter(&self) -> i32 {
        self.counter.get()
    }
}

// ============================================================================
// SPAM
// ============================================================================

pub struct AntiSpamStats {
    setting: AntiSpamSetting,
    ignored: HashSet<u64>,
    users: DashMap<u64, UserSpamStats>,
}

impl AntiSpamStats {
    pub fn new(setting: AntiSpamSetting) -> Result<Self, ProtectionError> {
        require_positive(
            ProtectionType::Spam,
            "message_threshold",
            setting.message_threshold as u64,
        )?;
        check_punishment(ProtectionType::Spam, setting.action, setting.role_id)?;
        require_snowflakes(
            ProtectionType::Spam,
            "ignored_channels",
            &setting.ignored_channels,
        )?;

        Ok(Self {
            ignored: setting.ignored_channels.iter().copied().collect(),
            setting,
            users: DashMap::new(),
        })
    }

    /// Returns `true` when this message completes a spam streak. The user's
    /// streak is cleared so the punishment is only handed out once.
    pub fn check(&self, event: &MessageEvent) -> bool {
        if event.is_bot && self.setting.ignore_bots {
            return false;
        }
        if self.ignored.contains(&event.channel_id) {
            return false;
        }

        let count = {
            let mut entry = self
                .users
                .entry(event.user_id)
                .or_insert_with(|| UserSpamStats::new("", event.timestamp));
            entry.apply_next_message(&event.content, event.timestamp)
        };

        if count >= self.setting.message_threshold as usize {
            self.users.remove(&event.user_id);
            return true;
        }
        false
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

// ============================================================================
// ALT ACCOUNTS
// ============================================================================

pub struct AntiAltStats {
    setting: AntiAltSetting,
    min_age: Duration,
    counter: ProtectionCounter,
}

impl AntiAltStats {
    pub fn new(setting: AntiAltSetting) -> Result<Self, ProtectionError> {
        let min_age = require_duration(
            ProtectionType::Alt,
            "min_age_minutes",
            setting.min_age_minutes,
            Duration::try_minutes,
        )?;
        check_punishment(ProtectionType::Alt, setting.action, setting.role_id)?;

        Ok(Self {
            setting,
            min_age,
            counter: ProtectionCounter::new(),
        })
    }

    /// Returns `true` (and bumps the counter) for accounts younger than the minimum age.
    pub fn check(&self, event: &JoinEvent) -> bool {
        let age = event.timestamp - event.account_created_at;
        if age < self.min_age {
            self.counter.increment();
            return true;
        }
        false
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    pub fn counter(&self) -> i32 {
        self.counter.get()
    }
}

// ============================================================================
// MASS MENTION
// ============================================================================

pub struct AntiMassMentionStats {
    setting: AntiMassMentionSetting,
    window: Duration,
    max_tracked: usize,
    users: DashMap<u64, UserMentionStats>,
}

impl AntiMassMentionStats {
    pub fn new(setting: AntiMassMentionSetting, max_tracked: usize) -> Result<Self, ProtectionError> {
        let protection = ProtectionType::MassMention;
        require_positive(protection, "mention_threshold", setting.mention_threshold as u64)?;
        require_positive(
            protection,
            "max_mentions_in_window",
            setting.max_mentions_in_window as u64,
        )?;
        let window = require_duration(
            protection,
            "time_window_seconds",
            setting.time_window_seconds,
            Duration::try_seconds,
        )?;
        check_punishment(protection, setting.action, setting.role_id)?;

        Ok(Self {
            window,
            // Never keep fewer stamps than the window threshold needs.
            max_tracked: max_tracked.max(setting.max_mentions_in_window as usize),
            setting,
            users: DashMap::new(),
        })
    }

    /// A single message over `mention_threshold` fires immediately; otherwise
    /// the mentions are added to the user's window.
    pub fn check(&self, event: &MessageEvent) -> bool {
        if event.is_bot && self.setting.ignore_bots {
            return false;
        }

        let detected = event.mention_count >= self.setting.mention_threshold || {
            let mut stats = self.users.entry(event.user_id).or_insert_with(|| {
                UserMentionStats::new(self.window, self.max_tracked)
            });
            stats.add_mentions(
                event.mention_count,
                self.setting.max_mentions_in_window,
                event.timestamp,
            )
        };

        if detected {
            self.users.remove(&event.user_id);
        }
        detected
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

// ============================================================================
// USERNAME PATTERNS
// ============================================================================

pub struct AntiPatternStats {
    setting: AntiPatternSetting,
    patterns: Vec<Regex>,
    counter: ProtectionCounter,
}

impl AntiPatternStats {
    pub fn new(setting: AntiPatternSetting) -> Result<Self, ProtectionError> {
        if setting.patterns.is_empty() {
            return Err(ProtectionError::InvalidSetting {
                protection: ProtectionType::Pattern,
                reason: "at least one pattern is required".to_string(),
            });
        }
        check_punishment(ProtectionType::Pattern, setting.action, setting.role_id)?;

        let patterns = setting
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProtectionError::InvalidSetting {
                protection: ProtectionType::Pattern,
                reason: e.to_string(),
            })?;

        Ok(Self {
            setting,
            patterns,
            counter: ProtectionCounter::new(),
        })
    }

    /// Score a joining user. Returns the score when the username matches a
    /// pattern and the score reaches `minimum_score`.
    ///
    /// A pattern match is worth 1; each enabled heuristic that also hits adds 1.
    pub fn check(&self, event: &JoinEvent) -> Option<u32> {
        if !self.patterns.iter().any(|p| p.is_match(&event.username)) {
            return None;
        }

        let age = event.timestamp - event.account_created_at;
        let mut score = 1;

        if self.setting.check_account_age
            && age.num_days() / 30 < self.setting.max_account_age_months as i64
        {
            score += 1;
        }
        if self.setting.check_join_timing && age.num_hours() < self.setting.max_join_hours as i64 {
            score += 1;
        }
        if self.setting.check_new_accounts && age.num_days() < self.setting.new_account_days as i64
        {
            score += 1;
        }

        if score < self.setting.minimum_score {
            return None;
        }

        self.counter.increment();
        Some(score)
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    pub fn counter(&self) -> i32 {
        self.counter.get()
    }
}

// ============================================================================
// MASS POST
// ============================================================================

pub struct AntiMassPostStats {
    setting: AntiMassPostSetting,
    window: Duration,
    users: DashMap<u64, UserMassPostStats>,
}

impl AntiMassPostStats {
    pub fn new(setting: AntiMassPostSetting) -> Result<Self, ProtectionError> {
        let protection = ProtectionType::MassPost;
        require_positive(protection, "channel_threshold", setting.channel_threshold as u64)?;
        let window = require_duration(
            protection,
            "time_window_seconds",
            setting.time_window_seconds,
            Duration::try_seconds,
        )?;
        require_positive(
            protection,
            "max_messages_tracked",
            setting.max_messages_tracked as u64,
        )?;
        if !(0.0..=1.0).contains(&setting.content_similarity_threshold) {
            return Err(ProtectionError::InvalidSetting {
                protection,
                reason: "content_similarity_threshold must be between 0 and 1".to_string(),
            });
        }
        check_punishment(protection, setting.action, setting.role_id)?;

        Ok(Self {
            setting,
            window,
            users: DashMap::new(),
        })
    }

    /// Feed a message to the poster's tracker. Returns the messages forming
    /// the burst when it spans enough channels; the user's history is then
    /// cleared so the same burst is not reported twice.
    pub fn check(&self, event: &MessageEvent) -> Option<Vec<MessageRef>> {
        if event.is_bot && self.setting.ignore_bots {
            return None;
        }
        if event.content.chars().count() < self.setting.min_content_length {
            return None;
        }
        if self.setting.check_links_only && !LINK_RE.is_match(&event.content) {
            return None;
        }

        let check = MassPostCheck {
            channel_threshold: self.setting.channel_threshold,
            similarity_threshold: self.setting.content_similarity_threshold,
            require_identical: self.setting.require_identical_content,
            case_sensitive: self.setting.case_sensitive,
        };
        let message = PostedMessage {
            message_id: event.message_id,
            channel_id: event.channel_id,
            content: event.content.clone(),
        };

        let hits = {
            let mut stats = self.users.entry(event.user_id).or_insert_with(|| {
                UserMassPostStats::new(self.window, self.setting.max_messages_tracked)
            });
            stats.add_message(message, check, event.timestamp)
        };

        if hits.is_some() {
            self.users.remove(&event.user_id);
        }
        hits
    }

    pub fn deletes_messages(&self) -> bool {
        self.setting.delete_messages
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }
}

// ============================================================================
// HONEYPOT CHANNELS
// ============================================================================

pub struct AntiPostChannelStats {
    setting: AntiPostChannelSetting,
    channels: HashSet<u64>,
    counter: ProtectionCounter,
}

impl AntiPostChannelStats {
    pub fn new(setting: AntiPostChannelSetting) -> Result<Self, ProtectionError> {
        if setting.channels.is_empty() {
            return Err(ProtectionError::InvalidSetting {
                protection: ProtectionType::PostChannel,
                reason: "at least one channel is required".to_string(),
            });
        }
        check_punishment(ProtectionType::PostChannel, setting.action, setting.role_id)?;
        require_snowflakes(ProtectionType::PostChannel, "channels", &setting.channels)?;

        Ok(Self {
            channels: setting.channels.iter().copied().collect(),
            setting,
            counter: ProtectionCounter::new(),
        })
    }

    pub fn check(&self, event: &MessageEvent) -> bool {
        if event.is_bot && self.setting.ignore_bots {
            return false;
        }
        if !self.channels.contains(&event.channel_id) {
            return false;
        }
        self.counter.increment();
        true
    }

    pub fn deletes_messages(&self) -> bool {
        self.setting.delete_messages
    }

    pub fn action(&self) -> PunishmentAction {
        self.setting.action
    }

    pub fn punish_duration(&self) -> u32 {
        self.setting.punish_duration_minutes
    }

    pub fn role_id(&self) -> Option<u64> {
        self.setting.role_id
    }

    pub fn counter(&self) -> i32 {
        self.counter.get()
    }
}
