// Discord-specific protection handling - translates gateway events into core
// events and hands any verdict to the punisher.

use super::punisher::SerenityPunisher;
use crate::core::protection::{Detection, JoinEvent, MessageEvent, Verdict};
use crate::discord::{Data, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Users + roles mentioned, with @everyone/@here counted once.
pub fn count_mentions(users: usize, roles: usize, everyone: bool) -> u32 {
    (users + roles + usize::from(everyone)).min(u32::MAX as usize) as u32
}

/// Check a message against the guild's protections and punish if needed.
///
/// Returns `true` if a protection fired.
pub async fn handle_message(
    ctx: &serenity::Context,
    data: &Data,
    msg: &serenity::Message,
) -> Result<bool, Error> {
    // Only check guild messages
    let guild_id = match msg.guild_id {
        Some(id) => id.get(),
        None => return Ok(false),
    };

    // Never react to ourselves
    if msg.author.id == ctx.cache.current_user().id {
        return Ok(false);
    }

    let event = MessageEvent {
        guild_id,
        user_id: msg.author.id.get(),
        channel_id: msg.channel_id.get(),
        message_id: msg.id.get(),
        content: msg.content.clone(),
        mention_count: count_mentions(
            msg.mentions.len(),
            msg.mention_roles.len(),
            msg.mention_everyone,
        ),
        is_bot: msg.author.bot,
        timestamp: *msg.timestamp,
    };

    match data.protection.handle_message(&event).await? {
        Detection::NotDetected => Ok(false),
        Detection::Detected(verdict) => {
            enforce(ctx, data, &verdict).await;
            Ok(true)
        }
    }
}

/// Check a new member against the guild's join protections.
pub async fn handle_member_join(
    ctx: &serenity::Context,
    data: &Data,
    member: &serenity::Member,
) -> Result<bool, Error> {
    let event = JoinEvent {
        guild_id: member.guild_id.get(),
        user_id: member.user.id.get(),
        username: member.user.name.clone(),
        account_created_at: *member.user.created_at(),
        is_bot: member.user.bot,
        timestamp: member.joined_at.map(|t| *t).unwrap_or_else(Utc::now),
    };

    match data.protection.handle_join(&event).await? {
        Detection::NotDetected => Ok(false),
        Detection::Detected(verdict) => {
            enforce(ctx, data, &verdict).await;
            Ok(true)
        }
    }
}

/// Drop a guild's trackers once the bot is removed from it.
pub fn handle_guild_removed(data: &Data, guild: &serenity::UnavailableGuild) {
    // `unavailable` means an outage, not a removal.
    if !guild.unavailable {
        data.protection.forget_guild(guild.id.get());
        tracing::info!(guild_id = guild.id.get(), "Dropped protection state for guild");
    }
}

async fn enforce(ctx: &serenity::Context, data: &Data, verdict: &Verdict) {
    let punisher = SerenityPunisher::new(ctx.http.clone());
    let report = data.protection.enforce(verdict, &punisher).await;

    if !report.is_clean() {
        tracing::warn!(
            protection = %verdict.protection,
            punished = report.punished,
            deleted = report.deleted,
            failed = report.failures.len(),
            "Protection enforcement was incomplete"
        );
    }
}
