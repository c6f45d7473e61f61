// Discord-specific punishment execution - turns core `PunishmentRequest`s into API calls.

use crate::core::protection::{
    MessageRef, PunishError, PunishmentAction, PunishmentExecutor, PunishmentRequest,
};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Discord caps communication timeouts at 28 days.
const MAX_TIMEOUT_MINUTES: u32 = 28 * 24 * 60;
/// Used when a timeout-style action has no duration configured.
const DEFAULT_TIMEOUT_MINUTES: u32 = 60;
/// Days of messages purged by a softban.
const SOFTBAN_PURGE_DAYS: u8 = 1;

/// How long a timeout should last for the given request.
pub fn timeout_minutes(duration_minutes: u32) -> u32 {
    if duration_minutes == 0 {
        DEFAULT_TIMEOUT_MINUTES
    } else {
        duration_minutes.min(MAX_TIMEOUT_MINUTES)
    }
}

fn discord_err(e: serenity::Error) -> PunishError {
    PunishError::Discord(e.to_string())
}

pub struct SerenityPunisher {
    http: Arc<serenity::Http>,
}

impl SerenityPunisher {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }

    async fn timeout(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
        minutes: u32,
    ) -> Result<(), PunishError> {
        let until = serenity::Timestamp::from_unix_timestamp(
            chrono::Utc::now().timestamp() + timeout_minutes(minutes) as i64 * 60,
        )
        .map_err(|e| PunishError::Discord(e.to_string()))?;

        guild
            .edit_member(
                &self.http,
                user,
                serenity::EditMember::new().disable_communication_until_datetime(until),
            )
            .await
            .map_err(discord_err)?;
        Ok(())
    }

    /// Add a role, and take it away again after `minutes` if non-zero.
    async fn add_role(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
        role: serenity::RoleId,
        minutes: u32,
        reason: &str,
    ) -> Result<(), PunishError> {
        self.http
            .add_member_role(guild, user, role, Some(reason))
            .await
            .map_err(discord_err)?;

        if minutes > 0 {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(minutes as u64 * 60)).await;
                if let Err(e) = http
                    .remove_member_role(guild, user, role, Some("Protection punishment expired"))
                    .await
                {
                    tracing::warn!(
                        guild_id = guild.get(),
                        user_id = user.get(),
                        "Failed to remove expired punishment role: {}",
                        e
                    );
                }
            });
        }
        Ok(())
    }

    async fn voice_mute(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
        minutes: u32,
    ) -> Result<(), PunishError> {
        guild
            .edit_member(&self.http, user, serenity::EditMember::new().mute(true))
            .await
            .map_err(discord_err)?;

        if minutes > 0 {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(minutes as u64 * 60)).await;
                if let Err(e) = guild
                    .edit_member(&http, user, serenity::EditMember::new().mute(false))
                    .await
                {
                    tracing::warn!(
                        guild_id = guild.get(),
                        user_id = user.get(),
                        "Failed to lift voice mute: {}",
                        e
                    );
                }
            });
        }
        Ok(())
    }

    async fn ban(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
        minutes: u32,
        reason: &str,
    ) -> Result<(), PunishError> {
        guild
            .ban_with_reason(&self.http, user, 0, reason)
            .await
            .map_err(discord_err)?;

        // Temporary ban
        if minutes > 0 {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(minutes as u64 * 60)).await;
                if let Err(e) = guild.unban(&http, user).await {
                    tracing::warn!(
                        guild_id = guild.get(),
                        user_id = user.get(),
                        "Failed to lift temporary ban: {}",
                        e
                    );
                }
            });
        }
        Ok(())
    }

    async fn remove_roles(
        &self,
        guild: serenity::GuildId,
        user: serenity::UserId,
        reason: &str,
    ) -> Result<(), PunishError> {
        let member = guild.member(&self.http, user).await.map_err(discord_err)?;
        for role in &member.roles {
            self.http
                .remove_member_role(guild, user, *role, Some(reason))
                .await
                .map_err(discord_err)?;
        }
        Ok(())
    }

    async fn warn(&self, user: serenity::UserId, reason: &str) -> Result<(), PunishError> {
        let dm = user.create_dm_channel(&self.http).await.map_err(discord_err)?;
        dm.say(&self.http, format!("⚠️ **Warning:** {}", reason))
            .await
            .map_err(discord_err)?;
        Ok(())
    }
}

/// The Discord calls one punishment boils down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscordAction {
    Nothing,
    Warn,
    Kick,
    /// `minutes == 0` is permanent
    Ban { minutes: u32 },
    Softban,
    Timeout { minutes: u32 },
    /// `minutes == 0` keeps the role
    AddRole { role: u64, minutes: u32 },
    VoiceMute { minutes: u32 },
    RemoveRoles,
}

/// Decide which Discord calls a request needs, without touching the API.
fn plan(request: &PunishmentRequest) -> Result<DiscordAction, PunishError> {
    let minutes = if request.action.uses_duration() {
        request.duration_minutes
    } else {
        0
    };
    // Discord ids are never 0 and serenity panics on them.
    let role = request.role_id.filter(|id| *id != 0);

    Ok(match request.action {
        PunishmentAction::None | PunishmentAction::Delete => DiscordAction::Nothing,
        PunishmentAction::Warn => DiscordAction::Warn,
        PunishmentAction::Kick => DiscordAction::Kick,
        PunishmentAction::Ban => DiscordAction::Ban { minutes },
        PunishmentAction::Softban => DiscordAction::Softban,
        PunishmentAction::Timeout | PunishmentAction::ChatMute => DiscordAction::Timeout { minutes },
        // A mute role when one is configured, Discord's timeout otherwise.
        PunishmentAction::Mute => match role {
            Some(role) => DiscordAction::AddRole { role, minutes },
            None => DiscordAction::Timeout { minutes },
        },
        PunishmentAction::VoiceMute => DiscordAction::VoiceMute { minutes },
        PunishmentAction::AddRole => DiscordAction::AddRole {
            role: role.ok_or(PunishError::MissingRole(PunishmentAction::AddRole))?,
            minutes,
        },
        PunishmentAction::RemoveRoles => DiscordAction::RemoveRoles,
    })
}

#[async_trait]
impl PunishmentExecutor for SerenityPunisher {
    async fn apply(&self, request: &PunishmentRequest) -> Result<(), PunishError> {
        let guild = serenity::GuildId::new(request.guild_id);
        let user = serenity::UserId::new(request.user_id);
        let reason = request.reason.as_str();
        let action = plan(request)?;

        tracing::info!(
            guild_id = request.guild_id,
            user_id = request.user_id,
            action = %request.action,
            plan = ?action,
            "Applying protection punishment"
        );

        match action {
            DiscordAction::Nothing => Ok(()),
            DiscordAction::Warn => self.warn(user, reason).await,
            DiscordAction::Kick => guild
                .kick_with_reason(&self.http, user, reason)
                .await
                .map_err(discord_err),
            DiscordAction::Ban { minutes } => self.ban(guild, user, minutes, reason).await,
            DiscordAction::Softban => {
                guild
                    .ban_with_reason(&self.http, user, SOFTBAN_PURGE_DAYS, reason)
                    .await
                    .map_err(discord_err)?;
                guild.unban(&self.http, user).await.map_err(discord_err)
            }
            DiscordAction::Timeout { minutes } => self.timeout(guild, user, minutes).await,
            DiscordAction::AddRole { role, minutes } => {
                self.add_role(guild, user, serenity::RoleId::new(role), minutes, reason)
                    .await
            }
            DiscordAction::VoiceMute { minutes } => self.voice_mute(guild, user, minutes).await,
            DiscordAction::RemoveRoles => self.remove_roles(guild, user, reason).await,
        }
    }

    async fn delete_message(&self, _guild_id: u64, message: MessageRef) -> Result<(), PunishError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(discord_err)
    }
}
