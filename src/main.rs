// This is the entry point of the guild protection bot.
//
// **Architecture Overview:**
// - `core/` = Detection logic (platform-agnostic)
// - `infra/` = Implementations of core traits (settings stores)
// - `discord/` = Discord-specific adapters (event translation, punishments)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Route gateway events to the protection handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::BotConfig;
use crate::core::protection::ProtectionService;
use crate::discord::protection::events as protection_events;
use crate::discord::{Data, Error};
use crate::infra::protection::JsonProtectionStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = protection_events::handle_message(ctx, data, new_message).await {
                tracing::error!(
                    message_id = new_message.id.get(),
                    "Error running message protections: {}",
                    e
                );
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = protection_events::handle_member_join(ctx, data, new_member).await {
                tracing::error!(
                    guild_id = new_member.guild_id.get(),
                    user_id = new_member.user.id.get(),
                    "Error running join protections: {}",
                    e
                );
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            protection_events::handle_guild_removed(data, incomplete);
        }

        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    let config = BotConfig::from_env()?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = JsonProtectionStore::new(&config.protection_config_path)
        .context("Failed to open protection settings")?;
    let protection_service = Arc::new(ProtectionService::with_max_tracked_mentions(
        store,
        config.max_tracked_mentions,
    ));

    let loaded = protection_service
        .load_all()
        .await
        .context("Failed to load protection settings")?;
    tracing::info!(
        guilds = loaded,
        path = %config.protection_config_path.display(),
        "Protection settings loaded"
    );

    let data = Data {
        protection: Arc::clone(&protection_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to compare message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS; // Required for join events

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|_ctx, ready, _framework| {
            Box::pin(async move {
                tracing::info!(user = %ready.user.name, "Protection bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
