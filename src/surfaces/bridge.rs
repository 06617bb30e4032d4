//! Discord bridge
//!
//! Slash commands mirroring the in-game action set, plus a notifier that posts
//! every issued or lifted punishment to a log channel.

use crate::clock;
use crate::config::BridgeConfig;
use crate::punishment::{
    ConflictClass, NotifyError, Notifier, Operator, PunishmentEngine, PunishmentEvent,
    PunishmentKind, PunishmentRequest, Source,
};
use crate::surfaces::commands::{describe_error, describe_issued, describe_reversal};
use crate::{BRIDGE_TARGET, Context, Error, logging};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::CreateReply;
use poise::serenity_prelude::{
    self as serenity, ChannelId, Colour, CreateEmbed, CreateMessage, EventHandler, GatewayIntents,
    GuildId, Http, Ready,
};
use std::sync::Arc;
use tracing::{info, warn};

/// State shared with every bridge command
pub struct BridgeData {
    pub engine: PunishmentEngine,
    pub settings: BridgeConfig,
}

impl BridgeData {
    #[must_use]
    pub fn new(engine: PunishmentEngine, settings: BridgeConfig) -> Self {
        Self { engine, settings }
    }

    /// Duration text used when a timed command omits one
    #[must_use]
    pub fn default_duration(&self, kind: PunishmentKind) -> &str {
        match kind.conflict_class() {
            Some(ConflictClass::Mute) => &self.settings.default_tempmute,
            _ => &self.settings.default_tempban,
        }
    }
}

async fn operator_name(ctx: Context<'_>) -> String {
    match ctx.author_member().await {
        Some(member) => member.display_name().to_string(),
        None => ctx.author().display_name().to_string(),
    }
}

async fn reply(ctx: Context<'_>, text: String) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(text).ephemeral(true))
        .await?;
    Ok(())
}

async fn issue(
    ctx: Context<'_>,
    kind: PunishmentKind,
    player: String,
    reason: Option<String>,
    duration: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let data = ctx.data();
    let messages = data.engine.messages();

    let duration_seconds = if kind.is_time_boxed() {
        let text = duration.unwrap_or_else(|| data.default_duration(kind).to_string());
        match clock::parse(&text) {
            Ok(seconds) => Some(seconds),
            Err(_) => return reply(ctx, messages.get("errors.invalid_time", &[])).await,
        }
    } else {
        None
    };

    let operator = Operator::new(operator_name(ctx).await, Source::Discord);
    let mut request = PunishmentRequest::new(kind, player.as_str(), operator);
    request.reason = reason;
    request.duration_seconds = duration_seconds;

    let text = match data.engine.issue(request.clone()).await {
        Ok(_) => describe_issued(messages, &request),
        Err(e) => describe_error(messages, &player, &e),
    };
    reply(ctx, text).await
}

async fn lift(ctx: Context<'_>, class: ConflictClass, player: String) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let engine = &ctx.data().engine;
    let operator = Operator::new(operator_name(ctx).await, Source::Discord);
    let text = match engine.reverse_class(&player, class, operator).await {
        Ok(outcome) => describe_reversal(engine.messages(), &player, class, outcome),
        Err(e) => describe_error(engine.messages(), &player, &e),
    };
    reply(ctx, text).await
}

/// Permanently ban a player
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Ban, player, reason, None).await
}

/// Ban a player for a while
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn tempban(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
    #[description = "Duration such as 30m or 2d"] duration: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Tempban, player, reason, duration).await
}

/// Ban a player and their address
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn ipban(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Ipban, player, reason, None).await
}

/// Ban a player and their address for a while
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn tempipban(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
    #[description = "Duration such as 30m or 2d"] duration: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Tempipban, player, reason, duration).await
}

/// Lift every ban on a player
#[poise::command(slash_command, guild_only, default_member_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
) -> Result<(), Error> {
    lift(ctx, ConflictClass::Ban, player).await
}

/// Kick an online player
#[poise::command(slash_command, guild_only, default_member_permissions = "KICK_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Kick, player, reason, None).await
}

/// Mute an online player
#[poise::command(slash_command, guild_only, default_member_permissions = "MODERATE_MEMBERS")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Mute, player, reason, None).await
}

/// Mute an online player for a while
#[poise::command(slash_command, guild_only, default_member_permissions = "MODERATE_MEMBERS")]
pub async fn tempmute(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
    #[description = "Duration such as 30m or 2d"] duration: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Tempmute, player, reason, duration).await
}

/// Lift every mute on a player
#[poise::command(slash_command, guild_only, default_member_permissions = "MODERATE_MEMBERS")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
) -> Result<(), Error> {
    lift(ctx, ConflictClass::Mute, player).await
}

/// Warn an online player
#[poise::command(slash_command, guild_only, default_member_permissions = "MODERATE_MEMBERS")]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Player name"] player: String,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    issue(ctx, PunishmentKind::Warn, player, reason, None).await
}

/// Every bridge command, for framework registration
#[must_use]
pub fn commands() -> Vec<poise::Command<BridgeData, Error>> {
    vec![
        ban(),
        tempban(),
        ipban(),
        tempipban(),
        unban(),
        kick(),
        mute(),
        tempmute(),
        unmute(),
        warn(),
    ]
}

/// Gateway lifecycle logging
pub struct BridgeEvents;

#[serenity::async_trait]
impl EventHandler for BridgeEvents {
    async fn ready(&self, ctx: serenity::Context, ready: Ready) {
        info!(
            target: BRIDGE_TARGET,
            user = %ready.user.name,
            shard = ctx.shard_id.0,
            "Bridge connected"
        );
    }

    async fn cache_ready(&self, ctx: serenity::Context, guilds: Vec<GuildId>) {
        let cached = ctx.cache.guild_count();
        if cached != guilds.len() {
            warn!(
                target: BRIDGE_TARGET,
                cached,
                actual = guilds.len(),
                "Cache guild count mismatch"
            );
        }
        info!(target: BRIDGE_TARGET, guilds = guilds.len(), "Bridge cache ready");
    }
}

/// Build the serenity client with the poise framework attached
///
/// # Errors
///
/// Returns the serenity error if the client cannot be created.
pub async fn client(token: &str, data: BridgeData) -> Result<serenity::Client, Error> {
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering bridge commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged();
    let client = serenity::ClientBuilder::new(token, intents)
        .event_handler(BridgeEvents)
        .framework(framework)
        .await?;
    Ok(client)
}

/// Posts a summary of every punishment event to a channel
pub struct DiscordLogNotifier {
    http: Arc<Http>,
    channel: ChannelId,
}

impl DiscordLogNotifier {
    #[must_use]
    pub fn new(http: Arc<Http>, channel_id: u64) -> Self {
        Self {
            http,
            channel: ChannelId::new(channel_id),
        }
    }
}

/// Title and fields of the log entry for an event
#[must_use]
pub fn log_summary(event: &PunishmentEvent, at: DateTime<Utc>) -> (String, Vec<(String, String)>) {
    let when = format!("<t:{}:R>", at.timestamp());
    match event {
        PunishmentEvent::Issued {
            punishment,
            operator,
        } => {
            let mut fields = vec![
                ("Player".to_string(), punishment.subject.clone()),
                ("Operator".to_string(), format!("{} ({})", operator.name, operator.source)),
                ("Reason".to_string(), punishment.reason.clone()),
            ];
            if let Some(seconds) = punishment.duration_seconds {
                fields.push(("Duration".to_string(), clock::format(seconds)));
            }
            fields.push(("When".to_string(), when));
            (punishment.kind.traits().audit_label.to_string(), fields)
        }
        PunishmentEvent::Reversed {
            subject,
            action,
            operator,
            lifted,
            ..
        } => (
            action.clone(),
            vec![
                ("Player".to_string(), subject.clone()),
                ("Operator".to_string(), format!("{} ({})", operator.name, operator.source)),
                ("Records lifted".to_string(), lifted.to_string()),
                ("When".to_string(), when),
            ],
        ),
    }
}

#[async_trait]
impl Notifier for DiscordLogNotifier {
    fn name(&self) -> &'static str {
        "discord-log"
    }

    async fn notify(&self, event: &PunishmentEvent) -> Result<(), NotifyError> {
        let (title, fields) = log_summary(event, Utc::now());
        let colour = match event {
            PunishmentEvent::Issued { .. } => Colour::RED,
            PunishmentEvent::Reversed { .. } => Colour::DARK_GREEN,
        };
        let embed = CreateEmbed::new()
            .title(title)
            .colour(colour)
            .fields(fields.into_iter().map(|(name, value)| (name, value, true)))
            .timestamp(serenity::Timestamp::now());
        self.channel
            .send_message(&*self.http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}
