use crate::config::LoggingConfig;
use crate::surfaces::bridge::BridgeData;
use crate::{BRIDGE_TARGET, CONSOLE_TARGET, DEGRADED_TARGET, ERROR_TARGET, Error};
use poise::{Context, FrameworkError};
use std::fmt::Display;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the logging system with console and file outputs
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), Error> {
    let dir = Path::new(&config.directory);
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let action_file = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Engine, gate and audit events as JSON lines
    let action_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(action_file);

    // Default to INFO, keep serenity's gateway chatter out
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(action_layer)
        .try_init()?;

    info!(directory = %config.directory, "Logging system initialized");
    Ok(())
}

/// A gate let an event through because the store could not answer
pub fn log_degraded(gate: &str, subject: &str, error: &impl Display) {
    warn!(
        target: DEGRADED_TARGET,
        gate = %gate,
        subject = %subject,
        error = %error,
        event = "fail_open",
        "Enforcement degraded, allowing"
    );
}

// Store command start time for the post-command hook
thread_local! {
    static COMMAND_START_TIME: std::cell::RefCell<Option<Instant>> = const { std::cell::RefCell::new(None) };
}

fn guild_label(ctx: Context<'_, BridgeData, Error>) -> String {
    ctx.guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

/// Log the start of a bridge command (pre-command hook)
pub fn log_command_start(ctx: Context<'_, BridgeData, Error>) {
    COMMAND_START_TIME.with(|cell| {
        *cell.borrow_mut() = Some(Instant::now());
    });

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        format!("{:?}", ctx.invocation_string())
    };

    info!(
        target: BRIDGE_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id.get(),
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a bridge command (post-command hook)
pub fn log_command_end(ctx: Context<'_, BridgeData, Error>) {
    let duration =
        COMMAND_START_TIME.with(|cell| cell.borrow_mut().take().map(|start| start.elapsed()));
    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();

    info!(
        target: BRIDGE_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx),
        user_id = %ctx.author().id.get(),
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors raised while running a bridge command
pub fn log_command_error(error: &FrameworkError<'_, BridgeData, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id.get(),
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(*ctx),
                user_id = %ctx.author().id.get(),
                error = %error_msg,
                "Command check failed"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = %err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
