//! In-game command surface
//!
//! Parses `/kick`, `/ban`, `/tempmute`... argument lists, checks the sender's
//! permission and hands the request to the engine. Every outcome comes back as
//! text for the sender.

use crate::clock;
use crate::messages::{self, Messages};
use crate::punishment::{
    ConflictClass, EngineError, Operator, Punishment, PunishmentEngine, PunishmentKind,
    PunishmentRequest, ReverseOutcome, Source,
};
use crate::ENGINE_TARGET;
use tracing::debug;

pub const WARNS_PERMISSION: &str = "solacecore.warns";
/// Warnings listed per `/warns` page
pub const WARNS_PAGE_SIZE: usize = 20;

/// Whoever typed the command
pub trait CommandSender: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> Source;

    fn has_permission(&self, node: &str) -> bool;
}

/// The console can do anything
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSender;

impl CommandSender for ConsoleSender {
    fn name(&self) -> &str {
        "Console"
    }

    fn source(&self) -> Source {
        Source::Console
    }

    fn has_permission(&self, _node: &str) -> bool {
        true
    }
}

/// Issuer-facing text for an engine refusal
#[must_use]
pub fn describe_error(messages: &Messages, subject: &str, error: &EngineError) -> String {
    let player = [("player", subject)];
    match error {
        EngineError::SubjectUnreachable { .. } => messages.get("errors.player_not_found", &[]),
        EngineError::Protected { kind, .. } => {
            let key = match (kind, kind.conflict_class()) {
                (PunishmentKind::Kick, _) => "punishment.kick_protection",
                (_, Some(ConflictClass::Ban)) => "punishment.ban_protection",
                (_, Some(ConflictClass::Mute)) => "punishment.mute_protection",
                _ => "punishment.warn_protection",
            };
            messages.get(key, &player)
        }
        EngineError::AlreadyPunished { class, .. } => match class {
            ConflictClass::Ban => messages.get("punishment.already_banned", &player),
            ConflictClass::Mute => messages.get("punishment.already_muted", &player),
        },
        EngineError::InvalidDuration { .. } | EngineError::Parse(_) => {
            messages.get("errors.invalid_time", &[])
        }
        EngineError::Storage(_) => messages.get("errors.storage", &[]),
        EngineError::Internal(_) => messages.get("errors.internal", &[]),
    }
}

/// Confirmation text for an issued punishment
#[must_use]
pub fn describe_issued(
    messages: &Messages,
    request: &PunishmentRequest,
) -> String {
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map_or_else(|| messages.no_reason(), ToString::to_string);
    let time = request.duration_seconds.map(clock::format).unwrap_or_default();
    messages.get(
        messages::broadcast_key(request.kind),
        &[
            ("player", request.subject.as_str()),
            ("operator", request.operator.name.as_str()),
            ("reason", reason.as_str()),
            ("time", time.as_str()),
        ],
    )
}

/// Confirmation text for a class reversal
#[must_use]
pub fn describe_reversal(
    messages: &Messages,
    subject: &str,
    class: ConflictClass,
    outcome: ReverseOutcome,
) -> String {
    let key = match (class, outcome) {
        (ConflictClass::Ban, ReverseOutcome::Reversed(_)) => "punishment.unban_success",
        (ConflictClass::Mute, ReverseOutcome::Reversed(_)) => "punishment.unmute_success",
        (ConflictClass::Ban, ReverseOutcome::NothingToReverse) => "punishment.not_banned",
        (ConflictClass::Mute, ReverseOutcome::NothingToReverse) => "punishment.not_muted",
    };
    messages.get(key, &[("player", subject)])
}

/// In-game command dispatcher
#[derive(Clone)]
pub struct CommandSurface {
    engine: PunishmentEngine,
}

impl CommandSurface {
    #[must_use]
    pub fn new(engine: PunishmentEngine) -> Self {
        Self { engine }
    }

    fn messages(&self) -> &Messages {
        self.engine.messages()
    }

    /// Run one command. Returns `None` for labels this surface does not own.
    pub async fn execute(
        &self,
        sender: &dyn CommandSender,
        label: &str,
        args: &[&str],
    ) -> Option<Vec<String>> {
        let label = label.trim_start_matches('/').to_ascii_lowercase();
        debug!(
            target: ENGINE_TARGET,
            sender = %sender.name(),
            command = %label,
            args = args.len(),
            "In-game command"
        );
        let reply = match label.as_str() {
            "warns" => self.warns(sender, args).await,
            "unban" => self.lift(sender, ConflictClass::Ban, args).await,
            "unmute" => self.lift(sender, ConflictClass::Mute, args).await,
            other => {
                let kind = other.parse::<PunishmentKind>().ok()?;
                vec![self.punish(sender, kind, args).await]
            }
        };
        Some(reply)
    }

    async fn punish(
        &self,
        sender: &dyn CommandSender,
        kind: PunishmentKind,
        args: &[&str],
    ) -> String {
        if !sender.has_permission(kind.traits().permission_node) {
            return self.messages().get("errors.no_permission", &[]);
        }
        let usage = format!("usage.{kind}");
        let Some((&subject, rest)) = args.split_first() else {
            return self.messages().get(&usage, &[]);
        };

        let (duration, rest) = if kind.is_time_boxed() {
            let Some((text, rest)) = rest.split_first() else {
                return self.messages().get(&usage, &[]);
            };
            match clock::parse(text) {
                Ok(seconds) => (Some(seconds), rest),
                Err(_) => return self.messages().get("errors.invalid_time", &[]),
            }
        } else {
            (None, rest)
        };

        let operator = Operator::new(sender.name(), sender.source());
        let mut request = PunishmentRequest::new(kind, subject, operator).reason(rest.join(" "));
        request.duration_seconds = duration;

        match self.engine.issue(request.clone()).await {
            Ok(_) => describe_issued(self.messages(), &request),
            Err(e) => describe_error(self.messages(), subject, &e),
        }
    }

    async fn lift(
        &self,
        sender: &dyn CommandSender,
        class: ConflictClass,
        args: &[&str],
    ) -> Vec<String> {
        if !sender.has_permission(class.reversal_permission()) {
            return vec![self.messages().get("errors.no_permission", &[])];
        }
        let Some(&subject) = args.first() else {
            let usage = match class {
                ConflictClass::Ban => "usage.unban",
                ConflictClass::Mute => "usage.unmute",
            };
            return vec![self.messages().get(usage, &[])];
        };

        let operator = Operator::new(sender.name(), sender.source());
        let line = match self.engine.reverse_class(subject, class, operator).await {
            Ok(outcome) => describe_reversal(self.messages(), subject, class, outcome),
            Err(e) => describe_error(self.messages(), subject, &e),
        };
        vec![line]
    }

    async fn warns(&self, sender: &dyn CommandSender, args: &[&str]) -> Vec<String> {
        if !sender.has_permission(WARNS_PERMISSION) {
            return vec![self.messages().get("errors.no_permission", &[])];
        }
        let Some(&subject) = args.first() else {
            return vec![self.messages().get("usage.warns", &[])];
        };
        let requested = args
            .get(1)
            .and_then(|p| p.parse::<usize>().ok())
            .unwrap_or(1);

        let warnings = match self.engine.list_warnings(subject).await {
            Ok(warnings) => warnings,
            Err(e) => return vec![describe_error(self.messages(), subject, &e)],
        };
        if warnings.is_empty() {
            return vec![self.messages().get("warns.none", &[("player", subject)])];
        }
        render_warnings(self.messages(), subject, &warnings, requested)
    }
}

/// One page of an already sorted warning list, page clamped into range
#[must_use]
pub fn render_warnings(
    messages: &Messages,
    subject: &str,
    warnings: &[Punishment],
    page: usize,
) -> Vec<String> {
    let pages = warnings.len().div_ceil(WARNS_PAGE_SIZE).max(1);
    let page = page.clamp(1, pages);
    let (page_text, pages_text) = (page.to_string(), pages.to_string());

    let mut lines = vec![messages.get(
        "warns.header",
        &[
            ("player", subject),
            ("page", page_text.as_str()),
            ("pages", pages_text.as_str()),
        ],
    )];
    lines.extend(
        warnings
            .iter()
            .skip((page - 1) * WARNS_PAGE_SIZE)
            .take(WARNS_PAGE_SIZE)
            .map(|warning| {
                let time = warning.start.map_or_else(
                    || "unknown".to_string(),
                    |start| start.format("%H:%M %d-%m-%Y").to_string(),
                );
                messages.get(
                    "warns.entry",
                    &[
                        ("reason", warning.reason.as_str()),
                        ("operator", warning.operator.as_str()),
                        ("time", time.as_str()),
                    ],
                )
            }),
    );
    lines
}
