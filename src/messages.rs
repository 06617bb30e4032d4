//! Message catalogue
//!
//! Every text a player or operator reads comes from here. Templates use
//! `{placeholder}` markers. Built-in English defaults can be overridden by a
//! YAML file whose nested keys are flattened into dotted paths.

use crate::config::{AppealLink, ConfigError};
use crate::punishment::PunishmentKind;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const SCREEN_HEADER: &str = "[SolaceCore] >> ";

const DEFAULTS: &[(&str, &str)] = &[
    ("no_reason", "No reason specified"),
    ("errors.no_permission", "You do not have permission to do that."),
    ("errors.invalid_time", "Invalid time. Use a number followed by s, m, h or d, e.g. 30m."),
    ("errors.player_not_found", "Player not found or not online."),
    ("errors.storage", "The punishment database is unavailable, try again shortly."),
    ("errors.internal", "Something went wrong while processing that action."),
    ("punishment.already_banned", "{player} is already banned."),
    ("punishment.already_muted", "{player} is already muted."),
    ("punishment.kick_protection", "{player} cannot be kicked."),
    ("punishment.ban_protection", "{player} cannot be banned."),
    ("punishment.mute_protection", "{player} cannot be muted."),
    ("punishment.warn_protection", "{player} cannot be warned."),
    ("punishment.not_banned", "{player} is not banned."),
    ("punishment.not_muted", "{player} is not muted."),
    ("punishment.ban_success", "{player} has been banned. Reason: {reason}"),
    ("punishment.ipban_success", "{player} has been IP banned. Reason: {reason}"),
    ("punishment.tempban_success", "{operator} banned {player} for {time}. Reason: {reason}"),
    ("punishment.tempipban_success", "{operator} IP banned {player} for {time}. Reason: {reason}"),
    ("punishment.mute_success", "{player} has been muted. Reason: {reason}"),
    ("punishment.tempmute_success", "{operator} muted {player} for {time}. Reason: {reason}"),
    ("punishment.unban_success", "{player} has been unbanned."),
    ("punishment.unmute_success", "{player} has been unmuted."),
    ("broadcast.player_kicked", "{player} has been kicked. Reason: {reason}"),
    ("broadcast.player_warned", "{player} has been warned. Reason: {reason}"),
    ("player_messages.kicked", "You have been kicked from the server."),
    ("player_messages.banned", "You have been banned from the server."),
    ("player_messages.ipbanned", "You have been IP banned from the server."),
    ("player_messages.tempbanned", "You have been banned from the server for {time}."),
    ("player_messages.tempipbanned", "You have been IP banned from the server for {time}."),
    ("player_messages.ban", "You are banned from this server."),
    ("player_messages.tempban", "You are temporarily banned from this server."),
    ("player_messages.ipban", "Your address is banned from this server."),
    ("player_messages.tempipban", "Your address is temporarily banned from this server."),
    ("player_messages.muted", "You have been muted by {operator}. Reason: {reason}"),
    ("player_messages.tempmuted", "You have been muted by {operator} for {time}. Reason: {reason}"),
    ("player_messages.warned", "You have been warned by {operator}. Reason: {reason}"),
    ("player_messages.unmuted", "You have been unmuted."),
    ("chat.blocked_permanent_mute", "You are muted. Reason: {reason} (by {operator})"),
    ("chat.blocked_temp_mute", "You are muted for another {remaining}. Reason: {reason} (by {operator})"),
    ("warns.header", "Warnings for {player} (Page {page}/{pages})"),
    ("warns.entry", "{reason} | by {operator} | at {time}"),
    ("warns.none", "{player} has no warnings."),
    ("screen.reason", "Reason >> "),
    ("screen.duration", "Duration >> "),
    ("screen.issued_by", "Issued by >> "),
    ("usage.kick", "Usage: /kick <player> [reason]"),
    ("usage.ban", "Usage: /ban <player> [reason]"),
    ("usage.ipban", "Usage: /ipban <player> [reason]"),
    ("usage.tempban", "Usage: /tempban <player> <time> [reason]"),
    ("usage.tempipban", "Usage: /tempipban <player> <time> [reason]"),
    ("usage.mute", "Usage: /mute <player> [reason]"),
    ("usage.tempmute", "Usage: /tempmute <player> <time> [reason]"),
    ("usage.warn", "Usage: /warn <player> [reason]"),
    ("usage.unban", "Usage: /unban <player>"),
    ("usage.unmute", "Usage: /unmute <player>"),
    ("usage.warns", "Usage: /warns <player> [page]"),
];

/// Loaded templates plus the appeal links shown on disconnect screens
#[derive(Debug, Clone)]
pub struct Messages {
    templates: HashMap<String, String>,
    appeal_links: Vec<AppealLink>,
}

impl Default for Messages {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Messages {
    /// Built-in templates
    #[must_use]
    pub fn new(appeal_links: Vec<AppealLink>) -> Self {
        let templates = DEFAULTS
            .iter()
            .map(|(key, text)| ((*key).to_string(), (*text).to_string()))
            .collect();
        Self {
            templates,
            appeal_links,
        }
    }

    /// Built-in templates overridden by the YAML file at `path`, if it exists
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path, appeal_links: Vec<AppealLink>) -> Result<Self, ConfigError> {
        let mut messages = Self::new(appeal_links);
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No message file, using built-in messages");
                return Ok(messages);
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let overrides = messages.merge_yaml(&content)?;
        info!(path = %path.display(), overrides, "Loaded message file");
        Ok(messages)
    }

    /// Merge templates from YAML text. A top-level `messages:` section is
    /// unwrapped. Returns the number of templates read.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Yaml` if the text is not valid YAML.
    pub fn merge_yaml(&mut self, content: &str) -> Result<usize, ConfigError> {
        let root: Value = serde_yaml::from_str(content)?;
        let root = match root.get("messages") {
            Some(section) => section.clone(),
            None => root,
        };
        let mut flat = Vec::new();
        flatten("", &root, &mut flat);
        let count = flat.len();
        self.templates.extend(flat);
        Ok(count)
    }

    /// Template `key` with `{name}` markers replaced. Unknown keys render as
    /// the key itself so a missing translation is visible rather than silent.
    #[must_use]
    pub fn get(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let Some(template) = self.templates.get(key) else {
            warn!(key = %key, "Missing message template");
            return key.to_string();
        };
        vars.iter().fold(template.clone(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
    }

    /// Placeholder reason for blank input
    #[must_use]
    pub fn no_reason(&self) -> String {
        self.get("no_reason", &[])
    }

    /// Screen shown to a disconnected or refused subject
    #[must_use]
    pub fn disconnect_screen(
        &self,
        headline: &str,
        reason: &str,
        operator: &str,
        duration: Option<&str>,
    ) -> String {
        let mut lines = vec![
            format!("{SCREEN_HEADER}{headline}"),
            String::new(),
            format!("{}{reason}", self.get("screen.reason", &[])),
        ];
        if let Some(duration) = duration.filter(|d| !d.is_empty()) {
            lines.push(String::new());
            lines.push(format!("{}{duration}", self.get("screen.duration", &[])));
        }
        lines.push(String::new());
        lines.push(format!("{}{operator}", self.get("screen.issued_by", &[])));

        let links: Vec<String> = self
            .appeal_links
            .iter()
            .filter(|link| !link.link.trim().is_empty())
            .map(|link| {
                let name = if link.name.trim().is_empty() {
                    link.key.as_str()
                } else {
                    link.name.as_str()
                };
                format!("{name} >> {}", link.link)
            })
            .collect();
        if !links.is_empty() {
            lines.push(String::new());
            lines.extend(links);
        }
        lines.join("\n")
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let Some(key) = key.as_str() else { continue };
                let path = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        Value::String(text) => out.push((prefix.to_string(), text.clone())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        _ => {}
    }
}

/// Headline shown when a subject is removed at issue time
#[must_use]
pub fn removal_headline_key(kind: PunishmentKind) -> &'static str {
    match kind {
        PunishmentKind::Kick => "player_messages.kicked",
        PunishmentKind::Tempban => "player_messages.tempbanned",
        PunishmentKind::Ipban => "player_messages.ipbanned",
        PunishmentKind::Tempipban => "player_messages.tempipbanned",
        _ => "player_messages.banned",
    }
}

/// Headline shown when a connection is refused
#[must_use]
pub fn refusal_headline_key(kind: PunishmentKind) -> &'static str {
    match kind {
        PunishmentKind::Tempban => "player_messages.tempban",
        PunishmentKind::Ipban => "player_messages.ipban",
        PunishmentKind::Tempipban => "player_messages.tempipban",
        _ => "player_messages.ban",
    }
}

/// Direct message for kinds that leave the subject online
#[must_use]
pub fn direct_message_key(kind: PunishmentKind) -> Option<&'static str> {
    match kind {
        PunishmentKind::Mute => Some("player_messages.muted"),
        PunishmentKind::Tempmute => Some("player_messages.tempmuted"),
        PunishmentKind::Warn => Some("player_messages.warned"),
        _ => None,
    }
}

/// Server-wide announcement for an issued kind
#[must_use]
pub fn broadcast_key(kind: PunishmentKind) -> &'static str {
    match kind {
        PunishmentKind::Kick => "broadcast.player_kicked",
        PunishmentKind::Ban => "punishment.ban_success",
        PunishmentKind::Tempban => "punishment.tempban_success",
        PunishmentKind::Ipban => "punishment.ipban_success",
        PunishmentKind::Tempipban => "punishment.tempipban_success",
        PunishmentKind::Mute => "punishment.mute_success",
        PunishmentKind::Tempmute => "punishment.tempmute_success",
        PunishmentKind::Warn => "broadcast.player_warned",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(key: &str, name: &str, url: &str) -> AppealLink {
        AppealLink {
            key: key.to_string(),
            name: name.to_string(),
            link: url.to_string(),
        }
    }

    #[test]
    fn test_placeholders() {
        let messages = Messages::default();
        assert_eq!(
            messages.get("punishment.already_banned", &[("player", "Bob")]),
            "Bob is already banned."
        );
        assert_eq!(messages.get("nope.missing", &[]), "nope.missing");
        assert_eq!(messages.no_reason(), "No reason specified");
    }

    #[test]
    fn test_yaml_overrides_are_flattened() {
        let mut messages = Messages::default();
        let yaml = "messages:\n  punishment:\n    already_banned: \"{player} ist schon gebannt\"\n  no_reason: \"Kein Grund\"\n";
        assert_eq!(messages.merge_yaml(yaml).unwrap(), 2);
        assert_eq!(
            messages.get("punishment.already_banned", &[("player", "Bob")]),
            "Bob ist schon gebannt"
        );
        assert_eq!(messages.no_reason(), "Kein Grund");
        assert_eq!(
            messages.get("punishment.already_muted", &[("player", "Bob")]),
            "Bob is already muted."
        );
    }

    #[test]
    fn test_disconnect_screen_layout() {
        let messages = Messages::new(vec![
            link("discord", "Discord", "https://discord.gg/example"),
            link("web", "", "https://example.org/appeal"),
            link("broken", "Broken", "  "),
        ]);
        let screen = messages.disconnect_screen("You are banned.", "xray", "Alice", Some("1h"));
        assert_eq!(
            screen,
            "[SolaceCore] >> You are banned.\n\nReason >> xray\n\nDuration >> 1h\n\nIssued by >> Alice\n\nDiscord >> https://discord.gg/example\nweb >> https://example.org/appeal"
        );

        let plain = Messages::default().disconnect_screen("Kicked.", "afk", "Console", None);
        assert_eq!(
            plain,
            "[SolaceCore] >> Kicked.\n\nReason >> afk\n\nIssued by >> Console"
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let messages = Messages::load(Path::new("does/not/exist.yaml"), Vec::new())
            .await
            .unwrap();
        assert_eq!(messages.get("usage.warns", &[]), "Usage: /warns <player> [page]");
    }

    #[test]
    fn test_every_kind_has_texts() {
        let messages = Messages::default();
        for kind in PunishmentKind::ALL {
            let text = messages.get(broadcast_key(kind), &[]);
            assert_ne!(text, broadcast_key(kind));
            if let Some(key) = direct_message_key(kind) {
                assert_ne!(messages.get(key, &[]), key);
            }
        }
    }
}
