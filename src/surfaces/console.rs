//! Operator console
//!
//! Drives the in-process roster from stdin so the engine can be exercised
//! without a game server attached:
//!
//! ```text
//! join <name> <address> [protected]
//! leave <name>
//! chat <name> <message...>
//! who
//! compose <kind> <player> | reason <text...> | duration <time> | confirm | cancel
//! /<command> <args...>
//! ```

use crate::logging::log_console;
use crate::punishment::{
    ChatVerdict, ConnectionAttempt, ConnectionVerdict, EnforcementGates, GameServer, OnlineSubject,
    Operator, ProtectionFlags, PunishmentEngine, PunishmentKind,
};
use crate::roster::Roster;
use crate::surfaces::commands::{
    CommandSender, CommandSurface, ConsoleSender, describe_error, describe_issued,
};
use crate::surfaces::session::{SessionBook, SessionError};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub struct ConsoleDriver {
    roster: Arc<Roster>,
    gates: EnforcementGates,
    engine: PunishmentEngine,
    surface: CommandSurface,
    sessions: SessionBook,
}

impl ConsoleDriver {
    pub fn new(
        roster: Arc<Roster>,
        gates: EnforcementGates,
        engine: PunishmentEngine,
        sessions: SessionBook,
    ) -> Self {
        Self {
            roster,
            gates,
            surface: CommandSurface::new(engine.clone()),
            engine,
            sessions,
        }
    }

    /// Read lines until EOF, printing each reply
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) -> std::io::Result<()> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            for reply in self.handle_line(&line).await {
                log_console(&reply);
            }
        }
        Ok(())
    }

    /// Handle one console line
    pub async fn handle_line(&self, line: &str) -> Vec<String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, rest)) = words.split_first() else {
            return Vec::new();
        };

        if head.starts_with('/') {
            return self
                .surface
                .execute(&ConsoleSender, head, rest)
                .await
                .unwrap_or_else(|| vec![format!("Unknown command: {head}")]);
        }

        match (head, rest) {
            ("join", [name, address, flags @ ..]) => self.join(name, address, flags).await,
            ("leave", [name]) => {
                if self.roster.leave(name) {
                    vec![format!("{name} left")]
                } else {
                    vec![format!("{name} is not online")]
                }
            }
            ("chat", [name, message @ ..]) => self.chat(name, &message.join(" ")).await,
            ("who", []) => vec![format!("Online: {}", self.roster.online_names().join(", "))],
            ("compose", [kind, player]) => match kind.parse::<PunishmentKind>() {
                Ok(kind) => {
                    self.sessions.begin(Operator::console(), *player, kind);
                    vec![format!("Composing {kind} for {player}")]
                }
                Err(e) => vec![e.to_string()],
            },
            ("reason", words) if !words.is_empty() => {
                session_reply(self.sessions.set_reason(ConsoleSender.name(), words.join(" ")))
            }
            ("duration", [text]) => session_reply(
                self.sessions
                    .set_duration_text(ConsoleSender.name(), text)
                    .map(|_| ()),
            ),
            ("confirm", []) => self.confirm().await,
            ("cancel", []) => {
                if self.sessions.cancel(ConsoleSender.name()) {
                    vec!["Composition cancelled".to_string()]
                } else {
                    vec!["Nothing to cancel".to_string()]
                }
            }
            _ => vec![format!("Unknown input: {line}")],
        }
    }

    async fn join(&self, name: &str, address: &str, flags: &[&str]) -> Vec<String> {
        let attempt = ConnectionAttempt {
            name: name.to_string(),
            stable_id: None,
            address: address.to_string(),
        };
        match self.gates.check_connection(&attempt).await {
            ConnectionVerdict::Allow => {
                let protections = if flags.contains(&"protected") {
                    ProtectionFlags::ALL
                } else {
                    ProtectionFlags::NONE
                };
                self.roster.join(OnlineSubject {
                    name: name.to_string(),
                    stable_id: None,
                    address: Some(address.to_string()),
                    protections,
                });
                vec![format!("{name} joined")]
            }
            ConnectionVerdict::Deny { screen, .. } => {
                let mut lines = vec![format!("{name} was refused:")];
                lines.extend(screen.lines().map(ToString::to_string));
                lines
            }
        }
    }

    async fn chat(&self, name: &str, message: &str) -> Vec<String> {
        if !self.roster.is_online(name) {
            return vec![format!("{name} is not online")];
        }
        match self.gates.check_chat(name).await {
            ChatVerdict::Allow => {
                let line = format!("<{name}> {message}");
                self.roster.broadcast(&line);
                vec![line]
            }
            ChatVerdict::Suppress { notice, .. } => {
                self.roster.tell(name, &notice);
                vec![format!("[to {name}] {notice}")]
            }
        }
    }

    async fn confirm(&self) -> Vec<String> {
        let request = match self.sessions.take(ConsoleSender.name()) {
            Ok(request) => request,
            Err(e) => return vec![e.to_string()],
        };
        let subject = request.subject.clone();
        let line = match self.engine.issue(request.clone()).await {
            Ok(_) => describe_issued(self.engine.messages(), &request),
            Err(e) => describe_error(self.engine.messages(), &subject, &e),
        };
        vec![line]
    }
}

fn session_reply(result: Result<(), SessionError>) -> Vec<String> {
    match result {
        Ok(()) => vec!["Ok".to_string()],
        Err(e) => vec![e.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Messages;
    use crate::punishment::test_support::{Harness, harness};
    use std::time::Duration;

    fn driver(h: &Harness) -> ConsoleDriver {
        let gates = EnforcementGates::new(Arc::new(h.store.clone()), Arc::new(Messages::default()))
            .with_clock(Arc::new(h.clock.clone()));
        let sessions = SessionBook::new(Arc::new(h.clock.clone()), Duration::from_secs(60));
        ConsoleDriver::new(h.roster.clone(), gates, h.engine.clone(), sessions)
    }

    #[tokio::test]
    async fn test_ban_keeps_player_out() {
        let h = harness();
        let console = driver(&h);

        assert_eq!(console.handle_line("join Bob 10.0.0.7").await, vec!["Bob joined"]);
        console.handle_line("/ban Bob griefing").await;
        assert!(!h.roster.is_online("Bob"));

        let refused = console.handle_line("join Bob 10.0.0.7").await;
        assert_eq!(refused[0], "Bob was refused:");
        assert!(refused.iter().any(|l| l == "Reason >> griefing"));

        console.handle_line("/unban Bob").await;
        assert_eq!(console.handle_line("join Bob 10.0.0.7").await, vec!["Bob joined"]);
    }

    #[tokio::test]
    async fn test_muted_chat_is_suppressed() {
        let h = harness();
        let console = driver(&h);
        console.handle_line("join Carl 10.0.0.4").await;

        assert_eq!(console.handle_line("chat Carl hi all").await, vec!["<Carl> hi all"]);
        console.handle_line("/mute Carl spam").await;
        let reply = console.handle_line("chat Carl hi again").await;
        assert!(reply[0].starts_with("[to Carl] You are muted"), "{reply:?}");
        assert!(h.roster.inbox("Carl").iter().any(|m| m.starts_with("You are muted")));
    }

    #[tokio::test]
    async fn test_composition_flow() {
        let h = harness();
        let console = driver(&h);
        console.handle_line("join Dan 10.0.0.5 protected").await;

        assert_eq!(
            console.handle_line("compose tempmute Dan").await,
            vec!["Composing tempmute for Dan"]
        );
        assert_eq!(console.handle_line("duration 10x").await.len(), 1);
        assert_eq!(console.handle_line("duration 5m").await, vec!["Ok"]);
        assert_eq!(console.handle_line("reason caps").await, vec!["Ok"]);
        assert_eq!(console.handle_line("confirm").await, vec!["Dan cannot be muted."]);
        assert_eq!(
            console.handle_line("confirm").await,
            vec!["No punishment is being composed"]
        );
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_input() {
        let h = harness();
        let console = driver(&h);
        assert!(console.handle_line("   ").await.is_empty());
        assert_eq!(console.handle_line("/fly").await, vec!["Unknown command: /fly"]);
        assert_eq!(console.handle_line("dance").await, vec!["Unknown input: dance"]);
    }
}
