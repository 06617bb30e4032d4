//! Control socket
//!
//! A WebSocket endpoint for a moderation panel. Each text frame is one
//! request; the sender gets a `success` or `error` reply and every connected
//! client sees an `action` frame for each accepted punishment.

pub mod protocol;

use crate::messages::Messages;
use crate::punishment::{
    ConflictClass, Operator, PunishmentEngine, PunishmentKind, PunishmentRequest,
    ReverseOutcome, Source,
};
use crate::surfaces::commands::describe_error;
use crate::SOCKET_TARGET;
use futures_util::{SinkExt, StreamExt};
use protocol::{ControlFrame, ControlRequest, DEFAULT_TEMPBAN_SECONDS};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Capacity of the fan-out channel shared by all connections
const BROADCAST_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Failed to bind control socket: {0}")]
    Bind(#[from] std::io::Error),
}

/// Turns request frames into engine calls
#[derive(Clone)]
pub struct ControlHandler {
    engine: PunishmentEngine,
}

impl ControlHandler {
    #[must_use]
    pub fn new(engine: PunishmentEngine) -> Self {
        Self { engine }
    }

    fn messages(&self) -> &Messages {
        self.engine.messages()
    }

    /// Handle one inbound text frame. Returns the reply for the sender and,
    /// for accepted actions, the frame to fan out to everyone.
    pub async fn handle(&self, text: &str) -> (ControlFrame, Option<ControlFrame>) {
        let request: ControlRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                return (
                    ControlFrame::error(format!("Error processing request: {e}")),
                    None,
                );
            }
        };
        let Some(action) = request.action.as_deref() else {
            return (ControlFrame::error("Missing action field"), None);
        };
        let action = action.to_lowercase();
        if !matches!(
            action.as_str(),
            "ban" | "tempban" | "unban" | "kick" | "warn" | "mute" | "unmute"
        ) {
            return (ControlFrame::error(format!("Unknown action: {action}")), None);
        }
        let Some(player) = request
            .player_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        else {
            return (ControlFrame::error("Player name is required"), None);
        };

        info!(
            target: SOCKET_TARGET,
            action = %action,
            subject = %player,
            "Control request"
        );

        match action.as_str() {
            "unban" => self.lift(&action, player, ConflictClass::Ban).await,
            "unmute" => self.lift(&action, player, ConflictClass::Mute).await,
            _ => self.punish(&action, player, &request).await,
        }
    }

    async fn punish(
        &self,
        action: &str,
        player: &str,
        request: &ControlRequest,
    ) -> (ControlFrame, Option<ControlFrame>) {
        let (kind, duration, verb) = match action {
            "ban" => (PunishmentKind::Ban, None, "banned"),
            "tempban" => (
                PunishmentKind::Tempban,
                Some(request.duration.unwrap_or(DEFAULT_TEMPBAN_SECONDS)),
                "temporarily banned",
            ),
            "kick" => (PunishmentKind::Kick, None, "kicked"),
            "warn" => (PunishmentKind::Warn, None, "warned"),
            _ => match request.duration.filter(|d| *d > 0) {
                Some(seconds) => (PunishmentKind::Tempmute, Some(seconds), "muted"),
                None => (PunishmentKind::Mute, None, "muted"),
            },
        };

        let operator = Operator::new("Console", Source::Socket);
        let mut issue = PunishmentRequest::new(kind, player, operator);
        issue.reason = request.reason.clone();
        issue.duration_seconds = duration;

        match self.engine.issue(issue).await {
            Ok(id) => {
                debug!(target: SOCKET_TARGET, punishment_id = %id, "Control action accepted");
                let reason = request
                    .reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| self.messages().no_reason());
                let broadcast_duration = match action {
                    "tempban" => duration,
                    "mute" => Some(duration.unwrap_or(0)),
                    _ => None,
                };
                (
                    ControlFrame::success(action, format!("Player {player} has been {verb}")),
                    Some(ControlFrame::Action {
                        action: action.to_string(),
                        player_name: player.to_string(),
                        reason: Some(reason),
                        duration: broadcast_duration,
                    }),
                )
            }
            Err(e) => (
                ControlFrame::error(describe_error(self.messages(), player, &e)),
                None,
            ),
        }
    }

    async fn lift(
        &self,
        action: &str,
        player: &str,
        class: ConflictClass,
    ) -> (ControlFrame, Option<ControlFrame>) {
        let operator = Operator::new("Console", Source::Socket);
        match self.engine.reverse_class(player, class, operator).await {
            Ok(ReverseOutcome::Reversed(_)) => {
                let verb = match class {
                    ConflictClass::Ban => "unbanned",
                    ConflictClass::Mute => "unmuted",
                };
                (
                    ControlFrame::success(action, format!("Player {player} has been {verb}")),
                    Some(ControlFrame::Action {
                        action: action.to_string(),
                        player_name: player.to_string(),
                        reason: None,
                        duration: None,
                    }),
                )
            }
            Ok(ReverseOutcome::NothingToReverse) => {
                let state = match class {
                    ConflictClass::Ban => "banned",
                    ConflictClass::Mute => "muted",
                };
                (
                    ControlFrame::success(action, format!("Player {player} is not {state}")),
                    None,
                )
            }
            Err(e) => (
                ControlFrame::error(describe_error(self.messages(), player, &e)),
                None,
            ),
        }
    }
}

/// Bind the listener
///
/// # Errors
///
/// Returns `SocketError::Bind` if the address is unavailable.
pub async fn bind(addr: &str) -> Result<TcpListener, SocketError> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: SOCKET_TARGET, address = %addr, "Control socket listening");
    Ok(listener)
}

/// Accept connections until the task is dropped
pub async fn serve(listener: TcpListener, handler: ControlHandler) {
    let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, handler.clone(), tx.clone()));
            }
            Err(e) => warn!(target: SOCKET_TARGET, error = %e, "Accept failed"),
        }
    }
}

fn encode(frame: &ControlFrame) -> Option<String> {
    frame
        .to_json()
        .map_err(|e| warn!(target: SOCKET_TARGET, error = %e, "Dropping unencodable frame"))
        .ok()
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: ControlHandler,
    fanout: broadcast::Sender<String>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(target: SOCKET_TARGET, peer = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    info!(target: SOCKET_TARGET, peer = %addr, "Control client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = fanout.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    let greeting = ControlFrame::connected(handler.engine.now().timestamp_millis());
    if let Some(text) = encode(&greeting) {
        if ws_sender.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    // Replies and fan-out share the write half
    let writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = reply_rx.recv() => text,
                received = rx.recv() => match received {
                    Ok(text) => text,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: SOCKET_TARGET, peer = %addr, skipped, "Client lagging");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let (reply, fanned) = handler.handle(&text).await;
                if let Some(text) = encode(&reply) {
                    if reply_tx.send(text).await.is_err() {
                        break;
                    }
                }
                if let Some(text) = fanned.as_ref().and_then(encode) {
                    // No receivers is fine
                    let _ = fanout.send(text);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(target: SOCKET_TARGET, peer = %addr, error = %e, "Receive failed");
                break;
            }
        }
    }

    writer.abort();
    info!(target: SOCKET_TARGET, peer = %addr, "Control client disconnected");
}
