//! In-process online roster
//!
//! Stands in for the game server when the engine runs on its own: tracks who
//! is connected, and records every disconnect, message and broadcast the main
//! loop applies.

use crate::CONSOLE_TARGET;
use crate::punishment::{GameServer, OnlineSubject, Presence};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Lines kept per inbox and in the broadcast log; older ones are dropped
pub const HISTORY_LIMIT: usize = 100;

fn push_bounded(log: &mut VecDeque<String>, line: &str) {
    if log.len() == HISTORY_LIMIT {
        log.pop_front();
    }
    log.push_back(line.to_string());
}

#[derive(Default)]
pub struct Roster {
    online: DashMap<String, OnlineSubject>,
    inboxes: DashMap<String, VecDeque<String>>,
    screens: DashMap<String, String>,
    broadcasts: Mutex<VecDeque<String>>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, subject: OnlineSubject) {
        info!(target: CONSOLE_TARGET, subject = %subject.name, "Subject joined");
        self.online.insert(subject.name.clone(), subject);
    }

    pub fn leave(&self, name: &str) -> bool {
        self.online.remove(name).is_some()
    }

    #[must_use]
    pub fn is_online(&self, name: &str) -> bool {
        self.online.contains_key(name)
    }

    #[must_use]
    pub fn online_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.online.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Recent messages delivered to `name`, oldest first
    #[must_use]
    pub fn inbox(&self, name: &str) -> Vec<String> {
        self.inboxes
            .get(name)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Screen shown the last time `name` was disconnected
    #[must_use]
    pub fn last_screen(&self, name: &str) -> Option<String> {
        self.screens.get(name).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Deliver a message outside the main loop, e.g. a chat gate notice
    pub fn tell(&self, name: &str, text: &str) {
        push_bounded(&mut self.inboxes.entry(name.to_string()).or_default(), text);
    }
}

impl Presence for Roster {
    fn find_online(&self, name: &str) -> Option<OnlineSubject> {
        self.online.get(name).map(|entry| entry.value().clone())
    }
}

impl GameServer for Roster {
    fn disconnect(&self, subject: &str, screen: &str) -> bool {
        self.screens.insert(subject.to_string(), screen.to_string());
        let was_online = self.leave(subject);
        if was_online {
            info!(target: CONSOLE_TARGET, subject = %subject, "Subject disconnected");
        }
        was_online
    }

    fn send_message(&self, subject: &str, text: &str) -> bool {
        if !self.is_online(subject) {
            return false;
        }
        self.tell(subject, text);
        true
    }

    fn broadcast(&self, text: &str) {
        info!(target: CONSOLE_TARGET, message = %text, "Broadcast");
        push_bounded(
            &mut self.broadcasts.lock().unwrap_or_else(PoisonError::into_inner),
            text,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::ProtectionFlags;

    fn subject(name: &str) -> OnlineSubject {
        OnlineSubject {
            name: name.to_string(),
            stable_id: None,
            address: Some("10.0.0.1".to_string()),
            protections: ProtectionFlags::NONE,
        }
    }

    #[test]
    fn test_disconnect_removes_and_records_screen() {
        let roster = Roster::new();
        roster.join(subject("Bob"));
        assert!(roster.find_online("Bob").is_some());

        assert!(roster.disconnect("Bob", "banned"));
        assert!(!roster.is_online("Bob"));
        assert_eq!(roster.last_screen("Bob").as_deref(), Some("banned"));
        assert!(!roster.disconnect("Bob", "again"));
    }

    #[test]
    fn test_messages_need_an_online_subject() {
        let roster = Roster::new();
        assert!(!roster.send_message("Carl", "hello"));
        roster.join(subject("Carl"));
        assert!(roster.send_message("Carl", "hello"));
        roster.broadcast("all");
        assert_eq!(roster.inbox("Carl"), vec!["hello".to_string()]);
        assert_eq!(roster.broadcasts(), vec!["all".to_string()]);
    }

    #[test]
    fn test_history_keeps_only_recent_lines() {
        let roster = Roster::new();
        roster.join(subject("Carl"));
        for n in 0..HISTORY_LIMIT + 5 {
            roster.tell("Carl", &format!("line {n}"));
            roster.broadcast(&format!("all {n}"));
        }

        let inbox = roster.inbox("Carl");
        assert_eq!(inbox.len(), HISTORY_LIMIT);
        assert_eq!(inbox[0], "line 5");
        assert_eq!(inbox.last().map(String::as_str), Some("line 104"));

        let broadcasts = roster.broadcasts();
        assert_eq!(broadcasts.len(), HISTORY_LIMIT);
        assert_eq!(broadcasts[0], "all 5");
    }
}
