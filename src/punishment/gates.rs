//! Enforcement gates
//!
//! Connection and chat events are checked against the store on every
//! occurrence. Expired time-boxed records are swept as they are found. A store
//! that cannot answer lets the event through and leaves a degraded-enforcement
//! log line behind.

use crate::clock::{self, Clock, SystemClock};
use crate::logging::log_degraded;
use crate::messages::{self, Messages};
use crate::punishment::{
    ConflictClass, Punishment, PunishmentKind, PunishmentState, PunishmentStore, StorageResult,
    SubjectEntry, sort_for_listing,
};
use crate::GATE_TARGET;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An incoming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    pub name: String,
    pub stable_id: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionVerdict {
    Allow,
    Deny {
        /// Screen built from the newest blocking record
        screen: String,
        /// Every live record that blocks the attempt, newest first
        blocking: Vec<Punishment>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatVerdict {
    Allow,
    Suppress {
        /// Text for the sender
        notice: String,
        punishment: Punishment,
    },
}

/// Connection and chat checks
#[derive(Clone)]
pub struct EnforcementGates {
    store: Arc<dyn PunishmentStore>,
    messages: Arc<Messages>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

impl EnforcementGates {
    pub fn new(store: Arc<dyn PunishmentStore>, messages: Arc<Messages>) -> Self {
        Self {
            store,
            messages,
            clock: Arc::new(SystemClock),
            request_timeout: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        crate::punishment::bounded(self.request_timeout, call).await
    }

    /// Decide whether a connection may proceed
    pub async fn check_connection(&self, attempt: &ConnectionAttempt) -> ConnectionVerdict {
        let now = self.clock.now();
        let seen = SubjectEntry {
            name: attempt.name.clone(),
            stable_id: attempt.stable_id.clone(),
            address: attempt.address.clone(),
            last_seen: now,
        };
        if let Err(e) = self.bounded(self.store.record_subject_seen(&seen)).await {
            log_degraded("connection", &attempt.name, &e);
        }

        let mut candidates = Vec::new();
        match self
            .bounded(self.store.find_active_by_subject(&attempt.name))
            .await
        {
            Ok(records) => candidates.extend(
                records
                    .into_iter()
                    .filter(|r| r.kind.conflict_class() == Some(ConflictClass::Ban)),
            ),
            Err(e) => log_degraded("connection", &attempt.name, &e),
        }
        match self
            .bounded(self.store.find_active_by_address(&attempt.address))
            .await
        {
            Ok(records) => {
                candidates.extend(records.into_iter().filter(|r| r.kind.traits().address_scoped));
            }
            Err(e) => log_degraded("connection", &attempt.name, &e),
        }

        let mut seen_ids = HashSet::new();
        candidates.retain(|r| seen_ids.insert(r.id));

        let mut blocking = self.live_only(candidates, now).await;
        if blocking.is_empty() {
            debug!(target: GATE_TARGET, subject = %attempt.name, "Connection allowed");
            return ConnectionVerdict::Allow;
        }
        sort_for_listing(&mut blocking);

        let primary = &blocking[0];
        let headline = self
            .messages
            .get(messages::refusal_headline_key(primary.kind), &[]);
        let remaining = primary
            .remaining_seconds(now)
            .map(clock::format)
            .filter(|text| !text.is_empty());
        let screen = self.messages.disconnect_screen(
            &headline,
            &primary.reason,
            &primary.operator,
            remaining.as_deref(),
        );

        info!(
            target: GATE_TARGET,
            subject = %attempt.name,
            address = %attempt.address,
            punishment_id = %primary.id,
            kind = %primary.kind,
            banned_subject = %primary.subject,
            blocking = blocking.len(),
            "Connection denied"
        );
        ConnectionVerdict::Deny { screen, blocking }
    }

    /// Decide whether a chat message may be delivered
    pub async fn check_chat(&self, sender: &str) -> ChatVerdict {
        let now = self.clock.now();
        let records = match self.bounded(self.store.find_active_by_subject(sender)).await {
            Ok(records) => records,
            Err(e) => {
                log_degraded("chat", sender, &e);
                return ChatVerdict::Allow;
            }
        };

        let mutes = records
            .into_iter()
            .filter(|r| r.kind.conflict_class() == Some(ConflictClass::Mute))
            .collect();
        let mut live = self.live_only(mutes, now).await;
        sort_for_listing(&mut live);
        let Some(punishment) = live.into_iter().next() else {
            return ChatVerdict::Allow;
        };

        let notice = match (punishment.kind, punishment.remaining_seconds(now)) {
            (PunishmentKind::Tempmute, Some(remaining)) => {
                let remaining = clock::format(remaining);
                self.messages.get(
                    "chat.blocked_temp_mute",
                    &[
                        ("reason", punishment.reason.as_str()),
                        ("operator", punishment.operator.as_str()),
                        ("remaining", remaining.as_str()),
                    ],
                )
            }
            _ => self.messages.get(
                "chat.blocked_permanent_mute",
                &[
                    ("reason", punishment.reason.as_str()),
                    ("operator", punishment.operator.as_str()),
                ],
            ),
        };

        debug!(
            target: GATE_TARGET,
            subject = %sender,
            punishment_id = %punishment.id,
            "Chat suppressed"
        );
        ChatVerdict::Suppress { notice, punishment }
    }

    /// Drop expired records, sweeping them on the way
    async fn live_only(&self, records: Vec<Punishment>, now: DateTime<Utc>) -> Vec<Punishment> {
        let mut live = Vec::with_capacity(records.len());
        for record in records {
            match record.state(now) {
                PunishmentState::Active => live.push(record),
                PunishmentState::ExpiredUnswept => {
                    match self.bounded(self.store.expire(record.id)).await {
                        Ok(_) => info!(
                            target: GATE_TARGET,
                            punishment_id = %record.id,
                            subject = %record.subject,
                            kind = %record.kind,
                            "Punishment expired"
                        ),
                        Err(e) => log_degraded("sweep", &record.subject, &e),
                    }
                }
                PunishmentState::Inactive => {}
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::engine::tests::{alice, harness, online, t0};
    use crate::punishment::{
        MockPunishmentStore, NewPunishment, PunishmentId, PunishmentRequest, StorageError,
    };
    use crate::clock::ManualClock;

    fn attempt(name: &str, address: &str) -> ConnectionAttempt {
        ConnectionAttempt {
            name: name.to_string(),
            stable_id: Some(format!("uuid-{name}")),
            address: address.to_string(),
        }
    }

    fn gates_for(h: &crate::punishment::engine::tests::Harness) -> EnforcementGates {
        EnforcementGates::new(Arc::new(h.store.clone()), Arc::new(Messages::default()))
            .with_clock(Arc::new(h.clock.clone()))
    }

    #[tokio::test]
    async fn test_ban_unban_reconnect() {
        let h = harness();
        let gates = gates_for(&h);
        h.roster.join(online("Bob", "10.0.0.7"));

        h.engine
            .issue(PunishmentRequest::new(PunishmentKind::Ban, "Bob", alice()).reason("griefing"))
            .await
            .unwrap();
        assert!(!h.roster.is_online("Bob"));

        let again = h
            .engine
            .issue(PunishmentRequest::new(PunishmentKind::Ban, "Bob", alice()))
            .await;
        assert!(matches!(again, Err(crate::punishment::EngineError::AlreadyPunished { .. })));

        match gates.check_connection(&attempt("Bob", "10.0.0.7")).await {
            ConnectionVerdict::Deny { screen, blocking } => {
                assert_eq!(blocking.len(), 1);
                assert!(screen.starts_with("[SolaceCore] >> You are banned"));
                assert!(screen.contains("griefing"));
            }
            ConnectionVerdict::Allow => panic!("banned subject was let in"),
        }

        h.engine
            .reverse_class("Bob", ConflictClass::Ban, alice())
            .await
            .unwrap();
        assert_eq!(
            gates.check_connection(&attempt("Bob", "10.0.0.7")).await,
            ConnectionVerdict::Allow
        );
    }

    #[tokio::test]
    async fn test_expired_tempban_is_swept_at_connection() {
        let h = harness();
        let gates = gates_for(&h);
        let id = h
            .store
            .create_punishment(NewPunishment {
                subject: "Bob".to_string(),
                reason: "xray".to_string(),
                operator: "Alice".to_string(),
                kind: PunishmentKind::Tempban,
                start: Some(t0()),
                end: clock::add_seconds(t0(), 60),
                duration_seconds: Some(60),
                active: true,
            })
            .await
            .unwrap();

        h.clock.advance(30);
        match gates.check_connection(&attempt("Bob", "10.0.0.7")).await {
            ConnectionVerdict::Deny { screen, .. } => {
                assert!(screen.contains("Duration >> 30s"), "{screen}");
            }
            ConnectionVerdict::Allow => panic!("tempban ignored"),
        }

        h.clock.advance(31);
        assert_eq!(
            gates.check_connection(&attempt("Bob", "10.0.0.7")).await,
            ConnectionVerdict::Allow
        );
        assert!(!h.store.get(id).unwrap().active);
    }

    #[tokio::test]
    async fn test_address_bans_follow_the_address() {
        let h = harness();
        let gates = gates_for(&h);

        for name in ["Bob", "Mallory"] {
            assert_eq!(
                gates.check_connection(&attempt(name, "10.0.0.7")).await,
                ConnectionVerdict::Allow
            );
            h.engine
                .issue(PunishmentRequest::new(PunishmentKind::Ipban, name, alice()))
                .await
                .unwrap();
        }

        match gates.check_connection(&attempt("Eve", "10.0.0.7")).await {
            ConnectionVerdict::Deny { blocking, screen } => {
                let mut subjects: Vec<&str> =
                    blocking.iter().map(|r| r.subject.as_str()).collect();
                subjects.sort_unstable();
                assert_eq!(subjects, vec!["Bob", "Mallory"]);
                assert!(screen.contains("Your address is banned"));
            }
            ConnectionVerdict::Allow => panic!("address ban ignored"),
        }

        assert_eq!(
            gates.check_connection(&attempt("Eve", "10.0.0.8")).await,
            ConnectionVerdict::Allow
        );
        let eve = h.store.find_subject("Eve").await.unwrap().unwrap();
        assert_eq!(eve.address, "10.0.0.8");
    }

    #[tokio::test]
    async fn test_plain_ban_does_not_follow_the_address() {
        let h = harness();
        let gates = gates_for(&h);
        gates.check_connection(&attempt("Bob", "10.0.0.7")).await;
        h.engine
            .issue(PunishmentRequest::new(PunishmentKind::Ban, "Bob", alice()))
            .await
            .unwrap();

        assert_eq!(
            gates.check_connection(&attempt("Eve", "10.0.0.7")).await,
            ConnectionVerdict::Allow
        );
    }

    #[tokio::test]
    async fn test_tempmute_expires_while_chatting() {
        let h = harness();
        let gates = gates_for(&h);
        h.roster.join(online("Carl", "10.0.0.4"));

        let id = h
            .engine
            .issue(
                PunishmentRequest::new(PunishmentKind::Tempmute, "Carl", alice())
                    .reason("spam")
                    .duration(60),
            )
            .await
            .unwrap();

        h.clock.advance(30);
        match gates.check_chat("Carl").await {
            ChatVerdict::Suppress { notice, punishment } => {
                assert_eq!(punishment.id, id);
                assert!(notice.contains("30s"), "{notice}");
                assert!(notice.contains("spam"));
                assert!(notice.contains("Alice"));
            }
            ChatVerdict::Allow => panic!("muted subject chatted"),
        }

        h.clock.advance(31);
        assert_eq!(gates.check_chat("Carl").await, ChatVerdict::Allow);
        assert!(!h.store.get(id).unwrap().active);
    }

    #[tokio::test]
    async fn test_last_second_of_tempmute_still_shows_time() {
        let h = harness();
        let gates = gates_for(&h);
        h.roster.join(online("Carl", "10.0.0.4"));
        h.engine
            .issue(
                PunishmentRequest::new(PunishmentKind::Tempmute, "Carl", alice())
                    .reason("spam")
                    .duration(60),
            )
            .await
            .unwrap();

        h.clock.set(t0() + chrono::TimeDelta::milliseconds(59_500));
        match gates.check_chat("Carl").await {
            ChatVerdict::Suppress { notice, .. } => {
                assert_eq!(
                    notice,
                    "You are muted for another 1s. Reason: spam (by Alice)"
                );
            }
            ChatVerdict::Allow => panic!("muted subject chatted"),
        }
    }

    #[tokio::test]
    async fn test_permanent_mute_notice() {
        let h = harness();
        let gates = gates_for(&h);
        h.roster.join(online("Carl", "10.0.0.4"));
        h.engine
            .issue(PunishmentRequest::new(PunishmentKind::Mute, "Carl", alice()).reason("toxicity"))
            .await
            .unwrap();

        match gates.check_chat("Carl").await {
            ChatVerdict::Suppress { notice, .. } => {
                assert_eq!(notice, "You are muted. Reason: toxicity (by Alice)");
            }
            ChatVerdict::Allow => panic!("muted subject chatted"),
        }
        assert_eq!(gates.check_chat("Dave").await, ChatVerdict::Allow);
    }

    #[tokio::test]
    async fn test_store_failures_fail_open() {
        let mut store = MockPunishmentStore::new();
        store
            .expect_record_subject_seen()
            .returning(|_| Err(StorageError::Unavailable("down".to_string())));
        store
            .expect_find_active_by_subject()
            .returning(|_| Err(StorageError::Timeout(Duration::from_millis(10))));
        store
            .expect_find_active_by_address()
            .returning(|_| Err(StorageError::Unavailable("down".to_string())));
        store.expect_expire().times(0);

        let gates = EnforcementGates::new(Arc::new(store), Arc::new(Messages::default()))
            .with_clock(Arc::new(ManualClock::new(t0())));

        assert_eq!(
            gates.check_connection(&attempt("Bob", "10.0.0.7")).await,
            ConnectionVerdict::Allow
        );
        assert_eq!(gates.check_chat("Bob").await, ChatVerdict::Allow);
    }

    #[tokio::test]
    async fn test_address_failure_still_uses_name_lookup() {
        let mut store = MockPunishmentStore::new();
        store.expect_record_subject_seen().returning(|_| Ok(()));
        store.expect_find_active_by_subject().returning(|_| {
            Ok(vec![Punishment {
                id: PunishmentId(1),
                subject: "Bob".to_string(),
                reason: "griefing".to_string(),
                operator: "Alice".to_string(),
                kind: PunishmentKind::Ban,
                start: Some(t0()),
                end: None,
                duration_seconds: None,
                active: true,
            }])
        });
        store
            .expect_find_active_by_address()
            .returning(|_| Err(StorageError::Unavailable("down".to_string())));

        let gates = EnforcementGates::new(Arc::new(store), Arc::new(Messages::default()))
            .with_clock(Arc::new(ManualClock::new(t0())));
        assert!(matches!(
            gates.check_connection(&attempt("Bob", "10.0.0.7")).await,
            ConnectionVerdict::Deny { .. }
        ));
    }
}
