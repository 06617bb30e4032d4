//! Punishment engine
//!
//! The single entry point for issuing and lifting punishments. Every surface
//! (in-game commands, the control socket, the Discord bridge) funnels through
//! `issue` and `reverse`.
//!
//! Issuing checks, in order: reachability, protection, conflicts with active
//! records of the same class, then the duration. The conflict check and the
//! write run under a per-subject lock, inside a spawned task so that a caller
//! giving up cannot leave a half-applied punishment behind.

use crate::clock::{self, Clock, SystemClock};
use crate::messages::{self, Messages};
use crate::punishment::{
    AuditEntry, ConflictClass, Effect, EffectDispatcher, EngineError, EngineResult,
    NewPunishment, Notifier, NotifierRegistry, Operator, Presence, Punishment, PunishmentEvent,
    PunishmentId, PunishmentKind, PunishmentRequest, PunishmentState, PunishmentStore,
    StorageResult, is_protected, sort_for_listing,
};
use crate::{AUDIT_TARGET, ENGINE_TARGET};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

/// Result of a reversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseOutcome {
    /// This many records were lifted
    Reversed(u64),
    NothingToReverse,
}

/// Per-subject mutual exclusion. Entries are dropped once nobody holds them.
#[derive(Default)]
struct SubjectLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubjectLocks {
    async fn acquire(&self, subject: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&self.locks.entry(subject.to_string()).or_default());
        lock.lock_owned().await
    }

    fn release(&self, subject: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if(subject, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct EngineInner {
    store: Arc<dyn PunishmentStore>,
    presence: Arc<dyn Presence>,
    effects: EffectDispatcher,
    notifiers: NotifierRegistry,
    messages: Arc<Messages>,
    clock: Arc<dyn Clock>,
    locks: SubjectLocks,
    request_timeout: Duration,
}

/// Builder for `PunishmentEngine`
pub struct EngineBuilder {
    store: Arc<dyn PunishmentStore>,
    presence: Arc<dyn Presence>,
    effects: EffectDispatcher,
    notifiers: NotifierRegistry,
    messages: Arc<Messages>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

impl EngineBuilder {
    #[must_use]
    pub fn messages(mut self, messages: Arc<Messages>) -> Self {
        self.messages = messages;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn notifier(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.notifiers.register(sink);
        self
    }

    /// Deadline applied to every store call
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> PunishmentEngine {
        info!(
            target: ENGINE_TARGET,
            notifiers = self.notifiers.len(),
            request_timeout_ms = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            "Punishment engine ready"
        );
        PunishmentEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                presence: self.presence,
                effects: self.effects,
                notifiers: self.notifiers,
                messages: self.messages,
                clock: self.clock,
                locks: SubjectLocks::default(),
                request_timeout: self.request_timeout,
            }),
        }
    }
}

/// Handle to the engine, cheap to clone into every surface
#[derive(Clone)]
pub struct PunishmentEngine {
    inner: Arc<EngineInner>,
}

impl PunishmentEngine {
    pub fn builder(
        store: Arc<dyn PunishmentStore>,
        presence: Arc<dyn Presence>,
        effects: EffectDispatcher,
    ) -> EngineBuilder {
        EngineBuilder {
            store,
            presence,
            effects,
            notifiers: NotifierRegistry::new(),
            messages: Arc::new(Messages::default()),
            clock: Arc::new(SystemClock),
            request_timeout: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn messages(&self) -> &Messages {
        &self.inner.messages
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    #[must_use]
    pub fn presence(&self) -> &dyn Presence {
        self.inner.presence.as_ref()
    }

    /// Issue a punishment.
    ///
    /// # Errors
    ///
    /// - `SubjectUnreachable` if the kind needs an online subject and they are not
    /// - `Protected` if the subject's flags shield them from the kind
    /// - `AlreadyPunished` if an active record of the same class exists
    /// - `InvalidDuration` if a time-boxed kind lacks a positive duration
    /// - `Storage` if the record could not be read or written. The subject is
    ///   still disconnected or messaged in that case.
    pub async fn issue(&self, request: PunishmentRequest) -> EngineResult<PunishmentId> {
        let kind = request.kind;
        let online = self.inner.presence.find_online(&request.subject);

        if kind.traits().requires_online && online.is_none() {
            info!(
                target: ENGINE_TARGET,
                subject = %request.subject,
                kind = %kind,
                "Refused punishment: subject not online"
            );
            return Err(EngineError::SubjectUnreachable {
                subject: request.subject,
            });
        }

        let flags = online.as_ref().map(|o| o.protections).unwrap_or_default();
        if is_protected(flags, kind) {
            info!(
                target: ENGINE_TARGET,
                subject = %request.subject,
                kind = %kind,
                operator = %request.operator.name,
                "Refused punishment: subject is protected"
            );
            return Err(EngineError::Protected {
                subject: request.subject,
                kind,
            });
        }

        let subject = online.map_or_else(|| request.subject.clone(), |o| o.name);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let guard = inner.locks.acquire(&subject).await;
            let result = inner.admit(&subject, request).await;
            inner.locks.release(&subject, guard);
            result
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// Lift every active record of `kind` for the subject.
    ///
    /// Returns `NothingToReverse` when none was active.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the records could not be updated.
    pub async fn reverse(
        &self,
        subject: &str,
        kind: PunishmentKind,
        operator: Operator,
    ) -> EngineResult<ReverseOutcome> {
        let action = format!("UN{}", kind.traits().audit_label);
        self.spawn_reversal(subject, vec![kind], action, operator)
            .await
    }

    /// Lift every active record of a whole class: `unban` and `unmute`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the records could not be updated.
    pub async fn reverse_class(
        &self,
        subject: &str,
        class: ConflictClass,
        operator: Operator,
    ) -> EngineResult<ReverseOutcome> {
        self.spawn_reversal(
            subject,
            class.members().to_vec(),
            class.reversal_label().to_string(),
            operator,
        )
        .await
    }

    async fn spawn_reversal(
        &self,
        subject: &str,
        kinds: Vec<PunishmentKind>,
        action: String,
        operator: Operator,
    ) -> EngineResult<ReverseOutcome> {
        let inner = Arc::clone(&self.inner);
        let subject = subject.to_string();
        tokio::spawn(async move {
            let guard = inner.locks.acquire(&subject).await;
            let result = inner.lift(&subject, &kinds, &action, &operator).await;
            inner.locks.release(&subject, guard);
            result
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// Warnings for the subject, newest first
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub async fn list_warnings(&self, subject: &str) -> EngineResult<Vec<Punishment>> {
        let mut warnings: Vec<Punishment> = self
            .history(subject)
            .await?
            .into_iter()
            .filter(|r| r.kind == PunishmentKind::Warn)
            .collect();
        sort_for_listing(&mut warnings);
        Ok(warnings)
    }

    /// Every record for the subject, newest first
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub async fn history(&self, subject: &str) -> EngineResult<Vec<Punishment>> {
        let mut records = self
            .inner
            .bounded(self.inner.store.find_by_subject(subject))
            .await?;
        sort_for_listing(&mut records);
        Ok(records)
    }
}

impl EngineInner {
    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        crate::punishment::bounded(self.request_timeout, call).await
    }

    async fn admit(&self, subject: &str, request: PunishmentRequest) -> EngineResult<PunishmentId> {
        let kind = request.kind;
        let now = self.clock.now();

        if let Some(class) = kind.conflict_class() {
            self.check_conflict(subject, class, now).await?;
        }

        let duration = if kind.is_time_boxed() {
            match request.duration_seconds {
                Some(seconds) if seconds > 0 => Some(seconds),
                _ => return Err(EngineError::InvalidDuration { kind }),
            }
        } else {
            None
        };
        let end = match duration {
            Some(seconds) => {
                Some(clock::add_seconds(now, seconds).ok_or(EngineError::InvalidDuration { kind })?)
            }
            None => None,
        };

        let record = NewPunishment {
            subject: subject.to_string(),
            reason: self.reason_or_placeholder(request.reason.as_deref()),
            operator: request.operator.name.clone(),
            kind,
            start: Some(now),
            end,
            duration_seconds: duration,
            active: !kind.traits().transient,
        };

        let stored = self.bounded(self.store.create_punishment(record.clone())).await;
        if let Err(e) = &stored {
            error!(
                target: ENGINE_TARGET,
                subject = %subject,
                kind = %kind,
                error = %e,
                "Failed to persist punishment, enforcing it for this session only"
            );
        }

        let online = self.presence.find_online(subject).is_some();
        if let Err(e) = self.effects.dispatch(self.issue_effects(&record, online)).await {
            error!(
                target: ENGINE_TARGET,
                subject = %subject,
                kind = %kind,
                error = %e,
                "Failed to apply punishment side effects"
            );
        }

        let id = stored?;
        info!(
            target: ENGINE_TARGET,
            punishment_id = %id,
            subject = %subject,
            kind = %kind,
            operator = %request.operator.name,
            source = %request.operator.source,
            duration_seconds = ?duration,
            "Punishment issued"
        );

        let audit_reason = match duration {
            Some(seconds) => format!("{} (Duration: {})", record.reason, clock::format(seconds)),
            None => record.reason.clone(),
        };
        self.audit(kind.traits().audit_label, &request.operator, subject, audit_reason)
            .await;

        self.notifiers.publish(&PunishmentEvent::Issued {
            punishment: record.with_id(id),
            operator: request.operator,
        });
        Ok(id)
    }

    async fn check_conflict(
        &self,
        subject: &str,
        class: ConflictClass,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let records = self.bounded(self.store.find_active_by_subject(subject)).await?;
        for record in records
            .iter()
            .filter(|r| r.kind.conflict_class() == Some(class))
        {
            match record.state(now) {
                PunishmentState::Active => {
                    info!(
                        target: ENGINE_TARGET,
                        subject = %subject,
                        class = %class,
                        existing = %record.id,
                        "Refused punishment: already punished"
                    );
                    return Err(EngineError::AlreadyPunished {
                        subject: subject.to_string(),
                        class,
                        existing: record.id,
                    });
                }
                PunishmentState::ExpiredUnswept => self.sweep(record).await,
                PunishmentState::Inactive => {}
            }
        }
        Ok(())
    }

    /// Mark an expired record inactive.
    ///
    /// A failed write leaves the row `active` past its end. `state()` already
    /// reads it as expired, so it never blocks, and the next read of the
    /// subject (gate or conflict check) tries the sweep again.
    async fn sweep(&self, record: &Punishment) {
        match self.bounded(self.store.expire(record.id)).await {
            Ok(true) => info!(
                target: ENGINE_TARGET,
                punishment_id = %record.id,
                subject = %record.subject,
                kind = %record.kind,
                "Punishment expired"
            ),
            Ok(false) => {}
            Err(e) => warn!(
                target: ENGINE_TARGET,
                punishment_id = %record.id,
                error = %e,
                "Failed to mark expired punishment inactive"
            ),
        }
    }

    async fn lift(
        &self,
        subject: &str,
        kinds: &[PunishmentKind],
        action: &str,
        operator: &Operator,
    ) -> EngineResult<ReverseOutcome> {
        let now = self.clock.now();
        let mut lifted = 0;
        for kind in kinds {
            lifted += self
                .bounded(self.store.deactivate(subject, *kind, now))
                .await?;
        }

        if lifted == 0 {
            info!(
                target: ENGINE_TARGET,
                subject = %subject,
                action = %action,
                "Nothing to reverse"
            );
            return Ok(ReverseOutcome::NothingToReverse);
        }

        info!(
            target: ENGINE_TARGET,
            subject = %subject,
            action = %action,
            lifted = lifted,
            operator = %operator.name,
            "Punishment reversed"
        );

        let unmuted = kinds
            .iter()
            .any(|k| k.conflict_class() == Some(ConflictClass::Mute));
        if unmuted && self.presence.find_online(subject).is_some() {
            let notice = Effect::Message {
                subject: subject.to_string(),
                text: self.messages.get("player_messages.unmuted", &[]),
            };
            if let Err(e) = self.effects.dispatch(vec![notice]).await {
                warn!(target: ENGINE_TARGET, subject = %subject, error = %e, "Failed to tell subject about unmute");
            }
        }

        self.audit(action, operator, subject, format!("Lifted by {}", operator.name))
            .await;
        self.notifiers.publish(&PunishmentEvent::Reversed {
            subject: subject.to_string(),
            action: action.to_string(),
            kinds: kinds.to_vec(),
            operator: operator.clone(),
            lifted,
        });
        Ok(ReverseOutcome::Reversed(lifted))
    }

    async fn audit(&self, action: &str, operator: &Operator, subject: &str, reason: String) {
        let entry = AuditEntry {
            action: action.to_string(),
            operator: operator.name.clone(),
            target: subject.to_string(),
            reason,
            source: operator.source,
            timestamp: self.clock.now(),
        };
        info!(
            target: AUDIT_TARGET,
            action = %entry.action,
            operator = %entry.operator,
            subject = %entry.target,
            reason = %entry.reason,
            source = %entry.source,
            "Action logged"
        );
        if let Err(e) = self.bounded(self.store.append_audit_entry(entry)).await {
            warn!(
                target: ENGINE_TARGET,
                action = %action,
                subject = %subject,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    fn reason_or_placeholder(&self, reason: Option<&str>) -> String {
        match reason.map(str::trim) {
            Some(reason) if !reason.is_empty() => reason.to_string(),
            _ => self.messages.no_reason(),
        }
    }

    fn issue_effects(&self, record: &NewPunishment, online: bool) -> Vec<Effect> {
        let kind = record.kind;
        let time = record.duration_seconds.map(clock::format).unwrap_or_default();
        let vars = [
            ("player", record.subject.as_str()),
            ("reason", record.reason.as_str()),
            ("operator", record.operator.as_str()),
            ("time", time.as_str()),
        ];

        let mut effects = Vec::with_capacity(2);
        if online {
            if let Some(key) = messages::direct_message_key(kind) {
                effects.push(Effect::Message {
                    subject: record.subject.clone(),
                    text: self.messages.get(key, &vars),
                });
            } else {
                let headline = self
                    .messages
                    .get(messages::removal_headline_key(kind), &vars);
                let duration = (!time.is_empty()).then_some(time.as_str());
                effects.push(Effect::Disconnect {
                    subject: record.subject.clone(),
                    screen: self.messages.disconnect_screen(
                        &headline,
                        &record.reason,
                        &record.operator,
                        duration,
                    ),
                });
            }
        }
        effects.push(Effect::Broadcast {
            text: self.messages.get(messages::broadcast_key(kind), &vars),
        });
        effects
    }
}
