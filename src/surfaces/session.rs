//! Composition sessions
//!
//! A menu-driven flow collects the target, kind, reason and duration over
//! several interactions. Each operator has at most one session in flight;
//! a session left untouched longer than the TTL is dropped.

use crate::clock::{self, Clock, ParseError};
use crate::punishment::{Operator, PunishmentKind, PunishmentRequest};
use crate::ENGINE_TARGET;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No punishment is being composed")]
    NoSession,

    #[error("The punishment menu timed out")]
    Expired,

    #[error("Invalid time: {0}")]
    Parse(#[from] ParseError),

    #[error("{0} does not take a duration")]
    NotTimeBoxed(PunishmentKind),

    #[error("{0} needs a duration")]
    MissingDuration(PunishmentKind),
}

/// One half-composed punishment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub operator: Operator,
    pub target: String,
    pub kind: PunishmentKind,
    pub reason: Option<String>,
    pub duration_seconds: Option<i64>,
    touched: DateTime<Utc>,
}

/// Pending sessions keyed by operator name
#[derive(Clone)]
pub struct SessionBook {
    sessions: Arc<DashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionBook {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            clock,
            ttl,
        }
    }

    fn is_stale(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(session.touched);
        idle.to_std().is_ok_and(|idle| idle > self.ttl)
    }

    /// Start a session, replacing whatever the operator had pending
    pub fn begin(&self, operator: Operator, target: impl Into<String>, kind: PunishmentKind) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session {
            id,
            target: target.into(),
            kind,
            reason: None,
            duration_seconds: None,
            touched: self.clock.now(),
            operator,
        };
        debug!(
            target: ENGINE_TARGET,
            session_id = %id,
            operator = %session.operator.name,
            subject = %session.target,
            kind = %kind,
            "Composition started"
        );
        self.sessions.insert(session.operator.name.clone(), session);
        id
    }

    fn update<T>(
        &self,
        operator: &str,
        apply: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let now = self.clock.now();
        let mut entry = self
            .sessions
            .get_mut(operator)
            .ok_or(SessionError::NoSession)?;
        if self.is_stale(&entry, now) {
            drop(entry);
            self.sessions.remove(operator);
            return Err(SessionError::Expired);
        }
        let value = apply(&mut entry)?;
        entry.touched = now;
        Ok(value)
    }

    pub fn set_reason(&self, operator: &str, reason: impl Into<String>) -> Result<(), SessionError> {
        let reason = reason.into();
        self.update(operator, |session| {
            session.reason = Some(reason);
            Ok(())
        })
    }

    /// Parse and store a duration. Returns the seconds accepted.
    pub fn set_duration_text(&self, operator: &str, text: &str) -> Result<i64, SessionError> {
        self.update(operator, |session| {
            if !session.kind.is_time_boxed() {
                return Err(SessionError::NotTimeBoxed(session.kind));
            }
            let seconds = clock::parse(text)?;
            session.duration_seconds = Some(seconds);
            Ok(seconds)
        })
    }

    /// Current state of the operator's session
    #[must_use]
    pub fn peek(&self, operator: &str) -> Option<Session> {
        let session = self.sessions.get(operator)?.clone();
        (!self.is_stale(&session, self.clock.now())).then_some(session)
    }

    /// Finish the session and produce the request to issue
    pub fn take(&self, operator: &str) -> Result<PunishmentRequest, SessionError> {
        self.update(operator, |session| {
            if session.kind.is_time_boxed() && session.duration_seconds.is_none() {
                return Err(SessionError::MissingDuration(session.kind));
            }
            Ok(())
        })?;
        let (_, session) = self
            .sessions
            .remove(operator)
            .ok_or(SessionError::NoSession)?;

        let mut request =
            PunishmentRequest::new(session.kind, session.target, session.operator);
        request.reason = session.reason;
        request.duration_seconds = session.duration_seconds;
        Ok(request)
    }

    pub fn cancel(&self, operator: &str) -> bool {
        self.sessions.remove(operator).is_some()
    }

    /// Drop every session, e.g. on shutdown
    pub fn cancel_all(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }

    /// Drop sessions past their TTL
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !self.is_stale(session, now));
        before - self.sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
