//! Punishment records and the requests that create them
//!
//! A record is only ever written once by the engine. Afterwards the store may
//! flip `active` to false and fill a missing `end`; nothing else changes and
//! nothing is deleted.

use crate::clock;
use crate::punishment::PunishmentKind;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Store-assigned record id
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
pub struct PunishmentId(pub i64);

/// Where an action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Ingame,
    Discord,
    Socket,
    Console,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ingame => "ingame",
            Self::Discord => "discord",
            Self::Socket => "socket",
            Self::Console => "console",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whoever issued or lifted a punishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    pub source: Source,
}

impl Operator {
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// The server console acting on its own
    #[must_use]
    pub fn console() -> Self {
        Self::new("Console", Source::Console)
    }
}

/// Lifecycle position derived from `(active, end, duration)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunishmentState {
    Active,
    /// Still flagged active, but its end has passed
    ExpiredUnswept,
    Inactive,
}

impl fmt::Display for PunishmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::ExpiredUnswept => write!(f, "Expired"),
            Self::Inactive => write!(f, "Inactive"),
        }
    }
}

/// A persisted punishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punishment {
    pub id: PunishmentId,
    /// Case-sensitive subject name
    pub subject: String,
    pub reason: String,
    pub operator: String,
    pub kind: PunishmentKind,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Present exactly for time-boxed kinds
    pub duration_seconds: Option<i64>,
    pub active: bool,
}

impl Punishment {
    /// When a time-boxed record stops applying.
    ///
    /// Falls back to `start + duration` for rows written without an `end`.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.kind.is_time_boxed() {
            return None;
        }
        self.end.or_else(|| {
            let start = self.start?;
            clock::add_seconds(start, self.duration_seconds?)
        })
    }

    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> PunishmentState {
        if !self.active {
            return PunishmentState::Inactive;
        }
        match self.expires_at() {
            Some(end) if end <= now => PunishmentState::ExpiredUnswept,
            _ => PunishmentState::Active,
        }
    }

    /// Seconds until expiry, `None` for permanent records
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at()
            .map(|end| clock::remaining_seconds(now, end))
    }

    /// Newest first, records without a start last, ties broken by id descending
    #[must_use]
    pub fn listing_order(a: &Self, b: &Self) -> Ordering {
        match (a.start, b.start) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| b.id.cmp(&a.id))
    }
}

/// Sort records for display
pub fn sort_for_listing(records: &mut [Punishment]) {
    records.sort_by(Punishment::listing_order);
}

/// A record about to be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPunishment {
    pub subject: String,
    pub reason: String,
    pub operator: String,
    pub kind: PunishmentKind,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub active: bool,
}

impl NewPunishment {
    #[must_use]
    pub fn with_id(self, id: PunishmentId) -> Punishment {
        Punishment {
            id,
            subject: self.subject,
            reason: self.reason,
            operator: self.operator,
            kind: self.kind,
            start: self.start,
            end: self.end,
            duration_seconds: self.duration_seconds,
            active: self.active,
        }
    }
}

/// What a command surface hands to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentRequest {
    pub kind: PunishmentKind,
    pub subject: String,
    pub operator: Operator,
    /// Blank or missing reasons become the placeholder text
    pub reason: Option<String>,
    pub duration_seconds: Option<i64>,
}

impl PunishmentRequest {
    pub fn new(kind: PunishmentKind, subject: impl Into<String>, operator: Operator) -> Self {
        Self {
            kind,
            subject: subject.into(),
            operator,
            reason: None,
            duration_seconds: None,
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn duration(mut self, seconds: i64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

/// One line of the append-only action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub operator: String,
    pub target: String,
    pub reason: String,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

/// Last sighting of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectEntry {
    pub name: String,
    pub stable_id: Option<String>,
    pub address: String,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn warn(id: i64, start: Option<DateTime<Utc>>) -> Punishment {
        Punishment {
            id: PunishmentId(id),
            subject: "Dana".to_string(),
            reason: format!("warning {id}"),
            operator: "Mod".to_string(),
            kind: PunishmentKind::Warn,
            start,
            end: None,
            duration_seconds: None,
            active: true,
        }
    }

    #[test]
    fn test_listing_order() {
        let mut records = vec![
            warn(1, Some(at(3))),
            warn(2, Some(at(1))),
            warn(3, Some(at(2))),
            warn(4, None),
        ];
        sort_for_listing(&mut records);

        let ids: Vec<i64> = records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_listing_order_breaks_ties_by_id() {
        let mut records = vec![warn(5, Some(at(1))), warn(9, Some(at(1))), warn(2, None), warn(7, None)];
        sort_for_listing(&mut records);

        let ids: Vec<i64> = records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![9, 5, 7, 2]);
    }

    #[test]
    fn test_state_transitions_with_time() {
        let record = Punishment {
            kind: PunishmentKind::Tempban,
            start: Some(at(0)),
            end: Some(at(60)),
            duration_seconds: Some(60),
            ..warn(1, None)
        };

        assert_eq!(record.state(at(59)), PunishmentState::Active);
        assert_eq!(record.remaining_seconds(at(30)), Some(30));
        assert_eq!(record.state(at(60)), PunishmentState::ExpiredUnswept);
        assert_eq!(record.remaining_seconds(at(90)), Some(0));

        let lifted = Punishment {
            active: false,
            ..record
        };
        assert_eq!(lifted.state(at(0)), PunishmentState::Inactive);
    }

    #[test]
    fn test_expiry_falls_back_to_duration() {
        let record = Punishment {
            kind: PunishmentKind::Tempmute,
            start: Some(at(0)),
            end: None,
            duration_seconds: Some(120),
            ..warn(1, None)
        };
        assert_eq!(record.expires_at(), Some(at(0) + TimeDelta::seconds(120)));

        let permanent = warn(2, Some(at(0)));
        assert_eq!(permanent.expires_at(), None);
        assert_eq!(permanent.state(at(1_000_000)), PunishmentState::Active);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(PunishmentId(42).to_string(), "42");
        assert_eq!(PunishmentId::from(7), PunishmentId(7));
    }
}
