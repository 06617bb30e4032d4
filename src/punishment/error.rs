//! Error types for the punishment system

use crate::clock::ParseError;
use crate::punishment::{ConflictClass, PunishmentId, PunishmentKind};
use std::time::Duration;
use thiserror::Error;

/// Failures of the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Driver or pool error, pool exhaustion included
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage request timed out after {0:?}")]
    Timeout(Duration),

    /// A stored row could not be turned back into a record
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Everything `issue` and `reverse` can refuse with
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{subject} is not online")]
    SubjectUnreachable { subject: String },

    #[error("{subject} is protected from {kind}")]
    Protected {
        subject: String,
        kind: PunishmentKind,
    },

    #[error("{subject} already has an active {class} punishment (#{existing})")]
    AlreadyPunished {
        subject: String,
        class: ConflictClass,
        existing: PunishmentId,
    },

    #[error("{kind} needs a positive duration")]
    InvalidDuration { kind: PunishmentKind },

    #[error("Invalid time: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The admitted task died before reporting back
    #[error("Engine task failed: {0}")]
    Internal(String),
}

/// Failures handing side effects to the main loop
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EffectError {
    #[error("Main loop is not running")]
    LoopClosed,

    #[error("Main loop did not acknowledge within {0:?}")]
    AckTimeout(Duration),
}

/// Failures of an external notification sink
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    #[error("Notifier error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for NotifyError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for NotifyError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::SubjectUnreachable {
            subject: "Carl".to_string(),
        };
        assert_eq!(error.to_string(), "Carl is not online");

        let error = EngineError::AlreadyPunished {
            subject: "Bob".to_string(),
            class: ConflictClass::Ban,
            existing: PunishmentId(3),
        };
        assert_eq!(
            error.to_string(),
            "Bob already has an active ban punishment (#3)"
        );

        let error = EngineError::from(StorageError::Timeout(Duration::from_millis(250)));
        assert_eq!(
            error.to_string(),
            "Storage error: Storage request timed out after 250ms"
        );

        let error = EngineError::from(ParseError::UnknownUnit('x'));
        assert_eq!(error.to_string(), "Invalid time: Unknown duration unit 'x'");

        let error = NotifyError::from("webhook down".to_string());
        assert_eq!(error.to_string(), "Notifier error: webhook down");
    }
}
