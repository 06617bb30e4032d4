//! Punishment lifecycle
//!
//! Records and kinds, the store contract with its in-memory and SQLite
//! backends, the engine that issues and lifts punishments, and the gates that
//! enforce them on connection and chat.

mod effects;
mod engine;
mod error;
mod gates;
mod kind;
mod notify;
mod protection;
mod record;
mod sqlite;
mod store;

#[cfg(test)]
pub use effects::{MockGameServer, MockPresence};
pub use effects::{
    Effect, EffectDispatcher, GameServer, MainLoop, OnlineSubject, Presence,
    channel as effect_channel,
};
#[cfg(test)]
pub(crate) use engine::tests as test_support;
pub use engine::{EngineBuilder, PunishmentEngine, ReverseOutcome};
pub use error::{
    EffectError, EngineError, EngineResult, NotifyError, StorageError, StorageResult,
};
pub use gates::{ChatVerdict, ConnectionAttempt, ConnectionVerdict, EnforcementGates};
pub use kind::{ConflictClass, KindTraits, ProtectionFlag, PunishmentKind, UnknownKind};
#[cfg(test)]
pub use notify::MockNotifier;
pub use notify::{Notifier, NotifierRegistry, PunishmentEvent};
pub use protection::{
    BAN_PROTECTION_NODE, KICK_PROTECTION_NODE, MUTE_PROTECTION_NODE, ProtectionFlags,
    is_protected,
};
pub use record::{
    AuditEntry, NewPunishment, Operator, Punishment, PunishmentId, PunishmentRequest,
    PunishmentState, Source, SubjectEntry, sort_for_listing,
};
pub use sqlite::{PoolSettings, SqliteStore};
#[cfg(test)]
pub use store::MockPunishmentStore;
pub use store::{MemoryStore, PunishmentStore, bounded};
