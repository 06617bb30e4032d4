//! Punishment kinds and the rules attached to each of them
//!
//! Everything the engine needs to know about a kind lives in one table, so
//! adding a kind means adding a row rather than another `match` arm in every
//! call site.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of disciplinary action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentKind {
    Kick,
    Ban,
    Tempban,
    Ipban,
    Tempipban,
    Mute,
    Tempmute,
    Warn,
}

/// Kinds that exclude each other while one of them is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictClass {
    Ban,
    Mute,
}

/// Which protection flag shields a subject from a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionFlag {
    Kick,
    Ban,
    Mute,
}

/// Static rules for one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTraits {
    pub conflict_class: Option<ConflictClass>,
    /// Issuing fails unless the subject is online
    pub requires_online: bool,
    pub protection: Option<ProtectionFlag>,
    /// Requires a positive duration and gets an `end`
    pub time_boxed: bool,
    /// Recorded inactive from the start and never blocks anything
    pub transient: bool,
    /// Also matched against the subject's last known address
    pub address_scoped: bool,
    pub permission_node: &'static str,
    pub audit_label: &'static str,
}

static KIND_TABLE: [KindTraits; 8] = [
    // Kick
    KindTraits {
        conflict_class: None,
        requires_online: true,
        protection: Some(ProtectionFlag::Kick),
        time_boxed: false,
        transient: true,
        address_scoped: false,
        permission_node: "solacecore.kick",
        audit_label: "KICK",
    },
    // Ban
    KindTraits {
        conflict_class: Some(ConflictClass::Ban),
        requires_online: false,
        protection: Some(ProtectionFlag::Ban),
        time_boxed: false,
        transient: false,
        address_scoped: false,
        permission_node: "solacecore.ban",
        audit_label: "BAN",
    },
    // Tempban
    KindTraits {
        conflict_class: Some(ConflictClass::Ban),
        requires_online: false,
        protection: Some(ProtectionFlag::Ban),
        time_boxed: true,
        transient: false,
        address_scoped: false,
        permission_node: "solacecore.tempban",
        audit_label: "TEMPBAN",
    },
    // Ipban
    KindTraits {
        conflict_class: Some(ConflictClass::Ban),
        requires_online: false,
        protection: Some(ProtectionFlag::Ban),
        time_boxed: false,
        transient: false,
        address_scoped: true,
        permission_node: "solacecore.ipban",
        audit_label: "IPBAN",
    },
    // Tempipban
    KindTraits {
        conflict_class: Some(ConflictClass::Ban),
        requires_online: false,
        protection: Some(ProtectionFlag::Ban),
        time_boxed: true,
        transient: false,
        address_scoped: true,
        permission_node: "solacecore.tempipban",
        audit_label: "TEMPIPBAN",
    },
    // Mute
    KindTraits {
        conflict_class: Some(ConflictClass::Mute),
        requires_online: true,
        protection: Some(ProtectionFlag::Mute),
        time_boxed: false,
        transient: false,
        address_scoped: false,
        permission_node: "solacecore.mute",
        audit_label: "MUTE",
    },
    // Tempmute
    KindTraits {
        conflict_class: Some(ConflictClass::Mute),
        requires_online: true,
        protection: Some(ProtectionFlag::Mute),
        time_boxed: true,
        transient: false,
        address_scoped: false,
        permission_node: "solacecore.tempmute",
        audit_label: "TEMPMUTE",
    },
    // Warn
    KindTraits {
        conflict_class: None,
        requires_online: true,
        protection: None,
        time_boxed: false,
        transient: false,
        address_scoped: false,
        permission_node: "solacecore.warn",
        audit_label: "WARN",
    },
];

impl PunishmentKind {
    pub const ALL: [Self; 8] = [
        Self::Kick,
        Self::Ban,
        Self::Tempban,
        Self::Ipban,
        Self::Tempipban,
        Self::Mute,
        Self::Tempmute,
        Self::Warn,
    ];

    /// Rules for this kind
    #[must_use]
    pub fn traits(self) -> &'static KindTraits {
        &KIND_TABLE[self as usize]
    }

    #[must_use]
    pub fn conflict_class(self) -> Option<ConflictClass> {
        self.traits().conflict_class
    }

    #[must_use]
    pub fn is_time_boxed(self) -> bool {
        self.traits().time_boxed
    }

    /// Lowercase name used in storage and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Tempban => "tempban",
            Self::Ipban => "ipban",
            Self::Tempipban => "tempipban",
            Self::Mute => "mute",
            Self::Tempmute => "tempmute",
            Self::Warn => "warn",
        }
    }
}

impl fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised for a kind name nobody knows
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown punishment kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for PunishmentKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

impl ConflictClass {
    /// Kinds belonging to this class
    #[must_use]
    pub const fn members(self) -> &'static [PunishmentKind] {
        match self {
            Self::Ban => &[
                PunishmentKind::Ban,
                PunishmentKind::Tempban,
                PunishmentKind::Ipban,
                PunishmentKind::Tempipban,
            ],
            Self::Mute => &[PunishmentKind::Mute, PunishmentKind::Tempmute],
        }
    }

    /// Audit label written when the whole class is lifted
    #[must_use]
    pub const fn reversal_label(self) -> &'static str {
        match self {
            Self::Ban => "UNBAN",
            Self::Mute => "UNMUTE",
        }
    }

    #[must_use]
    pub const fn reversal_permission(self) -> &'static str {
        match self {
            Self::Ban => "solacecore.unban",
            Self::Mute => "solacecore.unmute",
        }
    }
}

impl fmt::Display for ConflictClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ban => write!(f, "ban"),
            Self::Mute => write!(f, "mute"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows_line_up_with_kinds() {
        for kind in PunishmentKind::ALL {
            let traits = kind.traits();
            assert_eq!(traits.permission_node, format!("solacecore.{kind}"));
            assert_eq!(traits.audit_label, kind.as_str().to_uppercase());
        }
    }

    #[test]
    fn test_conflict_classes() {
        for kind in ConflictClass::Ban.members() {
            assert_eq!(kind.conflict_class(), Some(ConflictClass::Ban));
        }
        for kind in ConflictClass::Mute.members() {
            assert_eq!(kind.conflict_class(), Some(ConflictClass::Mute));
        }
        assert_eq!(PunishmentKind::Kick.conflict_class(), None);
        assert_eq!(PunishmentKind::Warn.conflict_class(), None);
    }

    #[test]
    fn test_online_and_time_rules() {
        let online: Vec<_> = PunishmentKind::ALL
            .into_iter()
            .filter(|k| k.traits().requires_online)
            .collect();
        assert_eq!(
            online,
            vec![
                PunishmentKind::Kick,
                PunishmentKind::Mute,
                PunishmentKind::Tempmute,
                PunishmentKind::Warn
            ]
        );

        let timed: Vec<_> = PunishmentKind::ALL
            .into_iter()
            .filter(|k| k.is_time_boxed())
            .collect();
        assert_eq!(
            timed,
            vec![
                PunishmentKind::Tempban,
                PunishmentKind::Tempipban,
                PunishmentKind::Tempmute
            ]
        );
        assert!(PunishmentKind::Kick.traits().transient);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("tempipban".parse(), Ok(PunishmentKind::Tempipban));
        assert_eq!(PunishmentKind::Tempmute.to_string(), "tempmute");
        assert_eq!(
            "Ban".parse::<PunishmentKind>(),
            Err(UnknownKind("Ban".to_string()))
        );
    }
}
