//! Protection policy
//!
//! Subjects can hold one flag per protectable class. The policy is a pure
//! function of those flags and the requested kind.

use crate::punishment::{ProtectionFlag, PunishmentKind};
use serde::{Deserialize, Serialize};

pub const KICK_PROTECTION_NODE: &str = "solacecore.kickprotection";
pub const BAN_PROTECTION_NODE: &str = "solacecore.banprotection";
pub const MUTE_PROTECTION_NODE: &str = "solacecore.muteprotection";

/// Protection flags held by a subject
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionFlags {
    pub kick: bool,
    pub ban: bool,
    pub mute: bool,
}

impl ProtectionFlags {
    pub const NONE: Self = Self {
        kick: false,
        ban: false,
        mute: false,
    };

    pub const ALL: Self = Self {
        kick: true,
        ban: true,
        mute: true,
    };

    /// Build flags from a permission lookup
    pub fn from_permissions(has_permission: impl Fn(&str) -> bool) -> Self {
        Self {
            kick: has_permission(KICK_PROTECTION_NODE),
            ban: has_permission(BAN_PROTECTION_NODE),
            mute: has_permission(MUTE_PROTECTION_NODE),
        }
    }
}

/// Whether `flags` shield a subject from `kind`. Warnings are never blocked.
#[must_use]
pub fn is_protected(flags: ProtectionFlags, kind: PunishmentKind) -> bool {
    match kind.traits().protection {
        Some(ProtectionFlag::Kick) => flags.kick,
        Some(ProtectionFlag::Ban) => flags.ban,
        Some(ProtectionFlag::Mute) => flags.mute,
        None => false,
    }
}
