//! Participant permission set.
//!
//! Permissions are a small bitfield with named bundles, so grants and
//! revocations are defined in one place. On the wire they serialize as
//! named booleans.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Bitfield of participant permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "PermissionFlags", into = "PermissionFlags")]
pub struct Permissions(u8);

impl Permissions {
    /// No permissions.
    pub const NONE: Permissions = Permissions(0);
    /// Co-host authority (moderation, admission, breakout control).
    pub const CO_HOST: Permissions = Permissions(0b0001);
    /// May start a screen share.
    pub const SHARE_SCREEN: Permissions = Permissions(0b0010);
    /// May start and stop recording.
    pub const RECORD: Permissions = Permissions(0b0100);
    /// May draw on the shared whiteboard.
    pub const WHITEBOARD: Permissions = Permissions(0b1000);

    /// Granted together when a participant is made co-host.
    pub const CO_HOST_BUNDLE: Permissions =
        Permissions(Self::CO_HOST.0 | Self::SHARE_SCREEN.0 | Self::RECORD.0 | Self::WHITEBOARD.0);

    /// Permissions of the host's own participant record.
    pub const HOST_DEFAULT: Permissions = Self::CO_HOST_BUNDLE;

    /// Default permissions of ordinary attendees.
    pub const ATTENDEE_DEFAULT: Permissions =
        Permissions(Self::SHARE_SCREEN.0 | Self::WHITEBOARD.0);

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set every flag in `other`.
    pub fn insert(&mut self, other: Permissions) {
        self.0 |= other.0;
    }

    /// Clear every flag in `other`.
    pub fn remove(&mut self, other: Permissions) {
        self.0 &= !other.0;
    }

    /// Set or clear `other` depending on `enabled`.
    pub fn set(&mut self, other: Permissions, enabled: bool) {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    #[must_use]
    pub const fn is_co_host(self) -> bool {
        self.contains(Self::CO_HOST)
    }

    #[must_use]
    pub const fn can_share_screen(self) -> bool {
        self.contains(Self::SHARE_SCREEN)
    }

    #[must_use]
    pub const fn can_record(self) -> bool {
        self.contains(Self::RECORD)
    }

    #[must_use]
    pub const fn can_use_whiteboard(self) -> bool {
        self.contains(Self::WHITEBOARD)
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Permissions) {
        self.0 |= rhs.0;
    }
}

/// Wire representation of [`Permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionFlags {
    #[serde(default)]
    pub co_host: bool,
    #[serde(default)]
    pub can_share_screen: bool,
    #[serde(default)]
    pub can_record: bool,
    #[serde(default)]
    pub can_use_whiteboard: bool,
}

impl From<PermissionFlags> for Permissions {
    fn from(flags: PermissionFlags) -> Self {
        let mut permissions = Permissions::NONE;
        permissions.set(Permissions::CO_HOST, flags.co_host);
        permissions.set(Permissions::SHARE_SCREEN, flags.can_share_screen);
        permissions.set(Permissions::RECORD, flags.can_record);
        permissions.set(Permissions::WHITEBOARD, flags.can_use_whiteboard);
        permissions
    }
}

impl From<Permissions> for PermissionFlags {
    fn from(permissions: Permissions) -> Self {
        PermissionFlags {
            co_host: permissions.is_co_host(),
            can_share_screen: permissions.can_share_screen(),
            can_record: permissions.can_record(),
            can_use_whiteboard: permissions.can_use_whiteboard(),
        }
    }
}

/// Individual grant/revoke request; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PermissionUpdate {
    pub can_share_screen: Option<bool>,
    pub can_record: Option<bool>,
    pub can_use_whiteboard: Option<bool>,
}

impl PermissionUpdate {
    /// Apply the update to a permission set.
    pub fn apply_to(&self, permissions: &mut Permissions) {
        if let Some(enabled) = self.can_share_screen {
            permissions.set(Permissions::SHARE_SCREEN, enabled);
        }
        if let Some(enabled) = self.can_record {
            permissions.set(Permissions::RECORD, enabled);
        }
        if let Some(enabled) = self.can_use_whiteboard {
            permissions.set(Permissions::WHITEBOARD, enabled);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.can_share_screen.is_none()
            && self.can_record.is_none()
            && self.can_use_whiteboard.is_none()
    }
}
