//! Workspace lock state machine
//!
//! UNLOCKED -> LOCKED via lock_workspace, LOCKED -> PUBLISHED when the owner
//! grants global read. Nothing ever moves backwards.

use crate::error::{AuthorizationError, Result, WorkspaceError};
use crate::permissions::Permission;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    Locked,
    Published,
}

impl LockState {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unlocked => 0,
            Self::Locked => 1,
            Self::Published => 2,
        }
    }

    pub fn from_i64(i: i64) -> Result<Self> {
        match i {
            0 => Ok(Self::Unlocked),
            1 => Ok(Self::Locked),
            2 => Ok(Self::Published),
            other => Err(WorkspaceError::Communication(format!(
                "Invalid stored lock state {}",
                other
            ))),
        }
    }

    pub fn is_locked(self) -> bool {
        self != Self::Unlocked
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::Published => "published",
        }
    }

    /// State after a successful lock_workspace call
    pub fn lock(self, id: i64, name: &str) -> Result<Self> {
        ensure_unlocked(self, id, name)?;
        Ok(Self::Locked)
    }

    /// State after a setGlobalPermission call, if the call is allowed at all.
    ///
    /// A locked workspace accepts exactly one call, granting READ, which
    /// publishes it.
    pub fn after_global_permission(self, requested: Permission, id: i64, name: &str) -> Result<Self> {
        match (self, requested) {
            (Self::Unlocked, _) => Ok(Self::Unlocked),
            (Self::Locked, Permission::Read) => Ok(Self::Published),
            _ => Err(locked(id, name)),
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn locked(id: i64, name: &str) -> WorkspaceError {
    AuthorizationError::Locked {
        id,
        name: name.to_string(),
    }
    .into()
}

/// Gate for every mutating operation
pub fn ensure_unlocked(state: LockState, id: i64, name: &str) -> Result<()> {
    if state.is_locked() {
        return Err(locked(id, name));
    }
    Ok(())
}
