//! Workspace access control
//!
//! Permissions are totally ordered. A caller's effective permission on a
//! workspace is the higher of their own ACL entry and the `*` entry, which
//! may only ever hold READ or NONE.

use crate::error::{AuthorizationError, Result, WorkspaceError};
use crate::ids::WorkspaceUser;
use serde::{Deserialize, Serialize};

/// Access level on a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    None,
    Read,
    Write,
    Admin,
    Owner,
}

impl Permission {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Admin => 3,
            Self::Owner => 4,
        }
    }

    pub fn from_i64(i: i64) -> Result<Self> {
        Ok(match i {
            0 => Self::None,
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Admin,
            4 => Self::Owner,
            other => {
                return Err(WorkspaceError::Communication(format!(
                    "Invalid stored permission value {}",
                    other
                )))
            }
        })
    }
}

/// Permissions a caller holds on one workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSet {
    /// The caller's own ACL entry, NONE when absent or anonymous
    pub user: Permission,
    /// The `*` entry
    pub global: Permission,
}

impl PermissionSet {
    pub const NONE: Self = Self {
        user: Permission::None,
        global: Permission::None,
    };

    pub fn effective(&self) -> Permission {
        self.user.max(self.global)
    }

    pub fn global_read(&self) -> bool {
        self.global >= Permission::Read
    }
}

/// Verbs used in authorization messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    SetPermissions,
    SetGlobalPermission,
    SetDescription,
    AlterMetadata,
    DeleteObjects,
    UndeleteObjects,
    HideObjects,
    UnhideObjects,
    RenameObjects,
    RenameWorkspace,
    DeleteWorkspace,
    UndeleteWorkspace,
    Lock,
}

impl Operation {
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write to",
            Self::SetPermissions => "set permissions on",
            Self::SetGlobalPermission => "set global permission on",
            Self::SetDescription => "set description on",
            Self::AlterMetadata => "alter metadata for",
            Self::DeleteObjects => "delete objects from",
            Self::UndeleteObjects => "undelete objects from",
            Self::HideObjects => "hide objects from",
            Self::UnhideObjects => "unhide objects from",
            Self::RenameObjects => "rename objects in",
            Self::RenameWorkspace => "rename",
            Self::DeleteWorkspace => "delete",
            Self::UndeleteWorkspace => "undelete",
            Self::Lock => "lock",
        }
    }

    /// Minimum effective permission the operation needs
    pub fn required(self) -> Permission {
        match self {
            Self::Read => Permission::Read,
            Self::Write
            | Self::DeleteObjects
            | Self::UndeleteObjects
            | Self::HideObjects
            | Self::UnhideObjects
            | Self::RenameObjects => Permission::Write,
            Self::SetPermissions | Self::SetDescription | Self::AlterMetadata => Permission::Admin,
            Self::SetGlobalPermission
            | Self::RenameWorkspace
            | Self::DeleteWorkspace
            | Self::UndeleteWorkspace
            | Self::Lock => Permission::Owner,
        }
    }
}

fn denied(user: Option<&WorkspaceUser>, op: &str, workspace: &str) -> AuthorizationError {
    match user {
        None => AuthorizationError::Anonymous {
            operation: op.to_string(),
            workspace: workspace.to_string(),
        },
        Some(u) => AuthorizationError::User {
            user: u.to_string(),
            operation: op.to_string(),
            workspace: workspace.to_string(),
        },
    }
}

/// Fails unless `held` satisfies `op`
pub fn authorize(
    user: Option<&WorkspaceUser>,
    held: Permission,
    op: Operation,
    workspace: &str,
) -> Result<()> {
    if held < op.required() {
        return Err(denied(user, op.phrase(), workspace).into());
    }
    Ok(())
}

/// Checks a setPermissions request against the caller's own permission.
///
/// Callers below ADMIN may only lower their own explicit entry; the global
/// grant does not count toward what they may set.
pub fn check_set_permissions(
    caller: Option<&WorkspaceUser>,
    held: PermissionSet,
    targets: &[WorkspaceUser],
    requested: Permission,
    workspace: &str,
) -> Result<()> {
    if targets.is_empty() {
        return Err(WorkspaceError::illegal("The users list may not be null or empty"));
    }
    if requested == Permission::Owner {
        return Err(WorkspaceError::illegal("Cannot set owner permission"));
    }
    let caller = match caller {
        None => return Err(denied(None, Operation::SetPermissions.phrase(), workspace).into()),
        Some(c) => c,
    };
    if held.effective() >= Permission::Admin {
        return Ok(());
    }
    if held.effective() < Permission::Read {
        return Err(denied(Some(caller), Operation::SetPermissions.phrase(), workspace).into());
    }
    if targets.len() != 1 || &targets[0] != caller {
        return Err(denied(
            Some(caller),
            "alter other user's permissions on",
            workspace,
        )
        .into());
    }
    if requested > held.user {
        return Err(denied(Some(caller), "only reduce their permission level on", workspace)
            .into());
    }
    Ok(())
}

/// Fails unless `requested` is a legal global grant
pub fn check_global_permission(requested: Permission) -> Result<()> {
    if requested > Permission::Read {
        return Err(WorkspaceError::illegal("Global permissions cannot be greater than read"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> WorkspaceUser {
        WorkspaceUser::new(name).unwrap()
    }

    #[test]
    fn test_effective_is_max() {
        let set = PermissionSet { user: Permission::None, global: Permission::Read };
        assert_eq!(set.effective(), Permission::Read);
        let set = PermissionSet { user: Permission::Admin, global: Permission::Read };
        assert_eq!(set.effective(), Permission::Admin);
        assert!(set.global_read());
    }

    #[test]
    fn test_ordering_round_trip() {
        let all = [
            Permission::None,
            Permission::Read,
            Permission::Write,
            Permission::Admin,
            Permission::Owner,
        ];
        for w in all.windows(2) {
            assert!(w[0] < w[1]);
        }
        for p in all {
            assert_eq!(Permission::from_i64(p.as_i64()).unwrap(), p);
        }
        assert!(Permission::from_i64(9).is_err());
    }

    #[test]
    fn test_authorize_messages() {
        let b = user("b");
        let e = authorize(Some(&b), Permission::None, Operation::Read, "lt").unwrap_err();
        assert_eq!(e.to_string(), "User b may not read workspace lt");
        let e = authorize(None, Permission::Read, Operation::SetDescription, "lt").unwrap_err();
        assert_eq!(e.to_string(), "Anonymous users may not set description on workspace lt");
        assert!(authorize(Some(&b), Permission::Write, Operation::Write, "lt").is_ok());
    }

    #[test]
    fn test_set_permissions_rules() {
        let b = user("b");
        let c = user("c");
        let msg = |r: Result<()>| r.unwrap_err().to_string();
        let own = |user| PermissionSet { user, global: Permission::None };

        assert_eq!(
            msg(check_set_permissions(Some(&b), own(Permission::Admin), &[], Permission::Read, "ws")),
            "The users list may not be null or empty"
        );
        assert_eq!(
            msg(check_set_permissions(Some(&b), own(Permission::Owner), &[c.clone()], Permission::Owner, "ws")),
            "Cannot set owner permission"
        );
        assert_eq!(
            msg(check_set_permissions(None, own(Permission::Read), &[c.clone()], Permission::Read, "ws")),
            "Anonymous users may not set permissions on workspace ws"
        );
        assert_eq!(
            msg(check_set_permissions(Some(&b), own(Permission::None), &[b.clone()], Permission::None, "ws")),
            "User b may not set permissions on workspace ws"
        );
        assert_eq!(
            msg(check_set_permissions(Some(&b), own(Permission::Write), &[c.clone()], Permission::Read, "ws")),
            "User b may not alter other user's permissions on workspace ws"
        );
        assert_eq!(
            msg(check_set_permissions(Some(&b), own(Permission::Read), &[b.clone()], Permission::Write, "ws")),
            "User b may only reduce their permission level on workspace ws"
        );
        assert!(check_set_permissions(Some(&b), own(Permission::Write), &[b.clone()], Permission::Read, "ws").is_ok());
        assert!(check_set_permissions(Some(&b), own(Permission::Admin), &[c], Permission::Write, "ws").is_ok());

        let global_only = PermissionSet { user: Permission::None, global: Permission::Read };
        assert_eq!(
            msg(check_set_permissions(Some(&b), global_only, &[b.clone()], Permission::Read, "ws")),
            "User b may only reduce their permission level on workspace ws"
        );
        assert!(check_set_permissions(Some(&b), global_only, &[b.clone()], Permission::None, "ws").is_ok());
    }

    #[test]
    fn test_global_permission_bound() {
        assert!(check_global_permission(Permission::Read).is_ok());
        assert!(check_global_permission(Permission::None).is_ok());
        assert_eq!(
            check_global_permission(Permission::Write).unwrap_err().to_string(),
            "Global permissions cannot be greater than read"
        );
    }
}
