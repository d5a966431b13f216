//! Batched identifier resolution
//!
//! Name-or-id identifiers are turned into canonical ids with at most one
//! query per table and lookup kind. Batch results are position-preserving:
//! each entry carries its own domain error so callers can pick strict or
//! tolerant handling, while the outer `Result` only reports backend failures.

use crate::db::{self, PointerRow, WorkspaceRow};
use crate::error::{Result, WorkspaceError};
use crate::ids::{ObjectIdentifier, ObjectSelector, WorkspaceIdentifier, WorkspaceUser, ALL_USERS};
use crate::lock::{ensure_unlocked, LockState};
use crate::permissions::{authorize, Operation, Permission, PermissionSet};
use rusqlite::Connection;
use std::collections::HashMap;

/// A workspace after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedWorkspace {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub deleted: bool,
    pub lock_state: LockState,
}

impl From<&WorkspaceRow> for ResolvedWorkspace {
    fn from(row: &WorkspaceRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            owner: row.owner.clone(),
            deleted: row.deleted,
            lock_state: row.lock_state,
        }
    }
}

/// An object pinned to one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedObject {
    pub workspace: ResolvedWorkspace,
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub hidden: bool,
    pub deleted: bool,
}

impl ResolvedObject {
    pub fn key(&self) -> (i64, i64, i64) {
        (self.workspace.id, self.id, self.version)
    }

    pub fn reference(&self) -> String {
        format!("{}/{}/{}", self.workspace.id, self.id, self.version)
    }
}

fn no_such_workspace(wsi: &WorkspaceIdentifier) -> WorkspaceError {
    match wsi {
        WorkspaceIdentifier::Id(id) => {
            WorkspaceError::NoSuchWorkspace(format!("No workspace with id {} exists", id))
        }
        WorkspaceIdentifier::Name(name) => {
            WorkspaceError::NoSuchWorkspace(format!("No workspace with name {} exists", name))
        }
    }
}

/// Looks up workspaces; deleted ones resolve only when `allow_deleted` is set
pub(crate) fn resolve_workspaces(
    conn: &Connection,
    wsis: &[WorkspaceIdentifier],
    allow_deleted: bool,
) -> Result<HashMap<WorkspaceIdentifier, Result<ResolvedWorkspace>>> {
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for wsi in wsis {
        match wsi {
            WorkspaceIdentifier::Id(id) => ids.push(*id),
            WorkspaceIdentifier::Name(name) => names.push(name.clone()),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    names.sort();
    names.dedup();
    let by_id = db::conn_ws_by_ids(conn, &ids)?;
    let by_name = db::conn_ws_by_names(conn, &names)?;

    let mut out = HashMap::with_capacity(wsis.len());
    for wsi in wsis {
        let row = match wsi {
            WorkspaceIdentifier::Id(id) => by_id.get(id),
            WorkspaceIdentifier::Name(name) => by_name.get(name),
        };
        let resolved = match row {
            None => Err(no_such_workspace(wsi)),
            Some(row) if row.deleted && !allow_deleted => Err(WorkspaceError::NoSuchWorkspace(
                format!("Workspace {} is deleted", wsi.identifier_string()),
            )),
            Some(row) => Ok(ResolvedWorkspace::from(row)),
        };
        out.insert(wsi.clone(), resolved);
    }
    Ok(out)
}

pub(crate) fn resolve_workspace(
    conn: &Connection,
    wsi: &WorkspaceIdentifier,
    allow_deleted: bool,
) -> Result<ResolvedWorkspace> {
    resolve_workspaces(conn, std::slice::from_ref(wsi), allow_deleted)?
        .remove(wsi)
        .unwrap_or_else(|| Err(no_such_workspace(wsi)))
}

/// Permission sets of `user` on each workspace
pub(crate) fn permissions(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    ws_ids: &[i64],
) -> Result<HashMap<i64, PermissionSet>> {
    let mut subjects = vec![ALL_USERS];
    if let Some(u) = user {
        subjects.push(u.as_str());
    }
    let mut out: HashMap<i64, PermissionSet> = ws_ids
        .iter()
        .map(|id| (*id, PermissionSet::NONE))
        .collect();
    for (ws, subject, perm) in db::conn_acl_for_workspaces(conn, ws_ids, &subjects)? {
        if let Some(set) = out.get_mut(&ws) {
            if subject == ALL_USERS {
                set.global = perm;
            } else {
                set.user = perm;
            }
        }
    }
    Ok(out)
}

pub(crate) fn permission(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    ws_id: i64,
) -> Result<PermissionSet> {
    let mut subjects = vec![ALL_USERS];
    if let Some(u) = user {
        subjects.push(u.as_str());
    }
    let held = db::conn_acl_get(conn, ws_id, &subjects)?;
    let get = |s: &str| held.get(s).copied().unwrap_or(Permission::None);
    Ok(PermissionSet {
        user: user.map(|u| get(u.as_str())).unwrap_or(Permission::None),
        global: get(ALL_USERS),
    })
}

/// Lock gate for mutations, then the permission check
pub(crate) fn check_access(
    ws: &ResolvedWorkspace,
    held: PermissionSet,
    user: Option<&WorkspaceUser>,
    op: Operation,
) -> Result<()> {
    if op != Operation::Read {
        ensure_unlocked(ws.lock_state, ws.id, &ws.name)?;
    }
    authorize(user, held.effective(), op, &ws.name)
}

/// Resolve and authorize one workspace for `op`
pub(crate) fn authorized_workspace(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    wsi: &WorkspaceIdentifier,
    op: Operation,
    allow_deleted: bool,
) -> Result<ResolvedWorkspace> {
    let ws = resolve_workspace(conn, wsi, allow_deleted)?;
    let held = permission(conn, user, ws.id)?;
    check_access(&ws, held, user, op)?;
    Ok(ws)
}

/// Resolve and authorize a set of workspaces for `op`
pub(crate) fn authorized_workspaces(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    wsis: &[WorkspaceIdentifier],
    op: Operation,
) -> Result<HashMap<WorkspaceIdentifier, Result<ResolvedWorkspace>>> {
    let mut resolved = resolve_workspaces(conn, wsis, false)?;
    let ids: Vec<i64> = resolved
        .values()
        .filter_map(|r| r.as_ref().ok().map(|ws| ws.id))
        .collect();
    let perms = permissions(conn, user, &ids)?;
    for entry in resolved.values_mut() {
        let checked = match entry {
            Ok(ws) => {
                let held = perms.get(&ws.id).copied().unwrap_or(PermissionSet::NONE);
                check_access(ws, held, user, op)
            }
            Err(_) => Ok(()),
        };
        if let Err(e) = checked {
            *entry = Err(e);
        }
    }
    Ok(resolved)
}

/// Pointer lookup inside already-resolved workspaces, one query per lookup kind
pub(crate) fn lookup_pointers(
    conn: &Connection,
    targets: &[(i64, &ObjectSelector)],
) -> Result<(HashMap<(i64, i64), PointerRow>, HashMap<(i64, String), PointerRow>)> {
    let mut ids = Vec::new();
    let mut names = Vec::new();
    for (ws, sel) in targets {
        match sel {
            ObjectSelector::Id(id) => ids.push((*ws, *id)),
            ObjectSelector::Name(name) => names.push((*ws, name.clone())),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    names.sort();
    names.dedup();
    Ok((db::conn_ptr_by_ids(conn, &ids)?, db::conn_ptr_by_names(conn, &names)?))
}

fn no_such_object(ws_id: i64, sel: &ObjectSelector) -> WorkspaceError {
    match sel {
        ObjectSelector::Id(id) => WorkspaceError::NoSuchObject(format!(
            "No object with id {} exists in workspace {}",
            id, ws_id
        )),
        ObjectSelector::Name(name) => WorkspaceError::NoSuchObject(format!(
            "No object with name {} exists in workspace {}",
            name, ws_id
        )),
    }
}

pub(crate) fn deleted_object(ptr: &PointerRow) -> WorkspaceError {
    WorkspaceError::NoSuchObject(format!(
        "Object {} (name {}) in workspace {} has been deleted",
        ptr.id, ptr.name, ptr.ws_id
    ))
}

/// Turns a pointer row into a resolved object at `version`, or the latest when absent
pub(crate) fn pin_version(
    workspace: &ResolvedWorkspace,
    sel: &ObjectSelector,
    ptr: Option<&PointerRow>,
    version: Option<i64>,
    allow_deleted: bool,
) -> Result<ResolvedObject> {
    // a pointer whose first version has not landed yet does not exist
    let ptr = match ptr {
        Some(p) if p.num_versions > 0 => p,
        _ => return Err(no_such_object(workspace.id, sel)),
    };
    if ptr.deleted && !allow_deleted {
        return Err(deleted_object(ptr));
    }
    let version = match version {
        None => ptr.num_versions,
        Some(v) if v <= ptr.num_versions => v,
        Some(v) => {
            return Err(WorkspaceError::NoSuchObject(format!(
                "No object with id {} (name {}) and version {} exists in workspace {}",
                ptr.id, ptr.name, v, ptr.ws_id
            )))
        }
    };
    Ok(ResolvedObject {
        workspace: workspace.clone(),
        id: ptr.id,
        name: ptr.name.clone(),
        version,
        hidden: ptr.hidden,
        deleted: ptr.deleted,
    })
}

/// Resolves a batch of objects for `op`, preserving input positions.
///
/// Workspace-level failures are wrapped as inaccessible-object errors naming
/// the object as given; object-level failures are returned as is.
pub(crate) fn resolve_objects(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    objects: &[ObjectIdentifier],
    op: Operation,
    allow_deleted: bool,
) -> Result<Vec<Result<ResolvedObject>>> {
    let wsis: Vec<WorkspaceIdentifier> = objects.iter().map(|o| o.workspace().clone()).collect();
    let workspaces = authorized_workspaces(conn, user, &wsis, op)?;

    let targets: Vec<(i64, &ObjectSelector)> = objects
        .iter()
        .filter_map(|o| match workspaces.get(o.workspace()) {
            Some(Ok(ws)) => Some((ws.id, o.object())),
            _ => None,
        })
        .collect();
    let (by_id, by_name) = lookup_pointers(conn, &targets)?;

    let mut out = Vec::with_capacity(objects.len());
    for o in objects {
        let ws = match workspaces.get(o.workspace()) {
            Some(Ok(ws)) => ws,
            Some(Err(e)) => {
                out.push(Err(WorkspaceError::inaccessible(o.identifier_string(), e.clone())));
                continue;
            }
            None => {
                let err = no_such_workspace(o.workspace());
                out.push(Err(WorkspaceError::inaccessible(o.identifier_string(), err)));
                continue;
            }
        };
        let ptr = match o.object() {
            ObjectSelector::Id(id) => by_id.get(&(ws.id, *id)),
            ObjectSelector::Name(name) => by_name.get(&(ws.id, name.clone())),
        };
        out.push(pin_version(ws, o.object(), ptr, o.version(), allow_deleted));
    }
    Ok(out)
}

/// Strict flavour of [`resolve_objects`]
pub(crate) fn resolve_objects_strict(
    conn: &Connection,
    user: Option<&WorkspaceUser>,
    objects: &[ObjectIdentifier],
    op: Operation,
    allow_deleted: bool,
) -> Result<Vec<ResolvedObject>> {
    resolve_objects(conn, user, objects, op, allow_deleted)?
        .into_iter()
        .collect()
}
