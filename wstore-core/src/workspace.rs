//! Workspace store facade and workspace-level operations
//!
//! [`WorkspaceStore`] ties the metadata database, the blob store, the type
//! validator and the resource governor together. Object-level operations
//! live in [`crate::objects`].

use crate::blob::{BlobStore, FjallBlobStore, MemoryBlobStore};
use crate::config::StoreConfig;
use crate::db::{self, AtomicCounter, Counter, Insert, MetadataDb, NewWorkspace, WorkspaceRow};
use crate::error::{Result, WorkspaceError};
use crate::ids::{validate_workspace_name, AclUser, WorkspaceIdentifier, WorkspaceUser, ALL_USERS};
use crate::lock::ensure_unlocked;
use crate::model::{ListWorkspacesParams, Metadata, WorkspaceInformation};
use crate::permissions::{
    authorize, check_global_permission, check_set_permissions, Operation, Permission, PermissionSet,
};
use crate::resolver;
use crate::resources::ResourceGovernor;
use crate::types::TypeValidator;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Versioned, access-controlled object store
pub struct WorkspaceStore {
    pub(crate) db: MetadataDb,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) validator: Arc<dyn TypeValidator>,
    pub(crate) resources: ResourceGovernor,
}

impl WorkspaceStore {
    pub fn new(
        db: MetadataDb,
        blobs: Arc<dyn BlobStore>,
        validator: Arc<dyn TypeValidator>,
        resources: ResourceGovernor,
    ) -> Self {
        Self {
            db,
            blobs,
            validator,
            resources,
        }
    }

    /// Open or create an on-disk store under `config.root`
    pub fn open(config: &StoreConfig, validator: Arc<dyn TypeValidator>) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let resources = ResourceGovernor::new(config.resources.clone())?;
        let db = MetadataDb::open(&config.metadata_path())?;
        let blobs = FjallBlobStore::open(&config.blob_path())?;
        info!(root = ?config.root, instance = %db.instance_id()?, "opened workspace store");
        Ok(Self::new(db, Arc::new(blobs), validator, resources))
    }

    /// Store with an in-memory database and blob store
    pub fn in_memory(validator: Arc<dyn TypeValidator>) -> Result<Self> {
        let resources = ResourceGovernor::new(Default::default())?;
        Ok(Self::new(
            MetadataDb::open_in_memory()?,
            Arc::new(MemoryBlobStore::new()),
            validator,
            resources,
        ))
    }

    pub fn resources(&self) -> &ResourceGovernor {
        &self.resources
    }

    pub fn instance_id(&self) -> Result<String> {
        self.db.instance_id()
    }

    pub async fn create_workspace(
        &self,
        user: &WorkspaceUser,
        name: &str,
        global_read: bool,
        description: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<WorkspaceInformation> {
        validate_workspace_name(name, Some(user))?;
        let metadata = metadata.unwrap_or_default();
        self.resources.check_metadata(&metadata)?;
        let description = self.resources.truncate_description(description);

        let conn = self.db.conn()?;
        let row = insert_workspace(&conn, user, name, global_read, description.as_deref(), &metadata)?;
        info!(workspace_id = row.id, name, owner = %user, "created workspace");
        info_for(&conn, &row, Some(user))
    }

    /// New workspace holding every non-deleted object of `source` with its full history
    pub async fn clone_workspace(
        &self,
        user: &WorkspaceUser,
        source: &WorkspaceIdentifier,
        name: &str,
        global_read: bool,
        description: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<WorkspaceInformation> {
        validate_workspace_name(name, Some(user))?;
        let metadata = metadata.unwrap_or_default();
        self.resources.check_metadata(&metadata)?;
        let description = self.resources.truncate_description(description);

        let conn = self.db.conn()?;
        let src = resolver::authorized_workspace(&conn, Some(user), source, Operation::Read, false)?;
        let row = insert_workspace(&conn, user, name, global_read, description.as_deref(), &metadata)?;

        let pointers: Vec<_> = db::conn_ptr_list(&conn, src.id)?
            .into_iter()
            .filter(|p| !p.deleted && p.num_versions > 0)
            .collect();
        if !pointers.is_empty() {
            let count = pointers.len() as i64;
            let first = conn.fetch_add(Counter::Objects { ws_id: row.id }, count)? - count + 1;
            for (offset, ptr) in pointers.iter().enumerate() {
                let obj_id = first + offset as i64;
                if db::conn_ptr_insert(&conn, row.id, obj_id, &ptr.name, ptr.hidden)? == Insert::Duplicate {
                    return Err(WorkspaceError::Communication(format!(
                        "Object name {} already present in fresh workspace {}",
                        ptr.name, row.id
                    )));
                }
                for version in db::conn_versions_of(&conn, src.id, ptr.id, None)? {
                    let mut nv = version.to_new_version();
                    nv.saved_by = user.to_string();
                    nv.saved = db::now_millis();
                    db::conn_version_push(&conn, row.id, obj_id, &nv, false)?;
                }
            }
            db::conn_ws_touch(&conn, row.id)?;
        }
        info!(
            source = src.id,
            workspace_id = row.id,
            objects = pointers.len(),
            "cloned workspace"
        );
        let row = load_row(&conn, row.id)?;
        info_for(&conn, &row, Some(user))
    }

    pub async fn get_workspace_information(
        &self,
        user: Option<&WorkspaceUser>,
        wsi: &WorkspaceIdentifier,
    ) -> Result<WorkspaceInformation> {
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, user, wsi, Operation::Read, false)?;
        let row = load_row(&conn, ws.id)?;
        info_for(&conn, &row, user)
    }

    pub async fn get_workspace_description(
        &self,
        user: Option<&WorkspaceUser>,
        wsi: &WorkspaceIdentifier,
    ) -> Result<Option<String>> {
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, user, wsi, Operation::Read, false)?;
        Ok(load_row(&conn, ws.id)?.description)
    }

    pub async fn set_workspace_description(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        description: Option<&str>,
    ) -> Result<()> {
        let description = self.resources.truncate_description(description);
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, Some(user), wsi, Operation::SetDescription, false)?;
        db::conn_ws_set_description(&conn, ws.id, description.as_deref())
    }

    /// Merges `metadata` into the workspace metadata
    pub async fn set_workspace_metadata(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        metadata: Metadata,
    ) -> Result<()> {
        if metadata.is_empty() {
            return Err(WorkspaceError::illegal("Metadata cannot be null or empty"));
        }
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, Some(user), wsi, Operation::AlterMetadata, false)?;
        let mut merged = load_row(&conn, ws.id)?.metadata;
        merged.extend(metadata);
        self.resources.check_updated_metadata(&merged)?;
        db::conn_ws_set_metadata(&conn, ws.id, &merged)
    }

    pub async fn remove_workspace_metadata(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        key: &str,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, Some(user), wsi, Operation::AlterMetadata, false)?;
        let mut metadata = load_row(&conn, ws.id)?.metadata;
        if metadata.remove(key).is_some() {
            db::conn_ws_set_metadata(&conn, ws.id, &metadata)?;
        }
        Ok(())
    }

    pub async fn rename_workspace(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        new_name: &str,
    ) -> Result<WorkspaceInformation> {
        validate_workspace_name(new_name, Some(user))?;
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, Some(user), wsi, Operation::RenameWorkspace, false)?;
        if ws.name == new_name {
            return Err(WorkspaceError::illegal(format!("Workspace is already named {}", new_name)));
        }
        if db::conn_ws_rename(&conn, ws.id, new_name)? == Insert::Duplicate {
            return Err(WorkspaceError::illegal(format!(
                "There is already a workspace named {}",
                new_name
            )));
        }
        info!(workspace_id = ws.id, from = %ws.name, to = new_name, "renamed workspace");
        let row = load_row(&conn, ws.id)?;
        info_for(&conn, &row, Some(user))
    }

    pub async fn set_workspace_deleted(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        delete: bool,
    ) -> Result<()> {
        let op = if delete {
            Operation::DeleteWorkspace
        } else {
            Operation::UndeleteWorkspace
        };
        let conn = self.db.conn()?;
        let ws = resolver::authorized_workspace(&conn, Some(user), wsi, op, true)?;
        db::conn_ws_set_deleted(&conn, ws.id, delete)?;
        info!(workspace_id = ws.id, deleted = delete, "set workspace deleted flag");
        Ok(())
    }

    /// Locks the workspace for good
    pub async fn lock_workspace(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
    ) -> Result<WorkspaceInformation> {
        let conn = self.db.conn()?;
        let ws = resolver::resolve_workspace(&conn, wsi, false)?;
        let locked = ws.lock_state.lock(ws.id, &ws.name)?;
        let held = resolver::permission(&conn, Some(user), ws.id)?;
        authorize(Some(user), held.effective(), Operation::Lock, &ws.name)?;
        db::conn_ws_set_lock_state(&conn, ws.id, locked)?;
        info!(workspace_id = ws.id, name = %ws.name, "locked workspace");
        let row = load_row(&conn, ws.id)?;
        info_for(&conn, &row, Some(user))
    }

    /// Sets `permission` for each of `users`, leaving the owner's entry alone
    pub async fn set_permissions(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        users: &[WorkspaceUser],
        permission: Permission,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        let ws = resolver::resolve_workspace(&conn, wsi, false)?;
        ensure_unlocked(ws.lock_state, ws.id, &ws.name)?;
        let held = resolver::permission(&conn, Some(user), ws.id)?;
        check_set_permissions(Some(user), held, users, permission, &ws.name)?;
        for target in users.iter().filter(|u| u.as_str() != ws.owner) {
            db::conn_acl_set(&conn, ws.id, target.as_str(), permission)?;
        }
        debug!(workspace_id = ws.id, users = users.len(), ?permission, "set permissions");
        Ok(())
    }

    /// Grants or revokes global read; on a locked workspace granting read publishes it
    pub async fn set_global_permission(
        &self,
        user: &WorkspaceUser,
        wsi: &WorkspaceIdentifier,
        permission: Permission,
    ) -> Result<()> {
        check_global_permission(permission)?;
        let conn = self.db.conn()?;
        let ws = resolver::resolve_workspace(&conn, wsi, false)?;
        let next = ws.lock_state.after_global_permission(permission, ws.id, &ws.name)?;
        let held = resolver::permission(&conn, Some(user), ws.id)?;
        authorize(Some(user), held.effective(), Operation::SetGlobalPermission, &ws.name)?;
        db::conn_acl_set(&conn, ws.id, ALL_USERS, permission)?;
        if next != ws.lock_state {
            db::conn_ws_set_lock_state(&conn, ws.id, next)?;
            info!(workspace_id = ws.id, name = %ws.name, "published workspace");
        }
        Ok(())
    }

    /// ACL entries visible to the caller.
    ///
    /// ADMIN and above see every entry; everyone else sees their own entry
    /// and the global one.
    pub async fn get_permissions(
        &self,
        user: Option<&WorkspaceUser>,
        wsi: &WorkspaceIdentifier,
    ) -> Result<BTreeMap<AclUser, Permission>> {
        let conn = self.db.conn()?;
        let ws = resolver::resolve_workspace(&conn, wsi, false)?;
        let held = resolver::permission(&conn, user, ws.id)?;
        let mut out = BTreeMap::new();
        for (subject, perm) in db::conn_acl_all(&conn, ws.id)? {
            let visible = held.user >= Permission::Admin
                || subject == ALL_USERS
                || user.is_some_and(|u| u.as_str() == subject);
            if visible {
                out.insert(AclUser::from_stored(&subject)?, perm);
            }
        }
        if let Some(u) = user {
            out.entry(AclUser::User(u.clone())).or_insert(held.user);
        }
        Ok(out)
    }

    pub async fn list_workspaces(
        &self,
        user: Option<&WorkspaceUser>,
        params: &ListWorkspacesParams,
    ) -> Result<Vec<WorkspaceInformation>> {
        let conn = self.db.conn()?;
        let mut subjects = vec![ALL_USERS];
        if let Some(u) = user {
            subjects.push(u.as_str());
        }
        let mut perms: HashMap<i64, PermissionSet> = HashMap::new();
        for (ws_id, subject, perm) in db::conn_acl_for_subjects(&conn, &subjects)? {
            let set = perms.entry(ws_id).or_insert(PermissionSet::NONE);
            if subject == ALL_USERS {
                set.global = perm;
            } else {
                set.user = perm;
            }
        }

        let mut out = Vec::new();
        for row in db::conn_ws_all(&conn)? {
            let set = perms.get(&row.id).copied().unwrap_or(PermissionSet::NONE);
            if row.deleted {
                let owned = user.is_some_and(|u| u.as_str() == row.owner);
                if !(params.show_deleted && owned) {
                    continue;
                }
            }
            let held = if params.exclude_global { set.user } else { set.effective() };
            if held < params.min_permission {
                continue;
            }
            out.push(info_from_row(&row, set)?);
        }
        Ok(out)
    }
}

/// Inserts a workspace with its owner entry, consuming a fresh id
fn insert_workspace(
    conn: &Connection,
    user: &WorkspaceUser,
    name: &str,
    global_read: bool,
    description: Option<&str>,
    metadata: &Metadata,
) -> Result<WorkspaceRow> {
    let id = conn.fetch_add(Counter::Workspaces, 1)?;
    let tx = conn.unchecked_transaction()?;
    let ws = NewWorkspace {
        id,
        name,
        owner: user.as_str(),
        description,
        metadata,
    };
    if db::conn_ws_insert(&tx, &ws)? == Insert::Duplicate {
        drop(tx);
        let existing = db::conn_ws_by_names(conn, &[name.to_string()])?.remove(name);
        let deleted = existing.is_some_and(|r| r.deleted && r.owner == user.as_str());
        return Err(WorkspaceError::PreExistingWorkspace {
            name: name.to_string(),
            deleted,
        });
    }
    db::conn_acl_set(&tx, id, user.as_str(), Permission::Owner)?;
    if global_read {
        db::conn_acl_set(&tx, id, ALL_USERS, Permission::Read)?;
    }
    tx.commit()?;
    load_row(conn, id)
}

fn load_row(conn: &Connection, id: i64) -> Result<WorkspaceRow> {
    db::conn_ws_get(conn, id)?
        .ok_or_else(|| WorkspaceError::Communication(format!("Workspace row {} vanished", id)))
}

fn info_for(conn: &Connection, row: &WorkspaceRow, user: Option<&WorkspaceUser>) -> Result<WorkspaceInformation> {
    let set = resolver::permission(conn, user, row.id)?;
    info_from_row(row, set)
}

fn info_from_row(row: &WorkspaceRow, set: PermissionSet) -> Result<WorkspaceInformation> {
    Ok(WorkspaceInformation {
        id: row.id,
        name: row.name.clone(),
        owner: WorkspaceUser::new(row.owner.clone())?,
        moddate: db::to_datetime(row.moddate),
        approximate_objects: row.num_objects,
        user_permission: set.user,
        global_read: set.global_read(),
        lock_state: row.lock_state,
        metadata: row.metadata.clone(),
    })
}
