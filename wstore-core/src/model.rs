//! Request and result types

use crate::ids::{ObjectIdentifier, ObjectSelector, WorkspaceIdentifier, WorkspaceUser};
use crate::lock::LockState;
use crate::permissions::Permission;
use crate::provenance::Provenance;
use crate::resources::SpooledData;
use crate::types::{TypeDefId, TypeDefName};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceInformation {
    pub id: i64,
    pub name: String,
    pub owner: WorkspaceUser,
    pub moddate: DateTime<Utc>,
    /// Highest object id allocated so far
    pub approximate_objects: i64,
    /// The caller's own ACL entry
    pub user_permission: Permission,
    pub global_read: bool,
    pub lock_state: LockState,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInformation {
    pub object_id: i64,
    pub object_name: String,
    pub type_string: String,
    pub saved_date: DateTime<Utc>,
    pub version: i64,
    pub saved_by: WorkspaceUser,
    pub workspace_id: i64,
    pub workspace_name: String,
    pub checksum: String,
    pub size: u64,
    pub metadata: Option<Metadata>,
}

impl ObjectInformation {
    /// Absolute `ws/obj/ver` reference of this version
    pub fn reference(&self) -> String {
        format!("{}/{}/{}", self.workspace_id, self.object_id, self.version)
    }
}

/// An object version with its payload
#[derive(Debug)]
pub struct WorkspaceObjectData {
    pub data: SpooledData,
    pub info: ObjectInformation,
    pub provenance: Provenance,
    /// Absolute references held by the payload
    pub references: Vec<String>,
    /// Set when the version was produced by copying another version
    pub copied_from: Option<String>,
    /// Set when the version was produced by a revert; names the reverted-to version
    pub reverted_from: Option<i64>,
}

/// One object to save
#[derive(Debug, Clone)]
pub struct WorkspaceSaveObject {
    pub target: Option<ObjectSelector>,
    pub data: Value,
    pub type_id: TypeDefId,
    pub metadata: Metadata,
    pub provenance: Provenance,
    pub hidden: bool,
}

impl WorkspaceSaveObject {
    pub fn new(data: Value, type_id: TypeDefId, metadata: Metadata, provenance: Provenance, hidden: bool) -> Self {
        Self {
            target: None,
            data,
            type_id,
            metadata,
            provenance,
            hidden,
        }
    }

    pub fn with_target(mut self, target: ObjectSelector) -> Self {
        self.target = Some(target);
        self
    }
}

/// Selects part of an object's data by JSON pointer paths
#[derive(Debug, Clone)]
pub struct SubObjectIdentifier {
    pub object: ObjectIdentifier,
    pub paths: Vec<String>,
}

/// A head object and the references to follow from it
#[derive(Debug, Clone)]
pub struct ObjectChain {
    pub head: ObjectIdentifier,
    pub chain: Vec<ObjectIdentifier>,
}

impl ObjectChain {
    pub fn new(head: ObjectIdentifier, chain: Vec<ObjectIdentifier>) -> Self {
        Self { head, chain }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsParams {
    pub workspaces: Vec<WorkspaceIdentifier>,
    /// Matches the type name regardless of version
    pub type_name: Option<TypeDefName>,
    pub saved_by: Option<WorkspaceUser>,
    pub show_hidden: bool,
    pub show_deleted: bool,
    pub show_all_versions: bool,
    pub include_metadata: bool,
}

#[derive(Debug, Clone)]
pub struct ListWorkspacesParams {
    pub min_permission: Permission,
    /// Skip workspaces visible only through the global grant
    pub exclude_global: bool,
    /// Include deleted workspaces the caller owns
    pub show_deleted: bool,
}

impl Default for ListWorkspacesParams {
    fn default() -> Self {
        Self {
            min_permission: Permission::Read,
            exclude_global: false,
            show_deleted: false,
        }
    }
}
