//! WStore Core Library
//!
//! A versioned, access-controlled object store organised into workspaces:
//! - Identifiers and name rules for users, workspaces and objects
//! - Permissions, global read and workspace locking
//! - Immutable object versions with typed data and provenance
//! - Reference rewriting and the reference graph between versions
//! - Resource limits with memory or temp-file spooling
//! - SQLite metadata (WAL mode) with content-addressed blobs in Fjall

pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod json;
pub mod lock;
pub mod model;
mod objects;
pub mod permissions;
pub mod provenance;
pub mod references;
mod resolver;
pub mod resources;
pub mod types;
pub mod workspace;

pub use blob::{BlobId, BlobStore, FjallBlobStore, MemoryBlobStore};
pub use config::StoreConfig;
pub use db::{AtomicCounter, Counter, MetadataDb};
pub use error::{AuthorizationError, Result, SizeLimitError, ValidationFailure, WorkspaceError};
pub use ids::{AclUser, ObjectIdentifier, ObjectSelector, WorkspaceIdentifier, WorkspaceUser};
pub use lock::LockState;
pub use model::{
    ListObjectsParams, ListWorkspacesParams, Metadata, ObjectChain, ObjectInformation,
    SubObjectIdentifier, WorkspaceInformation, WorkspaceObjectData, WorkspaceSaveObject,
};
pub use permissions::{Operation, Permission, PermissionSet};
pub use provenance::{Provenance, ProvenanceAction};
pub use references::Reference;
pub use resources::{ResourceConfig, ResourceGovernor, SpooledData};
pub use types::{
    AbsoluteTypeDefId, RefFieldKind, SchemaRegistry, TypeDefId, TypeDefName, TypeSpec,
    TypeValidationError, TypeValidator, ValidatedObject,
};
pub use workspace::WorkspaceStore;
