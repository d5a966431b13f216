//! Error taxonomy for the workspace store
//!
//! Every public operation returns [`Result`]. Domain failures carry the exact
//! user-facing message; anything coming out of the backing stores is folded
//! into [`WorkspaceError::Communication`].

use crate::blob::StorageError;

/// Result type for workspace operations
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Errors returned by the workspace store
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkspaceError {
    #[error("{0}")]
    NoSuchWorkspace(String),

    #[error("{0}")]
    NoSuchObject(String),

    #[error("{}", preexisting_message(.name, .deleted))]
    PreExistingWorkspace { name: String, deleted: bool },

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Wraps a failure on one member of a set of objects
    #[error("Object {identifier} cannot be accessed: {source}")]
    InaccessibleObject {
        identifier: String,
        #[source]
        source: Box<WorkspaceError>,
    },

    #[error("{0}")]
    NoSuchReference(String),

    #[error("Object #{position}{failure}")]
    TypedObjectValidation {
        position: usize,
        failure: ValidationFailure,
    },

    #[error("{0}")]
    IllegalArgument(String),

    #[error(transparent)]
    SizeLimit(#[from] SizeLimitError),

    #[error("Communication error: {0}")]
    Communication(String),
}

fn preexisting_message(name: &str, deleted: &bool) -> String {
    if *deleted {
        format!("Workspace name {} is already in use by a deleted workspace", name)
    } else {
        format!("Workspace name {} is already in use", name)
    }
}

impl WorkspaceError {
    pub fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    pub fn inaccessible(identifier: impl Into<String>, source: WorkspaceError) -> Self {
        Self::InaccessibleObject {
            identifier: identifier.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn validation(position: usize, failure: ValidationFailure) -> Self {
        Self::TypedObjectValidation { position, failure }
    }

    /// True for malformed input and size-limit violations
    pub fn is_illegal_argument(&self) -> bool {
        matches!(self, Self::IllegalArgument(_) | Self::SizeLimit(_))
    }

    /// True for errors meaning the target is absent, deleted or not visible to the caller
    pub fn is_inaccessible(&self) -> bool {
        matches!(
            self,
            Self::NoSuchWorkspace(_)
                | Self::NoSuchObject(_)
                | Self::Authorization(_)
                | Self::InaccessibleObject { .. }
        )
    }
}

/// Authorization failures, each with a fixed message shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Anonymous users may not {operation} workspace {workspace}")]
    Anonymous {
        operation: String,
        workspace: String,
    },

    #[error("User {user} may not {operation} workspace {workspace}")]
    User {
        user: String,
        operation: String,
        workspace: String,
    },

    #[error("The workspace with id {id}, name {name}, is locked and may not be modified")]
    Locked { id: i64, name: String },

    #[error("{0}")]
    Other(String),
}

/// What went wrong while validating one object of a save batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    TypeCheck(String),
    UnparseableReference { reference: String, reason: String },
    UnparseableProvenanceReference { reference: String, reason: String },
    InaccessibleReference { reference: String, reason: String },
    InaccessibleProvenanceReference { reference: String, reason: String },
    DuplicateResolvedReference {
        first: String,
        second: String,
        resolved: String,
        location: String,
    },
    ReferenceTypeNotAllowed {
        reference_type: String,
        reference: String,
        object_type: String,
    },
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeCheck(msg) => write!(f, " failed type checking:\n{}", msg),
            Self::UnparseableReference { reference, reason } => {
                write!(f, " has unparseable reference {}: {}", reference, reason)
            }
            Self::UnparseableProvenanceReference { reference, reason } => {
                write!(f, " has unparseable provenance reference {}: {}", reference, reason)
            }
            Self::InaccessibleReference { reference, reason } => {
                write!(f, " has inaccessible reference {}: {}", reference, reason)
            }
            Self::InaccessibleProvenanceReference { reference, reason } => {
                write!(f, " has inaccessible provenance reference {}: {}", reference, reason)
            }
            Self::DuplicateResolvedReference {
                first,
                second,
                resolved,
                location,
            } => write!(
                f,
                ": Two references in a single hash are identical when resolved, resulting in a \
                 loss of data: Duplicated key '{}' was found at {} (from keys {} and {})",
                resolved, location, first, second
            ),
            Self::ReferenceTypeNotAllowed {
                reference_type,
                reference,
                object_type,
            } => write!(
                f,
                ": The type {} of reference {} contained in this object is not allowed for \
                 this object's type, {}",
                reference_type, reference, object_type
            ),
        }
    }
}

/// A size limit was exceeded; carries the computed size and the configured limit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeLimitError {
    #[error("Metadata size of {size} is > {limit} bytes")]
    Metadata { size: u64, limit: u64 },

    #[error("Updated metadata size of {size} is > {limit} bytes")]
    UpdatedMetadata { size: u64, limit: u64 },

    #[error("Object #{position} data size {size} exceeds limit of {limit}")]
    ObjectData { position: usize, size: u64, limit: u64 },

    #[error("Object #{position} provenance size {size} exceeds limit of {limit}")]
    Provenance { position: usize, size: u64, limit: u64 },

    #[error("Object #{position} subdata size exceeds limit of {limit}")]
    Subdata { position: usize, size: u64, limit: u64 },

    #[error(
        "Too much data requested from the workspace at once; data requested including \
         potential subsets is {size}B which exceeds maximum of {limit}."
    )]
    ReturnSize { size: u64, limit: u64 },
}

impl From<StorageError> for WorkspaceError {
    fn from(e: StorageError) -> Self {
        Self::Communication(e.to_string())
    }
}

impl From<rusqlite::Error> for WorkspaceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Communication(format!("Metadata store error: {}", e))
    }
}

impl From<std::io::Error> for WorkspaceError {
    fn from(e: std::io::Error) -> Self {
        Self::Communication(format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for WorkspaceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Communication(format!("Serialization error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inaccessible_wraps_message() {
        let err = WorkspaceError::inaccessible(
            "foo",
            WorkspaceError::NoSuchWorkspace("No workspace with name bar exists".into()),
        );
        assert_eq!(
            err.to_string(),
            "Object foo cannot be accessed: No workspace with name bar exists"
        );
        assert!(err.is_inaccessible());
    }

    #[test]
    fn test_preexisting_messages() {
        let plain = WorkspaceError::PreExistingWorkspace { name: "ws".into(), deleted: false };
        let deleted = WorkspaceError::PreExistingWorkspace { name: "ws".into(), deleted: true };
        assert_eq!(plain.to_string(), "Workspace name ws is already in use");
        assert_eq!(
            deleted.to_string(),
            "Workspace name ws is already in use by a deleted workspace"
        );
    }

    #[test]
    fn test_validation_positions() {
        let err = WorkspaceError::validation(
            2,
            ValidationFailure::UnparseableReference {
                reference: "foo/bar/baz".into(),
                reason: "bad version".into(),
            },
        );
        assert_eq!(err.to_string(), "Object #2 has unparseable reference foo/bar/baz: bad version");

        let err = WorkspaceError::validation(1, ValidationFailure::TypeCheck("missing foo".into()));
        assert_eq!(err.to_string(), "Object #1 failed type checking:\nmissing foo");
    }

    #[test]
    fn test_size_limits_carry_numbers() {
        let err: WorkspaceError = SizeLimitError::Metadata { size: 19413, limit: 16000 }.into();
        assert_eq!(err.to_string(), "Metadata size of 19413 is > 16000 bytes");
        assert!(err.is_illegal_argument());
    }

    #[test]
    fn test_lock_message() {
        let err: WorkspaceError = AuthorizationError::Locked { id: 3, name: "lock".into() }.into();
        assert_eq!(
            err.to_string(),
            "The workspace with id 3, name lock, is locked and may not be modified"
        );
    }
}
