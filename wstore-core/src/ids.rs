//! Identifier value types
//!
//! Users, workspaces and objects are addressed either by numeric id or by
//! name. All validation happens at construction so the rest of the crate can
//! trust any identifier it is handed.

use crate::error::{Result, WorkspaceError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_USER_LENGTH: usize = 100;

/// Symbol stored in the ACL table for the global grant
pub const ALL_USERS: &str = "*";

const REF_SEP: char = '/';
const WS_USER_SEP: char = ':';

fn is_integer(s: &str) -> bool {
    s.parse::<i64>().is_ok()
}

fn first_illegal(s: &str, allowed: impl Fn(char) -> bool) -> Option<char> {
    s.chars().find(|c| !allowed(*c))
}

fn user_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')
}

fn workspace_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':')
}

fn object_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '|' | '-')
}

/// A named caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceUser(String);

impl WorkspaceUser {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(WorkspaceError::illegal("Username cannot be null or the empty string"));
        }
        if name.chars().count() > MAX_USER_LENGTH {
            return Err(WorkspaceError::illegal(format!(
                "Username exceeds the maximum length of {}",
                MAX_USER_LENGTH
            )));
        }
        if let Some(c) = first_illegal(&name, user_char) {
            return Err(WorkspaceError::illegal(format!(
                "Illegal character in user name {}: {}",
                name, c
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkspaceUser {
    type Error = WorkspaceError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<WorkspaceUser> for String {
    fn from(user: WorkspaceUser) -> Self {
        user.0
    }
}

/// Subject of an ACL entry: a named user or the global wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AclUser {
    User(WorkspaceUser),
    AllUsers,
}

impl AclUser {
    pub(crate) fn from_stored(s: &str) -> Result<Self> {
        if s == ALL_USERS {
            Ok(Self::AllUsers)
        } else {
            Ok(Self::User(WorkspaceUser::new(s)?))
        }
    }

    pub(crate) fn stored(&self) -> &str {
        match self {
            Self::User(u) => u.as_str(),
            Self::AllUsers => ALL_USERS,
        }
    }
}

impl fmt::Display for AclUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stored())
    }
}

/// Checks a workspace name. When `user` is given the `user:` prefix rules apply.
pub fn validate_workspace_name(name: &str, user: Option<&WorkspaceUser>) -> Result<()> {
    if name.is_empty() {
        return Err(WorkspaceError::illegal(
            "Workspace name cannot be null or the empty string",
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(WorkspaceError::illegal(format!(
            "Workspace name exceeds the maximum length of {}",
            MAX_NAME_LENGTH
        )));
    }
    if let Some(c) = first_illegal(name, workspace_char) {
        return Err(WorkspaceError::illegal(format!(
            "Illegal character in workspace name {}: {}",
            name, c
        )));
    }
    if let Some(user) = user {
        let parts: Vec<&str> = name.split(WS_USER_SEP).collect();
        if parts.len() > 2 {
            return Err(WorkspaceError::illegal(format!(
                "Workspace name {} may only contain one {} delimiter",
                name, WS_USER_SEP
            )));
        }
        if parts.len() == 2 {
            if parts[1].is_empty() {
                return Err(WorkspaceError::illegal(format!(
                    "Workspace name missing from {}",
                    name
                )));
            }
            if parts[0].is_empty() {
                return Err(WorkspaceError::illegal(format!("User name missing from {}", name)));
            }
            if parts[0] != user.as_str() {
                return Err(WorkspaceError::illegal(format!(
                    "Workspace name {} must only contain the user name {} prior to the {} delimiter",
                    name, user, WS_USER_SEP
                )));
            }
            if is_integer(parts[1]) {
                return Err(WorkspaceError::illegal(format!(
                    "Workspace names cannot be integers: {}",
                    name
                )));
            }
        }
    }
    if is_integer(name) {
        return Err(WorkspaceError::illegal(format!(
            "Workspace names cannot be integers: {}",
            name
        )));
    }
    Ok(())
}

pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WorkspaceError::illegal("Object name cannot be null or the empty string"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(WorkspaceError::illegal(format!(
            "Object name exceeds the maximum length of {}",
            MAX_NAME_LENGTH
        )));
    }
    if let Some(c) = first_illegal(name, object_char) {
        return Err(WorkspaceError::illegal(format!(
            "Illegal character in object name {}: {}",
            name, c
        )));
    }
    if is_integer(name) {
        return Err(WorkspaceError::illegal(format!(
            "Object names cannot be integers: {}",
            name
        )));
    }
    Ok(())
}

fn check_workspace_id(id: i64) -> Result<i64> {
    if id < 1 {
        return Err(WorkspaceError::illegal("Workspace id must be > 0"));
    }
    Ok(id)
}

fn check_object_id(id: i64) -> Result<i64> {
    if id < 1 {
        return Err(WorkspaceError::illegal("Object id must be > 0"));
    }
    Ok(id)
}

fn check_version(ver: i64) -> Result<i64> {
    if ver < 1 {
        return Err(WorkspaceError::illegal("Object version must be > 0"));
    }
    Ok(ver)
}

/// A workspace addressed by id or name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkspaceIdentifier {
    Id(i64),
    Name(String),
}

impl WorkspaceIdentifier {
    pub fn id(id: i64) -> Result<Self> {
        Ok(Self::Id(check_workspace_id(id)?))
    }

    pub fn name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_workspace_name(&name, None)?;
        Ok(Self::Name(name))
    }

    /// Interprets an all-digit token as an id and anything else as a name
    pub fn parse(token: &str) -> Result<Self> {
        match token.parse::<i64>() {
            Ok(id) => Self::id(id),
            Err(_) => Self::name(token),
        }
    }

    /// The identifier as the caller gave it
    pub fn identifier_string(&self) -> String {
        match self {
            Self::Id(id) => id.to_string(),
            Self::Name(name) => name.clone(),
        }
    }
}

impl fmt::Display for WorkspaceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier_string())
    }
}

/// An object within some workspace, addressed by id or name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectSelector {
    Id(i64),
    Name(String),
}

impl ObjectSelector {
    pub fn id(id: i64) -> Result<Self> {
        Ok(Self::Id(check_object_id(id)?))
    }

    pub fn name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_object_name(&name)?;
        Ok(Self::Name(name))
    }

    /// Exactly one of `name` and `id` must be present
    pub fn from_parts(name: Option<&str>, id: Option<i64>) -> Result<Self> {
        match (name, id) {
            (Some(name), None) => Self::name(name),
            (None, Some(id)) => Self::id(id),
            (name, id) => Err(WorkspaceError::illegal(format!(
                "Must provide one and only one of object name (was: {}) or id (was: {})",
                name.unwrap_or("null"),
                id.map(|i| i.to_string()).unwrap_or_else(|| "null".to_string())
            ))),
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token.parse::<i64>() {
            Ok(id) => Self::id(id),
            Err(_) => Self::name(token),
        }
    }

    pub fn identifier_string(&self) -> String {
        match self {
            Self::Id(id) => id.to_string(),
            Self::Name(name) => name.clone(),
        }
    }
}

impl fmt::Display for ObjectSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier_string())
    }
}

/// A workspace object, optionally pinned to a version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    workspace: WorkspaceIdentifier,
    object: ObjectSelector,
    version: Option<i64>,
}

impl ObjectIdentifier {
    pub fn new(workspace: WorkspaceIdentifier, object: ObjectSelector) -> Self {
        Self { workspace, object, version: None }
    }

    pub fn with_version(workspace: WorkspaceIdentifier, object: ObjectSelector, version: i64) -> Result<Self> {
        Ok(Self {
            workspace,
            object,
            version: Some(check_version(version)?),
        })
    }

    /// Convenience constructor from a workspace and an object name
    pub fn named(workspace: &WorkspaceIdentifier, name: &str) -> Result<Self> {
        Ok(Self::new(workspace.clone(), ObjectSelector::name(name)?))
    }

    /// Convenience constructor from a workspace and an object id
    pub fn numbered(workspace: &WorkspaceIdentifier, id: i64) -> Result<Self> {
        Ok(Self::new(workspace.clone(), ObjectSelector::id(id)?))
    }

    /// Parses a reference string of the form `ws/obj[/ver]`
    pub fn parse(reference: &str) -> Result<Self> {
        let parts: Vec<&str> = reference.split(REF_SEP).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(WorkspaceError::illegal(format!(
                "Illegal number of separators {} in object reference {}",
                REF_SEP, reference
            )));
        }
        let workspace = WorkspaceIdentifier::parse(parts[0])?;
        let object = ObjectSelector::parse(parts[1])?;
        match parts.get(2) {
            None => Ok(Self::new(workspace, object)),
            Some(ver) => {
                let ver = ver.parse::<i64>().map_err(|_| {
                    WorkspaceError::illegal(format!(
                        "Unable to parse version portion of object reference {} to an integer",
                        reference
                    ))
                })?;
                Self::with_version(workspace, object, ver)
            }
        }
    }

    pub fn workspace(&self) -> &WorkspaceIdentifier {
        &self.workspace
    }

    pub fn object(&self) -> &ObjectSelector {
        &self.object
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Same object without a version component
    pub fn without_version(&self) -> Self {
        Self {
            workspace: self.workspace.clone(),
            object: self.object.clone(),
            version: None,
        }
    }

    /// The object part as given, used in batch error messages
    pub fn identifier_string(&self) -> String {
        self.object.identifier_string()
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.workspace, REF_SEP, self.object)?;
        if let Some(ver) = self.version {
            write!(f, "{}{}", REF_SEP, ver)?;
        }
        Ok(())
    }
}
