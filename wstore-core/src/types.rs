//! Typed object validation
//!
//! The store hands every saved object to a [`TypeValidator`] before any
//! reference is resolved. The validator checks the JSON against a type and
//! returns the references and subdata it found; rewriting, canonicalisation
//! and checksumming stay with the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// `Module.Name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDefName {
    pub module: String,
    pub name: String,
}

impl TypeDefName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self { module: module.into(), name: name.into() }
    }

    /// Parses `Module.Name`
    pub fn parse(s: &str) -> Option<Self> {
        let (module, name) = s.split_once('.')?;
        if module.is_empty() || name.is_empty() || name.contains('.') {
            return None;
        }
        Some(Self::new(module, name))
    }
}

impl fmt::Display for TypeDefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// A possibly partial type version. Missing parts mean "latest".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDefId {
    pub name: TypeDefName,
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

impl TypeDefId {
    pub fn new(name: TypeDefName, major: Option<u32>, minor: Option<u32>) -> Self {
        Self { name, major, minor }
    }

    pub fn exact(module: &str, name: &str, major: u32, minor: u32) -> Self {
        Self::new(TypeDefName::new(module, name), Some(major), Some(minor))
    }

    /// Parses `Module.Name`, `Module.Name-major` or `Module.Name-major.minor`
    pub fn parse(s: &str) -> Option<Self> {
        let (name, version) = match s.split_once('-') {
            Some((n, v)) => (n, Some(v)),
            None => (s, None),
        };
        let name = TypeDefName::parse(name)?;
        let (major, minor) = match version {
            None => (None, None),
            Some(v) => match v.split_once('.') {
                Some((maj, min)) => (Some(maj.parse().ok()?), Some(min.parse().ok()?)),
                None => (Some(v.parse().ok()?), None),
            },
        };
        Some(Self { name, major, minor })
    }
}

impl fmt::Display for TypeDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(major) = self.major {
            write!(f, "-{}", major)?;
            if let Some(minor) = self.minor {
                write!(f, ".{}", minor)?;
            }
        }
        Ok(())
    }
}

/// Fully versioned type, as stored on every object version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsoluteTypeDefId {
    pub name: TypeDefName,
    pub major: u32,
    pub minor: u32,
}

impl AbsoluteTypeDefId {
    pub fn type_string(&self) -> String {
        self.to_string()
    }

    pub fn parse(s: &str) -> Option<Self> {
        let id = TypeDefId::parse(s)?;
        Some(Self {
            name: id.name,
            major: id.major?,
            minor: id.minor?,
        })
    }
}

impl fmt::Display for AbsoluteTypeDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.major, self.minor)
    }
}

/// Where a reference sits inside the object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefLocation {
    /// A string value at this JSON pointer
    Value(String),
    /// A key of the map at this JSON pointer
    MapKey(String),
}

/// A reference found by the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReference {
    pub reference: String,
    pub location: RefLocation,
    /// Allowed target types; empty means any
    pub allowed_types: Vec<TypeDefName>,
}

/// What a successful validation yields
#[derive(Debug, Clone)]
pub struct ValidatedObject {
    pub type_id: AbsoluteTypeDefId,
    pub references: Vec<ExtractedReference>,
    pub subdata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TypeValidationError(pub String);

/// Type checking collaborator
pub trait TypeValidator: Send + Sync {
    fn validate(&self, type_id: &TypeDefId, data: &Value)
        -> Result<ValidatedObject, TypeValidationError>;
}

/// How a reference field holds its references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFieldKind {
    Single,
    List,
    MapKeys,
}

#[derive(Debug, Clone)]
struct RefField {
    field: String,
    kind: RefFieldKind,
    allowed: Vec<TypeDefName>,
}

/// Definition of one registered type
#[derive(Debug, Clone)]
pub struct TypeSpec {
    id: AbsoluteTypeDefId,
    required: Vec<String>,
    refs: Vec<RefField>,
    subdata: Vec<String>,
}

impl TypeSpec {
    pub fn new(module: &str, name: &str, major: u32, minor: u32) -> Self {
        Self {
            id: AbsoluteTypeDefId {
                name: TypeDefName::new(module, name),
                major,
                minor,
            },
            required: Vec::new(),
            refs: Vec::new(),
            subdata: Vec::new(),
        }
    }

    pub fn required(mut self, field: &str) -> Self {
        self.required.push(field.to_string());
        self
    }

    /// Declares a top-level field holding references, optionally restricted to types
    pub fn reference(mut self, field: &str, kind: RefFieldKind, allowed: &[TypeDefName]) -> Self {
        self.refs.push(RefField {
            field: field.to_string(),
            kind,
            allowed: allowed.to_vec(),
        });
        self
    }

    pub fn subdata(mut self, field: &str) -> Self {
        self.subdata.push(field.to_string());
        self
    }

    pub fn id(&self) -> &AbsoluteTypeDefId {
        &self.id
    }
}

fn pointer_token(field: &str) -> String {
    field.replace('~', "~0").replace('/', "~1")
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl TypeSpec {
    fn check(&self, data: &Value) -> Result<ValidatedObject, TypeValidationError> {
        let map = data.as_object().ok_or_else(|| {
            TypeValidationError(format!(
                "instance type ({}) does not match any allowed primitive type (allowed: [\"object\"])",
                kind_of(data)
            ))
        })?;
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|f| !map.contains_key(f.as_str()))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(TypeValidationError(format!(
                "object has missing required properties ({:?})",
                missing
            )));
        }

        let mut references = Vec::new();
        for rf in &self.refs {
            let Some(value) = map.get(&rf.field) else { continue };
            let base = format!("/{}", pointer_token(&rf.field));
            let bad = || {
                TypeValidationError(format!(
                    "instance at {} has the wrong shape for a reference field",
                    base
                ))
            };
            match rf.kind {
                RefFieldKind::Single => {
                    let s = value.as_str().ok_or_else(bad)?;
                    references.push(ExtractedReference {
                        reference: s.to_string(),
                        location: RefLocation::Value(base.clone()),
                        allowed_types: rf.allowed.clone(),
                    });
                }
                RefFieldKind::List => {
                    let items = value.as_array().ok_or_else(bad)?;
                    for (i, item) in items.iter().enumerate() {
                        let s = item.as_str().ok_or_else(bad)?;
                        references.push(ExtractedReference {
                            reference: s.to_string(),
                            location: RefLocation::Value(format!("{}/{}", base, i)),
                            allowed_types: rf.allowed.clone(),
                        });
                    }
                }
                RefFieldKind::MapKeys => {
                    let inner = value.as_object().ok_or_else(bad)?;
                    for key in inner.keys() {
                        references.push(ExtractedReference {
                            reference: key.clone(),
                            location: RefLocation::MapKey(base.clone()),
                            allowed_types: rf.allowed.clone(),
                        });
                    }
                }
            }
        }

        let subdata = if self.subdata.is_empty() {
            None
        } else {
            let mut sub = serde_json::Map::new();
            for field in &self.subdata {
                if let Some(v) = map.get(field) {
                    sub.insert(field.clone(), v.clone());
                }
            }
            Some(Value::Object(sub))
        };

        Ok(ValidatedObject {
            type_id: self.id.clone(),
            references,
            subdata,
        })
    }
}

/// In-process registry of type definitions
#[derive(Default)]
pub struct SchemaRegistry {
    types: RwLock<HashMap<TypeDefName, Vec<TypeSpec>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: TypeSpec) {
        let mut types = self.types.write().unwrap_or_else(|p| p.into_inner());
        let versions = types.entry(spec.id.name.clone()).or_default();
        versions.retain(|s| s.id != spec.id);
        versions.push(spec);
        versions.sort_by_key(|s| (s.id.major, s.id.minor));
    }

    fn find(&self, type_id: &TypeDefId) -> Result<TypeSpec, TypeValidationError> {
        let types = self.types.read().unwrap_or_else(|p| p.into_inner());
        let versions = types
            .get(&type_id.name)
            .ok_or_else(|| TypeValidationError(format!("Type {} is not registered", type_id.name)))?;
        versions
            .iter()
            .rev()
            .find(|s| {
                type_id.major.is_none_or(|m| m == s.id.major)
                    && type_id.minor.is_none_or(|m| m == s.id.minor)
            })
            .cloned()
            .ok_or_else(|| TypeValidationError(format!("No such type version: {}", type_id)))
    }
}

impl TypeValidator for SchemaRegistry {
    fn validate(
        &self,
        type_id: &TypeDefId,
        data: &Value,
    ) -> Result<ValidatedObject, TypeValidationError> {
        self.find(type_id)?.check(data)
    }
}
