//! Object references
//!
//! References are written by callers as `ws/obj[/ver]` with names or ids and
//! stored only in absolute `wsid/objid/ver` form. This module resolves them
//! at save time, rewrites payloads in place, and walks stored reference
//! edges for chained reads.

use crate::db::{self, VersionRow};
use crate::error::{Result, ValidationFailure, WorkspaceError};
use crate::ids::{ObjectIdentifier, ObjectSelector, WorkspaceUser};
use crate::permissions::Operation;
use crate::resolver::{self, ResolvedObject, ResolvedWorkspace};
use crate::types::{AbsoluteTypeDefId, ExtractedReference, RefLocation};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// An absolute reference to one object version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub workspace_id: i64,
    pub object_id: i64,
    pub version: i64,
}

impl Reference {
    pub fn new(workspace_id: i64, object_id: i64, version: i64) -> Self {
        Self {
            workspace_id,
            object_id,
            version,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workspace_id, self.object_id, self.version)
    }
}

impl FromStr for Reference {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || WorkspaceError::illegal(format!("Not an absolute reference: {}", s));
        let mut parts = s.split('/');
        let mut next = || -> Result<i64> {
            parts
                .next()
                .and_then(|p| p.parse::<i64>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(bad)
        };
        let reference = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(reference)
    }
}

impl From<&ResolvedObject> for Reference {
    fn from(o: &ResolvedObject) -> Self {
        Self::new(o.workspace.id, o.id, o.version)
    }
}

/// Where a reference to resolve came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefKind {
    Data,
    Provenance,
}

/// A resolved reference target with its stored type
#[derive(Debug, Clone)]
pub(crate) struct ReferenceTarget {
    pub reference: Reference,
    pub type_string: String,
}

/// Resolves every distinct reference string readable by `user`.
///
/// The map holds one entry per input string; unparseable and inaccessible
/// inputs map to the error a direct read would have raised.
pub(crate) fn resolve_references(
    conn: &Connection,
    user: &WorkspaceUser,
    refs: &[&str],
) -> Result<HashMap<String, Result<ReferenceTarget>>> {
    let mut out: HashMap<String, Result<ReferenceTarget>> = HashMap::new();
    let mut parsed: Vec<(String, ObjectIdentifier)> = Vec::new();
    for r in refs {
        if out.contains_key(*r) || parsed.iter().any(|(s, _)| s == r) {
            continue;
        }
        match ObjectIdentifier::parse(r) {
            Ok(oi) => parsed.push((r.to_string(), oi)),
            Err(e) => {
                out.insert(r.to_string(), Err(e));
            }
        }
    }
    if parsed.is_empty() {
        return Ok(out);
    }

    let ids: Vec<ObjectIdentifier> = parsed.iter().map(|(_, oi)| oi.clone()).collect();
    let resolved = resolver::resolve_objects(conn, Some(user), &ids, Operation::Read, false)?;
    let keys: Vec<(i64, i64, i64)> = resolved
        .iter()
        .filter_map(|r| r.as_ref().ok().map(ResolvedObject::key))
        .collect();
    let versions = db::conn_versions_get(conn, &keys)?;

    for ((input, _), res) in parsed.into_iter().zip(resolved) {
        let target = res.and_then(|o| {
            let row = versions.get(&o.key()).ok_or_else(|| {
                WorkspaceError::Communication(format!("Missing version row for {}", o.reference()))
            })?;
            Ok(ReferenceTarget {
                reference: Reference::from(&o),
                type_string: row.type_string.clone(),
            })
        });
        out.insert(input, target);
    }
    Ok(out)
}

/// Maps a failed reference to its positional validation failure
pub(crate) fn reference_failure(kind: RefKind, reference: &str, err: &WorkspaceError) -> ValidationFailure {
    let reference = reference.to_string();
    let reason = err.to_string();
    match (kind, err.is_illegal_argument()) {
        (RefKind::Data, true) => ValidationFailure::UnparseableReference { reference, reason },
        (RefKind::Data, false) => ValidationFailure::InaccessibleReference { reference, reason },
        (RefKind::Provenance, true) => {
            ValidationFailure::UnparseableProvenanceReference { reference, reason }
        }
        (RefKind::Provenance, false) => {
            ValidationFailure::InaccessibleProvenanceReference { reference, reason }
        }
    }
}

/// Checks each reference's target type against the allowed set
pub(crate) fn check_reference_types(
    object_type: &AbsoluteTypeDefId,
    refs: &[ExtractedReference],
    resolved: &HashMap<String, ReferenceTarget>,
) -> std::result::Result<(), ValidationFailure> {
    for r in refs.iter().filter(|r| !r.allowed_types.is_empty()) {
        let Some(target) = resolved.get(&r.reference) else { continue };
        let allowed = AbsoluteTypeDefId::parse(&target.type_string)
            .map(|t| r.allowed_types.contains(&t.name))
            .unwrap_or(false);
        if !allowed {
            return Err(ValidationFailure::ReferenceTypeNotAllowed {
                reference_type: target.type_string.clone(),
                reference: r.reference.clone(),
                object_type: object_type.to_string(),
            });
        }
    }
    Ok(())
}

/// Rewrites every extracted reference in `data` to its absolute form.
///
/// Value references are replaced first. Map keys are renamed afterwards,
/// deepest maps first, failing when two keys of one map collapse into the
/// same absolute reference.
pub(crate) fn rewrite_references(
    data: &mut Value,
    refs: &[ExtractedReference],
    resolved: &HashMap<String, Reference>,
) -> std::result::Result<(), ValidationFailure> {
    let mut maps: BTreeSet<String> = BTreeSet::new();
    for r in refs {
        match &r.location {
            RefLocation::Value(pointer) => {
                if let (Some(slot), Some(abs)) = (data.pointer_mut(pointer), resolved.get(&r.reference)) {
                    *slot = Value::String(abs.to_string());
                }
            }
            RefLocation::MapKey(pointer) => {
                maps.insert(pointer.clone());
            }
        }
    }

    let mut pointers: Vec<String> = maps.into_iter().collect();
    pointers.sort_by_key(|p| std::cmp::Reverse(p.len()));
    for pointer in pointers {
        let Some(Value::Object(map)) = data.pointer_mut(&pointer) else { continue };
        let old = std::mem::take(map);
        let mut renamed = Map::with_capacity(old.len());
        let mut origin: HashMap<String, String> = HashMap::new();
        for (key, value) in old {
            let new_key = resolved
                .get(&key)
                .map(|r| r.to_string())
                .unwrap_or_else(|| key.clone());
            if let Some(first) = origin.get(&new_key) {
                return Err(ValidationFailure::DuplicateResolvedReference {
                    first: first.clone(),
                    second: key,
                    resolved: new_key,
                    location: if pointer.is_empty() { "/".to_string() } else { pointer.clone() },
                });
            }
            origin.insert(new_key.clone(), key);
            renamed.insert(new_key, value);
        }
        *map = renamed;
    }
    Ok(())
}

/// Every absolute reference a stored version holds, data and provenance
fn edges_of(row: &VersionRow) -> impl Iterator<Item = &String> {
    row.refs.iter().chain(row.prov_refs.iter())
}

/// Follows `chain` from `head`, returning the final object.
///
/// Hops are authorized by the edge alone: the hop's workspace only has to
/// exist and not be deleted, whatever the caller's permissions on it.
pub(crate) fn walk_chain(
    conn: &Connection,
    head: ResolvedObject,
    chain: &[ObjectIdentifier],
) -> Result<ResolvedObject> {
    let mut current = head;
    for hop in chain {
        let row = db::conn_version_get(conn, current.workspace.id, current.id, current.version)?
            .ok_or_else(|| {
                WorkspaceError::Communication(format!(
                    "Missing version row for {}",
                    current.reference()
                ))
            })?;
        let ws: ResolvedWorkspace = resolver::resolve_workspace(conn, hop.workspace(), false)
            .map_err(|e| WorkspaceError::inaccessible(hop.identifier_string(), e))?;
        let ptr = match hop.object() {
            ObjectSelector::Id(id) => db::conn_ptr_get(conn, ws.id, *id)?,
            ObjectSelector::Name(name) => db::conn_ptr_get_by_name(conn, ws.id, name)?,
        };

        // an unversioned hop follows whichever version the edge names
        let version = match (hop.version(), ptr.as_ref()) {
            (Some(v), _) => Some(v),
            (None, Some(p)) => edges_of(&row)
                .filter_map(|e| e.parse::<Reference>().ok())
                .filter(|r| r.workspace_id == ws.id && r.object_id == p.id)
                .map(|r| r.version)
                .max(),
            (None, None) => None,
        };
        let next = resolver::pin_version(&ws, hop.object(), ptr.as_ref(), version, true)?;
        let expected = Reference::from(&next).to_string();
        if !edges_of(&row).any(|e| *e == expected) {
            return Err(WorkspaceError::NoSuchReference(format!(
                "The object {} in workspace {} does not contain the reference {}",
                current.name, current.workspace.name, expected
            )));
        }
        current = next;
    }
    Ok(current)
}
