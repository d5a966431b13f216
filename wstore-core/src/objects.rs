//! Object-level operations on [`WorkspaceStore`]
//!
//! A save batch is validated in full before anything is written: targets,
//! permissions, type checks, references and sizes. Persistence then runs
//! object by object, each step atomic on its own.

use crate::blob::BlobId;
use crate::db::{self, AtomicCounter, Counter, Insert, NewVersion, PointerRow, VersionRow};
use crate::error::{Result, ValidationFailure, WorkspaceError};
use crate::ids::{validate_object_name, ObjectIdentifier, ObjectSelector, WorkspaceUser};
use crate::json;
use crate::model::{
    ListObjectsParams, Metadata, ObjectChain, ObjectInformation, SubObjectIdentifier,
    WorkspaceObjectData, WorkspaceSaveObject,
};
use crate::permissions::{Operation, Permission};
use crate::provenance::Provenance;
use crate::references::{self, RefKind, Reference, ReferenceTarget};
use crate::resolver::{self, ResolvedObject, ResolvedWorkspace};
use crate::types::{AbsoluteTypeDefId, ValidatedObject};
use crate::workspace::WorkspaceStore;
use bytes::Bytes;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Where one save item lands
#[derive(Debug, Clone)]
enum SaveTarget {
    Existing(PointerRow),
    NewNamed(String),
    NewAuto,
}

struct PendingSave {
    position: usize,
    target: Option<ObjectSelector>,
    data: Value,
    metadata: Metadata,
    provenance: Provenance,
    hidden: bool,
    validated: ValidatedObject,
}

/// A validated item ready to persist
struct PreparedSave {
    target: SaveTarget,
    hidden: bool,
    version: NewVersion,
    canonical: Vec<u8>,
}

/// One version to return, optionally restricted to some paths
struct Fetch {
    workspace_name: String,
    object_name: String,
    row: VersionRow,
    paths: Option<Vec<String>>,
}

fn object_info(
    workspace_name: &str,
    object_name: &str,
    row: &VersionRow,
    include_metadata: bool,
) -> Result<ObjectInformation> {
    Ok(ObjectInformation {
        object_id: row.obj_id,
        object_name: object_name.to_string(),
        type_string: row.type_string.clone(),
        saved_date: db::to_datetime(row.saved),
        version: row.ver,
        saved_by: WorkspaceUser::new(row.saved_by.clone())?,
        workspace_id: row.ws_id,
        workspace_name: workspace_name.to_string(),
        checksum: row.checksum.clone(),
        size: row.size as u64,
        metadata: include_metadata.then(|| row.metadata.clone()),
    })
}

fn version_row(conn: &Connection, o: &ResolvedObject) -> Result<VersionRow> {
    db::conn_version_get(conn, o.workspace.id, o.id, o.version)?.ok_or_else(|| {
        WorkspaceError::Communication(format!("Missing version row for {}", o.reference()))
    })
}

fn single(mut objects: Vec<ResolvedObject>) -> Result<ResolvedObject> {
    objects
        .pop()
        .ok_or_else(|| WorkspaceError::Communication("Resolution returned no object".into()))
}

/// Absolute references in first-seen order without repeats
fn dedup_refs<'a>(refs: impl Iterator<Item = &'a str>, resolved: &HashMap<String, Reference>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    refs.filter_map(|r| resolved.get(r))
        .filter(|r| seen.insert(**r))
        .map(|r| r.to_string())
        .collect()
}

/// Inserts a named pointer; a name race adopts the winner's object.
///
/// Returns the object id and whether this call created the pointer.
fn create_named(conn: &Connection, ws_id: i64, obj_id: i64, name: &str, hidden: bool) -> Result<(i64, bool)> {
    for _ in 0..2 {
        if db::conn_ptr_insert(conn, ws_id, obj_id, name, hidden)? == Insert::Inserted {
            return Ok((obj_id, true));
        }
        warn!(workspace_id = ws_id, name, "object name taken concurrently, re-resolving");
        if let Some(existing) = db::conn_ptr_get_by_name(conn, ws_id, name)? {
            return Ok((existing.id, false));
        }
    }
    Err(WorkspaceError::Communication(format!(
        "Unable to create object {} in workspace {}",
        name, ws_id
    )))
}

/// Inserts a pointer named `auto<id>`, adding a numeric suffix when that is taken
fn create_auto(conn: &Connection, ws_id: i64, obj_id: i64, hidden: bool) -> Result<String> {
    let taken = db::conn_ptr_names_with_prefix(conn, ws_id, &auto_base(obj_id))?;
    create_auto_from(conn, ws_id, obj_id, hidden, taken)
}

/// Picks the first free auto name against `taken`; a lost race re-reads the names once.
fn create_auto_from(
    conn: &Connection,
    ws_id: i64,
    obj_id: i64,
    hidden: bool,
    mut taken: HashSet<String>,
) -> Result<String> {
    let base = auto_base(obj_id);
    for attempt in 0..2 {
        if attempt > 0 {
            taken = db::conn_ptr_names_with_prefix(conn, ws_id, &base)?;
        }
        let mut name = base.clone();
        let mut suffix = 1;
        while taken.contains(&name) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        if db::conn_ptr_insert(conn, ws_id, obj_id, &name, hidden)? == Insert::Inserted {
            return Ok(name);
        }
        warn!(workspace_id = ws_id, name = %name, "auto name taken concurrently, retrying");
    }
    Err(WorkspaceError::Communication(format!(
        "Unable to allocate a name for object {} in workspace {}",
        obj_id, ws_id
    )))
}

fn auto_base(obj_id: i64) -> String {
    format!("auto{}", obj_id)
}

fn save_targets(conn: &Connection, ws: &ResolvedWorkspace, items: &[PendingSave]) -> Result<Vec<SaveTarget>> {
    let lookups: Vec<(i64, &ObjectSelector)> = items
        .iter()
        .filter_map(|p| p.target.as_ref().map(|t| (ws.id, t)))
        .collect();
    let (by_id, by_name) = resolver::lookup_pointers(conn, &lookups)?;
    items
        .iter()
        .map(|p| match &p.target {
            None => Ok(SaveTarget::NewAuto),
            Some(ObjectSelector::Id(id)) => by_id
                .get(&(ws.id, *id))
                .cloned()
                .map(SaveTarget::Existing)
                .ok_or_else(|| {
                    WorkspaceError::NoSuchObject(format!("There is no object with id {}", id))
                }),
            Some(ObjectSelector::Name(name)) => Ok(by_name
                .get(&(ws.id, name.clone()))
                .cloned()
                .map(SaveTarget::Existing)
                .unwrap_or_else(|| SaveTarget::NewNamed(name.clone()))),
        })
        .collect()
}

impl WorkspaceStore {
    /// Saves a batch of objects into one workspace, returning their info in input order
    pub async fn save_objects(
        &self,
        user: &WorkspaceUser,
        wsi: &crate::ids::WorkspaceIdentifier,
        objects: Vec<WorkspaceSaveObject>,
    ) -> Result<Vec<ObjectInformation>> {
        if objects.is_empty() {
            return Err(WorkspaceError::illegal("No data provided"));
        }
        let ws = {
            let conn = self.db.conn()?;
            resolver::authorized_workspace(&conn, Some(user), wsi, Operation::Write, false)?
        };
        debug!(workspace_id = ws.id, count = objects.len(), "saving objects");

        let mut pending = Vec::with_capacity(objects.len());
        for (i, obj) in objects.into_iter().enumerate() {
            let position = i + 1;
            self.resources.check_metadata(&obj.metadata)?;
            let validated = self
                .validator
                .validate(&obj.type_id, &obj.data)
                .map_err(|e| WorkspaceError::validation(position, ValidationFailure::TypeCheck(e.0)))?;
            if let Some(subdata) = &validated.subdata {
                let size = serde_json::to_vec(subdata)?.len() as u64;
                self.resources.check_subdata_size(position, size)?;
            }
            self.resources.check_provenance_size(position, obj.provenance.size()?)?;
            pending.push(PendingSave {
                position,
                target: obj.target,
                data: obj.data,
                metadata: obj.metadata,
                provenance: obj.provenance,
                hidden: obj.hidden,
                validated,
            });
        }

        let (targets, resolved) = {
            let conn = self.db.conn()?;
            let targets = save_targets(&conn, &ws, &pending)?;
            let all_refs: Vec<&str> = pending
                .iter()
                .flat_map(|p| {
                    p.validated
                        .references
                        .iter()
                        .map(|r| r.reference.as_str())
                        .chain(p.provenance.references())
                })
                .collect();
            let resolved = references::resolve_references(&conn, user, &all_refs)?;
            (targets, resolved)
        };

        let mut prepared = Vec::with_capacity(pending.len());
        for (mut p, target) in pending.into_iter().zip(targets) {
            let position = p.position;
            let mut absolute: HashMap<String, Reference> = HashMap::new();
            let mut typed: HashMap<String, ReferenceTarget> = HashMap::new();
            let data_refs = p.validated.references.iter().map(|r| (RefKind::Data, r.reference.as_str()));
            let prov_refs = p.provenance.references().map(|r| (RefKind::Provenance, r));
            for (kind, r) in data_refs.chain(prov_refs) {
                match resolved.get(r) {
                    Some(Ok(t)) => {
                        absolute.insert(r.to_string(), t.reference);
                        if kind == RefKind::Data {
                            typed.insert(r.to_string(), t.clone());
                        }
                    }
                    Some(Err(e)) => {
                        let failure = references::reference_failure(kind, r, e);
                        return Err(WorkspaceError::validation(position, failure));
                    }
                    None => {
                        return Err(WorkspaceError::Communication(format!(
                            "Reference {} was not resolved",
                            r
                        )))
                    }
                }
            }
            references::check_reference_types(&p.validated.type_id, &p.validated.references, &typed)
                .map_err(|f| WorkspaceError::validation(position, f))?;
            references::rewrite_references(&mut p.data, &p.validated.references, &absolute)
                .map_err(|f| WorkspaceError::validation(position, f))?;

            let canonical = json::canonical_bytes(&p.data)?;
            self.resources.check_object_size(position, canonical.len() as u64)?;
            let refs = dedup_refs(
                p.validated.references.iter().map(|r| r.reference.as_str()),
                &absolute,
            );
            let prov_refs = dedup_refs(p.provenance.references(), &absolute);
            let provenance = p
                .provenance
                .with_resolved(|r| absolute.get(r).map(|a| a.to_string()));
            prepared.push(PreparedSave {
                target,
                hidden: p.hidden,
                version: NewVersion {
                    type_string: p.validated.type_id.type_string(),
                    blob: String::new(),
                    checksum: json::checksum(&canonical),
                    size: canonical.len() as i64,
                    saved_by: user.to_string(),
                    saved: 0,
                    metadata: p.metadata,
                    provenance,
                    refs,
                    prov_refs,
                    copied: None,
                    reverted: None,
                },
                canonical,
            });
        }

        let total: u64 = prepared.iter().map(|p| p.canonical.len() as u64).sum();
        let in_memory = self.resources.incoming_in_memory(total);
        debug!(workspace_id = ws.id, total, in_memory, "validated save batch");
        let mut spooled = Vec::with_capacity(prepared.len());
        for p in prepared.iter_mut() {
            let canonical = std::mem::take(&mut p.canonical);
            spooled.push(self.resources.spool(Bytes::from(canonical), in_memory)?);
        }
        for (p, data) in prepared.iter_mut().zip(&spooled) {
            let id = self.blobs.put(data.bytes()?).await?;
            p.version.blob = id.to_hex();
        }
        self.blobs.persist()?;

        let conn = self.db.conn()?;
        let new_objects = {
            let mut names = BTreeSet::new();
            prepared
                .iter()
                .filter(|p| match &p.target {
                    SaveTarget::NewAuto => true,
                    SaveTarget::NewNamed(n) => names.insert(n.clone()),
                    SaveTarget::Existing(_) => false,
                })
                .count() as i64
        };
        let mut next_id = if new_objects > 0 {
            let last = conn.fetch_add(Counter::Objects { ws_id: ws.id }, new_objects)?;
            debug!(workspace_id = ws.id, first = last - new_objects + 1, last, "allocated object ids");
            last - new_objects + 1
        } else {
            0
        };

        let mut created: HashMap<String, i64> = HashMap::new();
        let mut out = Vec::with_capacity(prepared.len());
        for mut p in prepared {
            let (obj_id, name) = match p.target {
                SaveTarget::Existing(ptr) => (ptr.id, ptr.name),
                SaveTarget::NewNamed(name) => match created.get(&name) {
                    Some(id) => (*id, name),
                    None => {
                        let (id, _) = create_named(&conn, ws.id, next_id, &name, p.hidden)?;
                        next_id += 1;
                        created.insert(name.clone(), id);
                        (id, name)
                    }
                },
                SaveTarget::NewAuto => {
                    let id = next_id;
                    next_id += 1;
                    let name = create_auto(&conn, ws.id, id, p.hidden)?;
                    created.insert(name.clone(), id);
                    (id, name)
                }
            };
            p.version.saved = db::now_millis();
            let ver = db::conn_version_push(&conn, ws.id, obj_id, &p.version, true)?;
            let row = db::conn_version_get(&conn, ws.id, obj_id, ver)?.ok_or_else(|| {
                WorkspaceError::Communication(format!("Version {}/{}/{} vanished", ws.id, obj_id, ver))
            })?;
            out.push(object_info(&ws.name, &name, &row, true)?);
        }
        db::conn_ws_touch(&conn, ws.id)?;
        Ok(out)
    }

    async fn fetch(&self, items: Vec<Fetch>) -> Result<Vec<WorkspaceObjectData>> {
        let total: u64 = items.iter().map(|f| f.row.size as u64).sum();
        self.resources.check_return_size(total)?;
        let in_memory = self.resources.returned_in_memory(total);
        debug!(count = items.len(), total, in_memory, "returning objects");

        let mut out = Vec::with_capacity(items.len());
        for f in items {
            let mut bytes = self.blobs.get(BlobId::from_hex(&f.row.blob)?).await?;
            if let Some(paths) = &f.paths {
                let value: Value = serde_json::from_slice(&bytes)?;
                let subset = json::extract_paths(&value, paths)?;
                bytes = Bytes::from(json::canonical_bytes(&subset)?);
            }
            out.push(WorkspaceObjectData {
                data: self.resources.spool(bytes, in_memory)?,
                info: object_info(&f.workspace_name, &f.object_name, &f.row, true)?,
                provenance: f.row.provenance.clone(),
                references: f.row.refs.clone(),
                copied_from: f.row.copied.clone(),
                reverted_from: f.row.reverted,
            });
        }
        Ok(out)
    }

    fn fetches(
        conn: &Connection,
        objects: Vec<ResolvedObject>,
        paths: Vec<Option<Vec<String>>>,
    ) -> Result<Vec<Fetch>> {
        let keys: Vec<(i64, i64, i64)> = objects.iter().map(ResolvedObject::key).collect();
        let rows = db::conn_versions_get(conn, &keys)?;
        objects
            .into_iter()
            .zip(paths)
            .map(|(o, paths)| {
                let row = match rows.get(&o.key()) {
                    Some(row) => row.clone(),
                    None => version_row(conn, &o)?,
                };
                Ok(Fetch {
                    workspace_name: o.workspace.name,
                    object_name: o.name,
                    row,
                    paths,
                })
            })
            .collect()
    }

    pub async fn get_objects(
        &self,
        user: Option<&WorkspaceUser>,
        ids: &[ObjectIdentifier],
    ) -> Result<Vec<WorkspaceObjectData>> {
        let items = {
            let conn = self.db.conn()?;
            let objects = resolver::resolve_objects_strict(&conn, user, ids, Operation::Read, false)?;
            let paths = vec![None; objects.len()];
            Self::fetches(&conn, objects, paths)?
        };
        self.fetch(items).await
    }

    /// Objects restricted to JSON pointer paths; each subset counts the full object size
    pub async fn get_object_subsets(
        &self,
        user: Option<&WorkspaceUser>,
        subsets: &[SubObjectIdentifier],
    ) -> Result<Vec<WorkspaceObjectData>> {
        let items = {
            let conn = self.db.conn()?;
            let ids: Vec<ObjectIdentifier> = subsets.iter().map(|s| s.object.clone()).collect();
            let objects = resolver::resolve_objects_strict(&conn, user, &ids, Operation::Read, false)?;
            let paths = subsets.iter().map(|s| Some(s.paths.clone())).collect();
            Self::fetches(&conn, objects, paths)?
        };
        self.fetch(items).await
    }

    /// Follows each chain from its readable head; hops need only a stored reference edge
    pub async fn get_referenced_objects(
        &self,
        user: Option<&WorkspaceUser>,
        chains: &[ObjectChain],
    ) -> Result<Vec<WorkspaceObjectData>> {
        if chains.is_empty() {
            return Err(WorkspaceError::illegal("No object identifiers provided"));
        }
        let items = {
            let conn = self.db.conn()?;
            let heads: Vec<ObjectIdentifier> = chains.iter().map(|c| c.head.clone()).collect();
            let heads = resolver::resolve_objects_strict(&conn, user, &heads, Operation::Read, false)?;
            let mut ends = Vec::with_capacity(chains.len());
            for (head, chain) in heads.into_iter().zip(chains) {
                ends.push(references::walk_chain(&conn, head, &chain.chain)?);
            }
            let paths = vec![None; ends.len()];
            Self::fetches(&conn, ends, paths)?
        };
        self.fetch(items).await
    }

    /// Object info without data; in tolerant mode unreachable entries become `None`
    pub async fn get_object_information(
        &self,
        user: Option<&WorkspaceUser>,
        ids: &[ObjectIdentifier],
        include_metadata: bool,
        except_on_missing: bool,
    ) -> Result<Vec<Option<ObjectInformation>>> {
        let conn = self.db.conn()?;
        let resolved = resolver::resolve_objects(&conn, user, ids, Operation::Read, false)?;
        let mut objects = Vec::with_capacity(resolved.len());
        for r in resolved {
            match r {
                Ok(o) => objects.push(Some(o)),
                Err(e) if !except_on_missing && e.is_inaccessible() => objects.push(None),
                Err(e) => return Err(e),
            }
        }
        let keys: Vec<(i64, i64, i64)> = objects.iter().flatten().map(ResolvedObject::key).collect();
        let rows = db::conn_versions_get(&conn, &keys)?;
        objects
            .into_iter()
            .map(|o| match o {
                None => Ok(None),
                Some(o) => {
                    let row = match rows.get(&o.key()) {
                        Some(row) => row.clone(),
                        None => version_row(&conn, &o)?,
                    };
                    object_info(&o.workspace.name, &o.name, &row, include_metadata).map(Some)
                }
            })
            .collect()
    }

    /// Every version of one object, oldest first
    pub async fn get_object_history(
        &self,
        user: Option<&WorkspaceUser>,
        id: &ObjectIdentifier,
    ) -> Result<Vec<ObjectInformation>> {
        let conn = self.db.conn()?;
        let ids = [id.without_version()];
        let o = single(resolver::resolve_objects_strict(&conn, user, &ids, Operation::Read, false)?)?;
        db::conn_versions_of(&conn, o.workspace.id, o.id, None)?
            .iter()
            .map(|row| object_info(&o.workspace.name, &o.name, row, true))
            .collect()
    }

    pub async fn list_objects(
        &self,
        user: Option<&WorkspaceUser>,
        params: &ListObjectsParams,
    ) -> Result<Vec<ObjectInformation>> {
        let conn = self.db.conn()?;
        let workspaces: Vec<ResolvedWorkspace> = if params.workspaces.is_empty() {
            let rows: Vec<_> = db::conn_ws_all(&conn)?.into_iter().filter(|r| !r.deleted).collect();
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let perms = resolver::permissions(&conn, user, &ids)?;
            rows.iter()
                .filter(|r| perms.get(&r.id).is_some_and(|p| p.effective() >= Permission::Read))
                .map(ResolvedWorkspace::from)
                .collect()
        } else {
            let mut resolved =
                resolver::authorized_workspaces(&conn, user, &params.workspaces, Operation::Read)?;
            let mut out = Vec::new();
            for wsi in &params.workspaces {
                if let Some(r) = resolved.remove(wsi) {
                    out.push(r?);
                }
            }
            out
        };

        let names: HashMap<i64, String> = workspaces.iter().map(|w| (w.id, w.name.clone())).collect();
        let ids: Vec<i64> = names.keys().copied().collect();
        let mut out = Vec::new();
        for (ptr, row) in db::conn_list_versions(&conn, &ids, params.show_all_versions)? {
            if ptr.hidden && !params.show_hidden {
                continue;
            }
            if ptr.deleted && !params.show_deleted {
                continue;
            }
            if let Some(type_name) = &params.type_name {
                let matches = AbsoluteTypeDefId::parse(&row.type_string).is_some_and(|t| &t.name == type_name);
                if !matches {
                    continue;
                }
            }
            if let Some(saved_by) = &params.saved_by {
                if row.saved_by != saved_by.as_str() {
                    continue;
                }
            }
            let ws_name = names.get(&ptr.ws_id).map(String::as_str).unwrap_or_default();
            out.push(object_info(ws_name, &ptr.name, &row, params.include_metadata)?);
        }
        Ok(out)
    }

    /// Copies `from` into `to`.
    ///
    /// Copying a whole object into a new destination carries over its full
    /// history. A versioned source, or an existing destination, gets one new
    /// version.
    pub async fn copy_object(
        &self,
        user: &WorkspaceUser,
        from: &ObjectIdentifier,
        to: &ObjectIdentifier,
    ) -> Result<ObjectInformation> {
        let conn = self.db.conn()?;
        let src = single(resolver::resolve_objects_strict(
            &conn,
            Some(user),
            std::slice::from_ref(from),
            Operation::Read,
            false,
        )?)?;
        let dst_ws = resolver::authorized_workspace(&conn, Some(user), to.workspace(), Operation::Write, false)
            .map_err(|e| WorkspaceError::inaccessible(to.identifier_string(), e))?;

        let existing = match to.object() {
            ObjectSelector::Id(id) => Some(db::conn_ptr_get(&conn, dst_ws.id, *id)?.ok_or_else(|| {
                WorkspaceError::NoSuchObject(format!(
                    "Copy destination is specified as object id {} in workspace {} which does not exist.",
                    id, dst_ws.id
                ))
            })?),
            ObjectSelector::Name(name) => db::conn_ptr_get_by_name(&conn, dst_ws.id, name)?,
        };

        let (obj_id, name, created) = match existing {
            Some(ptr) => (ptr.id, ptr.name, false),
            None => {
                let name = to.object().identifier_string();
                let id = conn.fetch_add(Counter::Objects { ws_id: dst_ws.id }, 1)?;
                let (id, created) = create_named(&conn, dst_ws.id, id, &name, src.hidden)?;
                (id, name, created)
            }
        };
        let history = if created && from.version().is_none() {
            db::conn_versions_of(&conn, src.workspace.id, src.id, Some(src.version))?
        } else {
            vec![version_row(&conn, &src)?]
        };

        let mut last = None;
        for row in &history {
            let mut nv = row.to_new_version();
            nv.copied = Some(format!("{}/{}/{}", row.ws_id, row.obj_id, row.ver));
            nv.reverted = None;
            nv.saved_by = user.to_string();
            nv.saved = db::now_millis();
            last = Some(db::conn_version_push(&conn, dst_ws.id, obj_id, &nv, false)?);
        }
        db::conn_ws_touch(&conn, dst_ws.id)?;
        debug!(from = %src.reference(), workspace_id = dst_ws.id, obj_id, versions = history.len(), "copied object");

        let ver = last.ok_or_else(|| WorkspaceError::Communication("Copy wrote no versions".into()))?;
        let row = db::conn_version_get(&conn, dst_ws.id, obj_id, ver)?
            .ok_or_else(|| WorkspaceError::Communication("Copied version vanished".into()))?;
        object_info(&dst_ws.name, &name, &row, true)
    }

    /// Appends a version whose content equals the given version
    pub async fn revert_object(&self, user: &WorkspaceUser, id: &ObjectIdentifier) -> Result<ObjectInformation> {
        let conn = self.db.conn()?;
        let o = single(resolver::resolve_objects_strict(
            &conn,
            Some(user),
            std::slice::from_ref(id),
            Operation::Write,
            false,
        )?)?;
        let source = version_row(&conn, &o)?;
        let mut nv = source.to_new_version();
        nv.copied = None;
        nv.reverted = Some(o.version);
        nv.saved_by = user.to_string();
        nv.saved = db::now_millis();
        let ver = db::conn_version_push(&conn, o.workspace.id, o.id, &nv, false)?;
        db::conn_ws_touch(&conn, o.workspace.id)?;
        let row = db::conn_version_get(&conn, o.workspace.id, o.id, ver)?
            .ok_or_else(|| WorkspaceError::Communication("Reverted version vanished".into()))?;
        object_info(&o.workspace.name, &o.name, &row, true)
    }

    pub async fn rename_object(
        &self,
        user: &WorkspaceUser,
        id: &ObjectIdentifier,
        new_name: &str,
    ) -> Result<ObjectInformation> {
        validate_object_name(new_name)?;
        let conn = self.db.conn()?;
        let ids = [id.without_version()];
        let o = single(resolver::resolve_objects_strict(
            &conn,
            Some(user),
            &ids,
            Operation::RenameObjects,
            false,
        )?)?;
        if o.name == new_name {
            return Err(WorkspaceError::illegal(format!("Object is already named {}", new_name)));
        }
        if db::conn_ptr_rename(&conn, o.workspace.id, o.id, new_name)? == Insert::Duplicate {
            return Err(WorkspaceError::illegal(format!(
                "There is already an object in the workspace named {}",
                new_name
            )));
        }
        db::conn_ws_touch(&conn, o.workspace.id)?;
        let row = version_row(&conn, &o)?;
        object_info(&o.workspace.name, new_name, &row, true)
    }

    pub async fn set_objects_deleted(
        &self,
        user: &WorkspaceUser,
        ids: &[ObjectIdentifier],
        delete: bool,
    ) -> Result<()> {
        let op = if delete {
            Operation::DeleteObjects
        } else {
            Operation::UndeleteObjects
        };
        let ids: Vec<ObjectIdentifier> = ids.iter().map(ObjectIdentifier::without_version).collect();
        let conn = self.db.conn()?;
        let objects = resolver::resolve_objects_strict(&conn, Some(user), &ids, op, true)?;
        for (ws_id, obj_ids) in group_by_workspace(&objects) {
            db::conn_ptr_set_deleted(&conn, ws_id, &obj_ids, delete)?;
            db::conn_ws_touch(&conn, ws_id)?;
        }
        debug!(count = objects.len(), deleted = delete, "set objects deleted flag");
        Ok(())
    }

    pub async fn set_objects_hidden(
        &self,
        user: &WorkspaceUser,
        ids: &[ObjectIdentifier],
        hide: bool,
    ) -> Result<()> {
        let op = if hide {
            Operation::HideObjects
        } else {
            Operation::UnhideObjects
        };
        let ids: Vec<ObjectIdentifier> = ids.iter().map(ObjectIdentifier::without_version).collect();
        let conn = self.db.conn()?;
        let objects = resolver::resolve_objects_strict(&conn, Some(user), &ids, op, false)?;
        for (ws_id, obj_ids) in group_by_workspace(&objects) {
            db::conn_ptr_set_hidden(&conn, ws_id, &obj_ids, hide)?;
            db::conn_ws_touch(&conn, ws_id)?;
        }
        Ok(())
    }

    /// Versions referencing each target that the caller can read and that are not deleted
    pub async fn get_referencing_objects(
        &self,
        user: Option<&WorkspaceUser>,
        targets: &[ObjectIdentifier],
    ) -> Result<Vec<Vec<ObjectInformation>>> {
        let conn = self.db.conn()?;
        let targets = resolver::resolve_objects_strict(&conn, user, targets, Operation::Read, false)?;
        let mut out = Vec::with_capacity(targets.len());
        for t in &targets {
            let sources = db::conn_edges_sources(&conn, &t.reference())?;
            let ptr_keys: Vec<(i64, i64)> = sources.iter().map(|(w, o, _)| (*w, *o)).collect();
            let pointers = db::conn_ptr_by_ids(&conn, &ptr_keys)?;
            let mut ws_ids: Vec<i64> = sources.iter().map(|(w, _, _)| *w).collect();
            ws_ids.sort_unstable();
            ws_ids.dedup();
            let workspaces = db::conn_ws_by_ids(&conn, &ws_ids)?;
            let perms = resolver::permissions(&conn, user, &ws_ids)?;

            let visible: Vec<(i64, i64, i64)> = sources
                .into_iter()
                .filter(|(w, o, _)| {
                    let live = pointers.get(&(*w, *o)).is_some_and(|p| !p.deleted);
                    let ws_ok = workspaces.get(w).is_some_and(|ws| !ws.deleted);
                    let readable = perms.get(w).is_some_and(|p| p.effective() >= Permission::Read);
                    live && ws_ok && readable
                })
                .collect();
            let rows = db::conn_versions_get(&conn, &visible)?;
            let mut infos = Vec::with_capacity(visible.len());
            for key in &visible {
                let (Some(row), Some(ptr), Some(ws)) =
                    (rows.get(key), pointers.get(&(key.0, key.1)), workspaces.get(&key.0))
                else {
                    continue;
                };
                infos.push(object_info(&ws.name, &ptr.name, row, true)?);
            }
            out.push(infos);
        }
        Ok(out)
    }

    /// Number of stored reference edges to each target, deleted referrers included
    pub async fn get_referencing_object_counts(
        &self,
        user: Option<&WorkspaceUser>,
        targets: &[ObjectIdentifier],
    ) -> Result<Vec<i64>> {
        let conn = self.db.conn()?;
        let targets = resolver::resolve_objects_strict(&conn, user, targets, Operation::Read, false)?;
        targets
            .iter()
            .map(|t| db::conn_edges_count(&conn, &t.reference()))
            .collect()
    }
}

fn group_by_workspace(objects: &[ResolvedObject]) -> Vec<(i64, Vec<i64>)> {
    let mut groups: Vec<(i64, Vec<i64>)> = Vec::new();
    for o in objects {
        match groups.iter_mut().find(|(ws, _)| *ws == o.workspace.id) {
            Some((_, ids)) => ids.push(o.id),
            None => groups.push((o.workspace.id, vec![o.id])),
        }
    }
    groups
}
