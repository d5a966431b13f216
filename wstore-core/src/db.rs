//! SQLite-backed metadata store
//!
//! Workspaces, ACLs, object pointers, versions and the reference-edge index
//! live in one SQLite database in WAL mode. All cross-request coordination
//! goes through two primitives: fetch-and-increment counters and
//! unique-constraint inserts.

use crate::error::{Result, WorkspaceError};
use crate::lock::LockState;
use crate::model::Metadata;
use crate::permissions::Permission;
use crate::provenance::Provenance;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS workspaces (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    owner TEXT NOT NULL,
    moddate INTEGER NOT NULL,
    description TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    num_objects INTEGER NOT NULL DEFAULT 0,
    lock_state INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS workspace_acls (
    ws_id INTEGER NOT NULL,
    user TEXT NOT NULL,
    perm INTEGER NOT NULL,
    PRIMARY KEY (ws_id, user)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS acl_user ON workspace_acls (user);
CREATE TABLE IF NOT EXISTS pointers (
    ws_id INTEGER NOT NULL,
    id INTEGER NOT NULL,
    name TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0,
    num_versions INTEGER NOT NULL DEFAULT 0,
    moddate INTEGER NOT NULL,
    PRIMARY KEY (ws_id, id),
    UNIQUE (ws_id, name)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS versions (
    ws_id INTEGER NOT NULL,
    obj_id INTEGER NOT NULL,
    ver INTEGER NOT NULL,
    type TEXT NOT NULL,
    blob TEXT NOT NULL,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    saved_by TEXT NOT NULL,
    saved INTEGER NOT NULL,
    metadata TEXT NOT NULL,
    provenance TEXT NOT NULL,
    refs TEXT NOT NULL,
    prov_refs TEXT NOT NULL,
    copied TEXT,
    reverted INTEGER,
    PRIMARY KEY (ws_id, obj_id, ver)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS reference_edges (
    target TEXT NOT NULL,
    ws_id INTEGER NOT NULL,
    obj_id INTEGER NOT NULL,
    ver INTEGER NOT NULL,
    PRIMARY KEY (target, ws_id, obj_id, ver)
) WITHOUT ROWID;
";

const WS_COLUMNS: &str =
    "id, name, owner, moddate, description, deleted, num_objects, lock_state, metadata";
const PTR_COLUMNS: &str = "ws_id, id, name, deleted, hidden, num_versions";
const VER_COLUMNS: &str = "ws_id, obj_id, ver, type, blob, checksum, size, saved_by, saved, \
                           metadata, provenance, refs, prov_refs, copied, reverted";

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn pair_placeholders(n: usize) -> String {
    vec!["(?,?)"; n].join(",")
}

/// True when `e` is a UNIQUE or PRIMARY KEY violation
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Outcome of a unique-constraint insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insert {
    Inserted,
    Duplicate,
}

fn unique_insert(result: rusqlite::Result<usize>) -> Result<Insert> {
    match result {
        Ok(_) => Ok(Insert::Inserted),
        Err(e) if is_unique_violation(&e) => Ok(Insert::Duplicate),
        Err(e) => Err(e.into()),
    }
}

/// Atomic counters scoped to the store, a workspace or an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Workspaces,
    Objects { ws_id: i64 },
    Versions { ws_id: i64, obj_id: i64 },
}

/// Fetch-and-increment over the backing store
pub trait AtomicCounter {
    /// Adds `delta` and returns the new value
    fn fetch_add(&self, counter: Counter, delta: i64) -> Result<i64>;
}

impl AtomicCounter for Connection {
    fn fetch_add(&self, counter: Counter, delta: i64) -> Result<i64> {
        let value: Option<i64> = match counter {
            Counter::Workspaces => self
                .query_row(
                    "INSERT INTO counters (name, value) VALUES ('workspaces', ?1) \
                     ON CONFLICT(name) DO UPDATE SET value = value + excluded.value \
                     RETURNING value",
                    params![delta],
                    |r| r.get(0),
                )
                .optional()?,
            Counter::Objects { ws_id } => self
                .query_row(
                    "UPDATE workspaces SET num_objects = num_objects + ?1 WHERE id = ?2 \
                     RETURNING num_objects",
                    params![delta, ws_id],
                    |r| r.get(0),
                )
                .optional()?,
            Counter::Versions { ws_id, obj_id } => self
                .query_row(
                    "UPDATE pointers SET num_versions = num_versions + ?1 \
                     WHERE ws_id = ?2 AND id = ?3 RETURNING num_versions",
                    params![delta, ws_id, obj_id],
                    |r| r.get(0),
                )
                .optional()?,
        };
        value.ok_or_else(|| {
            WorkspaceError::Communication(format!("Counter {:?} has no backing row", counter))
        })
    }
}

/// Handle on the metadata database
pub struct MetadataDb {
    conn: Mutex<Connection>,
}

impl MetadataDb {
    /// Open or create the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WorkspaceError::Communication("Metadata store lock poisoned".into()))
    }

    /// Stable identifier of this store, created on first open
    pub fn instance_id(&self) -> Result<String> {
        let conn = self.conn()?;
        if let Some(id) = conn
            .query_row("SELECT value FROM settings WHERE key = 'instance_id'", [], |r| r.get(0))
            .optional()?
        {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('instance_id', ?1)",
            params![id],
        )?;
        Ok(conn.query_row("SELECT value FROM settings WHERE key = 'instance_id'", [], |r| r.get(0))?)
    }
}

// ---------------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct WorkspaceRow {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub moddate: i64,
    pub description: Option<String>,
    pub deleted: bool,
    pub num_objects: i64,
    pub lock_state: LockState,
    pub metadata: Metadata,
}

fn ws_from_row(row: &Row) -> rusqlite::Result<WorkspaceRow> {
    let lock: i64 = row.get(7)?;
    Ok(WorkspaceRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        moddate: row.get(3)?,
        description: row.get(4)?,
        deleted: row.get(5)?,
        num_objects: row.get(6)?,
        lock_state: LockState::from_i64(lock)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Integer, Box::new(e)))?,
        metadata: json_col(row, 8)?,
    })
}

pub(crate) struct NewWorkspace<'a> {
    pub id: i64,
    pub name: &'a str,
    pub owner: &'a str,
    pub description: Option<&'a str>,
    pub metadata: &'a Metadata,
}

pub(crate) fn conn_ws_insert(conn: &Connection, ws: &NewWorkspace<'_>) -> Result<Insert> {
    let meta = serde_json::to_string(ws.metadata)?;
    unique_insert(conn.execute(
        "INSERT INTO workspaces (id, name, owner, moddate, description, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![ws.id, ws.name, ws.owner, now_millis(), ws.description, meta],
    ))
}

pub(crate) fn conn_ws_get(conn: &Connection, id: i64) -> Result<Option<WorkspaceRow>> {
    let sql = format!("SELECT {} FROM workspaces WHERE id = ?1", WS_COLUMNS);
    Ok(conn.query_row(&sql, params![id], ws_from_row).optional()?)
}

pub(crate) fn conn_ws_by_ids(conn: &Connection, ids: &[i64]) -> Result<HashMap<i64, WorkspaceRow>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {} FROM workspaces WHERE id IN ({})",
        WS_COLUMNS,
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), ws_from_row)?;
    let mut out = HashMap::new();
    for row in rows {
        let row = row?;
        out.insert(row.id, row);
    }
    Ok(out)
}

pub(crate) fn conn_ws_by_names(
    conn: &Connection,
    names: &[String],
) -> Result<HashMap<String, WorkspaceRow>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {} FROM workspaces WHERE name IN ({})",
        WS_COLUMNS,
        placeholders(names.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(names.iter()), ws_from_row)?;
    let mut out = HashMap::new();
    for row in rows {
        let row = row?;
        out.insert(row.name.clone(), row);
    }
    Ok(out)
}

pub(crate) fn conn_ws_all(conn: &Connection) -> Result<Vec<WorkspaceRow>> {
    let sql = format!("SELECT {} FROM workspaces ORDER BY id", WS_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], ws_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Bumps the modification date, keeping it strictly increasing
pub(crate) fn conn_ws_touch(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE workspaces SET moddate = MAX(?1, moddate + 1) WHERE id = ?2",
        params![now_millis(), id],
    )?;
    Ok(())
}

pub(crate) fn conn_ws_set_description(conn: &Connection, id: i64, desc: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE workspaces SET description = ?1 WHERE id = ?2",
        params![desc, id],
    )?;
    conn_ws_touch(conn, id)
}

pub(crate) fn conn_ws_set_metadata(conn: &Connection, id: i64, meta: &Metadata) -> Result<()> {
    conn.execute(
        "UPDATE workspaces SET metadata = ?1 WHERE id = ?2",
        params![serde_json::to_string(meta)?, id],
    )?;
    conn_ws_touch(conn, id)
}

pub(crate) fn conn_ws_rename(conn: &Connection, id: i64, name: &str) -> Result<Insert> {
    let outcome = unique_insert(conn.execute(
        "UPDATE workspaces SET name = ?1 WHERE id = ?2",
        params![name, id],
    ))?;
    if outcome == Insert::Inserted {
        conn_ws_touch(conn, id)?;
    }
    Ok(outcome)
}

pub(crate) fn conn_ws_set_deleted(conn: &Connection, id: i64, deleted: bool) -> Result<()> {
    conn.execute(
        "UPDATE workspaces SET deleted = ?1 WHERE id = ?2",
        params![deleted, id],
    )?;
    conn_ws_touch(conn, id)
}

pub(crate) fn conn_ws_set_lock_state(conn: &Connection, id: i64, state: LockState) -> Result<()> {
    conn.execute(
        "UPDATE workspaces SET lock_state = ?1 WHERE id = ?2",
        params![state.as_i64(), id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ACLs
// ---------------------------------------------------------------------------

/// Entries for `subjects` on one workspace
pub(crate) fn conn_acl_get(
    conn: &Connection,
    ws_id: i64,
    subjects: &[&str],
) -> Result<HashMap<String, Permission>> {
    if subjects.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT user, perm FROM workspace_acls WHERE ws_id = ? AND user IN ({})",
        placeholders(subjects.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut args: Vec<rusqlite::types::Value> = vec![ws_id.into()];
    args.extend(subjects.iter().map(|s| rusqlite::types::Value::Text(s.to_string())));
    let rows = stmt.query_map(params_from_iter(args), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;
    let mut out = HashMap::new();
    for row in rows {
        let (user, perm) = row?;
        out.insert(user, Permission::from_i64(perm)?);
    }
    Ok(out)
}

pub(crate) fn conn_acl_all(conn: &Connection, ws_id: i64) -> Result<Vec<(String, Permission)>> {
    let mut stmt =
        conn.prepare_cached("SELECT user, perm FROM workspace_acls WHERE ws_id = ?1 ORDER BY user")?;
    let rows = stmt.query_map(params![ws_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (user, perm) = row?;
        out.push((user, Permission::from_i64(perm)?));
    }
    Ok(out)
}

/// Every entry held by any of `subjects`, as (ws_id, subject, perm)
pub(crate) fn conn_acl_for_subjects(
    conn: &Connection,
    subjects: &[&str],
) -> Result<Vec<(i64, String, Permission)>> {
    if subjects.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT ws_id, user, perm FROM workspace_acls WHERE user IN ({})",
        placeholders(subjects.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(subjects.iter()), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (ws, user, perm) = row?;
        out.push((ws, user, Permission::from_i64(perm)?));
    }
    Ok(out)
}

/// Entries of `subjects` across the given workspaces, as (ws_id, subject, perm)
pub(crate) fn conn_acl_for_workspaces(
    conn: &Connection,
    ws_ids: &[i64],
    subjects: &[&str],
) -> Result<Vec<(i64, String, Permission)>> {
    if ws_ids.is_empty() || subjects.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT ws_id, user, perm FROM workspace_acls WHERE ws_id IN ({}) AND user IN ({})",
        placeholders(ws_ids.len()),
        placeholders(subjects.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let args = ws_ids
        .iter()
        .map(|id| rusqlite::types::Value::Integer(*id))
        .chain(subjects.iter().map(|s| rusqlite::types::Value::Text(s.to_string())));
    let rows = stmt.query_map(params_from_iter(args), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (ws, user, perm) = row?;
        out.push((ws, user, Permission::from_i64(perm)?));
    }
    Ok(out)
}

/// Sets an entry; NONE removes it
pub(crate) fn conn_acl_set(conn: &Connection, ws_id: i64, user: &str, perm: Permission) -> Result<()> {
    if perm == Permission::None {
        conn.execute(
            "DELETE FROM workspace_acls WHERE ws_id = ?1 AND user = ?2",
            params![ws_id, user],
        )?;
    } else {
        conn.execute(
            "INSERT INTO workspace_acls (ws_id, user, perm) VALUES (?1, ?2, ?3) \
             ON CONFLICT(ws_id, user) DO UPDATE SET perm = excluded.perm",
            params![ws_id, user, perm.as_i64()],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pointers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct PointerRow {
    pub ws_id: i64,
    pub id: i64,
    pub name: String,
    pub deleted: bool,
    pub hidden: bool,
    pub num_versions: i64,
}

fn ptr_from_row(row: &Row) -> rusqlite::Result<PointerRow> {
    Ok(PointerRow {
        ws_id: row.get(0)?,
        id: row.get(1)?,
        name: row.get(2)?,
        deleted: row.get(3)?,
        hidden: row.get(4)?,
        num_versions: row.get(5)?,
    })
}

pub(crate) fn conn_ptr_by_ids(
    conn: &Connection,
    keys: &[(i64, i64)],
) -> Result<HashMap<(i64, i64), PointerRow>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {} FROM pointers WHERE (ws_id, id) IN (VALUES {})",
        PTR_COLUMNS,
        pair_placeholders(keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let args = keys.iter().flat_map(|(w, o)| [*w, *o]);
    let rows = stmt.query_map(params_from_iter(args), ptr_from_row)?;
    let mut out = HashMap::new();
    for row in rows {
        let row = row?;
        out.insert((row.ws_id, row.id), row);
    }
    Ok(out)
}

pub(crate) fn conn_ptr_by_names(
    conn: &Connection,
    keys: &[(i64, String)],
) -> Result<HashMap<(i64, String), PointerRow>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {} FROM pointers WHERE (ws_id, name) IN (VALUES {})",
        PTR_COLUMNS,
        pair_placeholders(keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let args = keys.iter().flat_map(|(w, n)| {
        [
            rusqlite::types::Value::Integer(*w),
            rusqlite::types::Value::Text(n.clone()),
        ]
    });
    let rows = stmt.query_map(params_from_iter(args), ptr_from_row)?;
    let mut out = HashMap::new();
    for row in rows {
        let row = row?;
        out.insert((row.ws_id, row.name.clone()), row);
    }
    Ok(out)
}

pub(crate) fn conn_ptr_get(conn: &Connection, ws_id: i64, id: i64) -> Result<Option<PointerRow>> {
    let sql = format!("SELECT {} FROM pointers WHERE ws_id = ?1 AND id = ?2", PTR_COLUMNS);
    Ok(conn.query_row(&sql, params![ws_id, id], ptr_from_row).optional()?)
}

pub(crate) fn conn_ptr_get_by_name(
    conn: &Connection,
    ws_id: i64,
    name: &str,
) -> Result<Option<PointerRow>> {
    let sql = format!("SELECT {} FROM pointers WHERE ws_id = ?1 AND name = ?2", PTR_COLUMNS);
    Ok(conn.query_row(&sql, params![ws_id, name], ptr_from_row).optional()?)
}

pub(crate) fn conn_ptr_list(conn: &Connection, ws_id: i64) -> Result<Vec<PointerRow>> {
    let sql = format!("SELECT {} FROM pointers WHERE ws_id = ?1 ORDER BY id", PTR_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![ws_id], ptr_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn conn_ptr_insert(
    conn: &Connection,
    ws_id: i64,
    id: i64,
    name: &str,
    hidden: bool,
) -> Result<Insert> {
    unique_insert(conn.execute(
        "INSERT INTO pointers (ws_id, id, name, hidden, moddate) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![ws_id, id, name, hidden, now_millis()],
    ))
}

/// Names in a workspace starting with `prefix`
pub(crate) fn conn_ptr_names_with_prefix(
    conn: &Connection,
    ws_id: i64,
    prefix: &str,
) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM pointers WHERE ws_id = ?1 AND substr(name, 1, length(?2)) = ?2",
    )?;
    let rows = stmt.query_map(params![ws_id, prefix], |r| r.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}

pub(crate) fn conn_ptr_rename(conn: &Connection, ws_id: i64, id: i64, name: &str) -> Result<Insert> {
    unique_insert(conn.execute(
        "UPDATE pointers SET name = ?1, moddate = ?2 WHERE ws_id = ?3 AND id = ?4",
        params![name, now_millis(), ws_id, id],
    ))
}

pub(crate) fn conn_ptr_set_deleted(conn: &Connection, ws_id: i64, ids: &[i64], deleted: bool) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE pointers SET deleted = ?1, moddate = ?2 WHERE ws_id = ?3 AND id = ?4",
    )?;
    let now = now_millis();
    for id in ids {
        stmt.execute(params![deleted, now, ws_id, id])?;
    }
    Ok(())
}

pub(crate) fn conn_ptr_set_hidden(conn: &Connection, ws_id: i64, ids: &[i64], hidden: bool) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE pointers SET hidden = ?1, moddate = ?2 WHERE ws_id = ?3 AND id = ?4",
    )?;
    let now = now_millis();
    for id in ids {
        stmt.execute(params![hidden, now, ws_id, id])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct VersionRow {
    pub ws_id: i64,
    pub obj_id: i64,
    pub ver: i64,
    pub type_string: String,
    pub blob: String,
    pub checksum: String,
    pub size: i64,
    pub saved_by: String,
    pub saved: i64,
    pub metadata: Metadata,
    pub provenance: Provenance,
    pub refs: Vec<String>,
    pub prov_refs: Vec<String>,
    pub copied: Option<String>,
    pub reverted: Option<i64>,
}

impl VersionRow {
    /// Content of this version as a new version to append elsewhere
    pub fn to_new_version(&self) -> NewVersion {
        NewVersion {
            type_string: self.type_string.clone(),
            blob: self.blob.clone(),
            checksum: self.checksum.clone(),
            size: self.size,
            saved_by: self.saved_by.clone(),
            saved: self.saved,
            metadata: self.metadata.clone(),
            provenance: self.provenance.clone(),
            refs: self.refs.clone(),
            prov_refs: self.prov_refs.clone(),
            copied: self.copied.clone(),
            reverted: self.reverted,
        }
    }
}

fn ver_from_row(row: &Row) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        ws_id: row.get(0)?,
        obj_id: row.get(1)?,
        ver: row.get(2)?,
        type_string: row.get(3)?,
        blob: row.get(4)?,
        checksum: row.get(5)?,
        size: row.get(6)?,
        saved_by: row.get(7)?,
        saved: row.get(8)?,
        metadata: json_col(row, 9)?,
        provenance: json_col(row, 10)?,
        refs: json_col(row, 11)?,
        prov_refs: json_col(row, 12)?,
        copied: row.get(13)?,
        reverted: row.get(14)?,
    })
}

#[derive(Debug, Clone)]
pub(crate) struct NewVersion {
    pub type_string: String,
    pub blob: String,
    pub checksum: String,
    pub size: i64,
    pub saved_by: String,
    pub saved: i64,
    pub metadata: Metadata,
    pub provenance: Provenance,
    pub refs: Vec<String>,
    pub prov_refs: Vec<String>,
    pub copied: Option<String>,
    pub reverted: Option<i64>,
}

/// Appends a version to a pointer, undeleting it when `undelete` is set.
///
/// The version number comes from the pointer's own counter, so versions stay
/// dense under concurrent writers.
pub(crate) fn conn_version_push(
    conn: &Connection,
    ws_id: i64,
    obj_id: i64,
    v: &NewVersion,
    undelete: bool,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let ver = tx.fetch_add(Counter::Versions { ws_id, obj_id }, 1)?;
    tx.execute(
        &format!(
            "INSERT INTO versions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            VER_COLUMNS
        ),
        params![
            ws_id,
            obj_id,
            ver,
            v.type_string,
            v.blob,
            v.checksum,
            v.size,
            v.saved_by,
            v.saved,
            serde_json::to_string(&v.metadata)?,
            serde_json::to_string(&v.provenance)?,
            serde_json::to_string(&v.refs)?,
            serde_json::to_string(&v.prov_refs)?,
            v.copied,
            v.reverted,
        ],
    )?;
    {
        let mut edge = tx.prepare_cached(
            "INSERT OR IGNORE INTO reference_edges (target, ws_id, obj_id, ver) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for target in v.refs.iter().chain(v.prov_refs.iter()) {
            edge.execute(params![target, ws_id, obj_id, ver])?;
        }
    }
    tx.execute(
        "UPDATE pointers SET deleted = deleted AND NOT ?1, moddate = ?2 WHERE ws_id = ?3 AND id = ?4",
        params![undelete, now_millis(), ws_id, obj_id],
    )?;
    tx.commit()?;
    Ok(ver)
}

pub(crate) fn conn_version_get(
    conn: &Connection,
    ws_id: i64,
    obj_id: i64,
    ver: i64,
) -> Result<Option<VersionRow>> {
    let sql = format!(
        "SELECT {} FROM versions WHERE ws_id = ?1 AND obj_id = ?2 AND ver = ?3",
        VER_COLUMNS
    );
    Ok(conn.query_row(&sql, params![ws_id, obj_id, ver], ver_from_row).optional()?)
}

pub(crate) fn conn_versions_get(
    conn: &Connection,
    keys: &[(i64, i64, i64)],
) -> Result<HashMap<(i64, i64, i64), VersionRow>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {} FROM versions WHERE (ws_id, obj_id, ver) IN (VALUES {})",
        VER_COLUMNS,
        vec!["(?,?,?)"; keys.len()].join(",")
    );
    let mut stmt = conn.prepare(&sql)?;
    let args = keys.iter().flat_map(|(w, o, v)| [*w, *o, *v]);
    let rows = stmt.query_map(params_from_iter(args), ver_from_row)?;
    let mut out = HashMap::new();
    for row in rows {
        let row = row?;
        out.insert((row.ws_id, row.obj_id, row.ver), row);
    }
    Ok(out)
}

/// Versions 1..=`up_to` of an object, ascending; all of them when `up_to` is None
pub(crate) fn conn_versions_of(
    conn: &Connection,
    ws_id: i64,
    obj_id: i64,
    up_to: Option<i64>,
) -> Result<Vec<VersionRow>> {
    let sql = format!(
        "SELECT {} FROM versions WHERE ws_id = ?1 AND obj_id = ?2 AND ver <= ?3 ORDER BY ver",
        VER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![ws_id, obj_id, up_to.unwrap_or(i64::MAX)], ver_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Pointers and versions in the given workspaces, ordered by workspace, object and version
pub(crate) fn conn_list_versions(
    conn: &Connection,
    ws_ids: &[i64],
    all_versions: bool,
) -> Result<Vec<(PointerRow, VersionRow)>> {
    if ws_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ptr_cols = PTR_COLUMNS
        .split(", ")
        .map(|c| format!("p.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let ver_cols = VER_COLUMNS
        .split(',')
        .map(|c| format!("v.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let latest = if all_versions { "" } else { "AND v.ver = p.num_versions" };
    let sql = format!(
        "SELECT {}, {} FROM pointers p JOIN versions v ON v.ws_id = p.ws_id AND v.obj_id = p.id \
         WHERE p.ws_id IN ({}) {} ORDER BY p.ws_id, p.id, v.ver",
        ptr_cols,
        ver_cols,
        placeholders(ws_ids.len()),
        latest
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ws_ids.iter()), |row| {
        let ptr = ptr_from_row(row)?;
        // version columns start after the six pointer columns
        let ver = VersionRow {
            ws_id: row.get(6)?,
            obj_id: row.get(7)?,
            ver: row.get(8)?,
            type_string: row.get(9)?,
            blob: row.get(10)?,
            checksum: row.get(11)?,
            size: row.get(12)?,
            saved_by: row.get(13)?,
            saved: row.get(14)?,
            metadata: json_col(row, 15)?,
            provenance: json_col(row, 16)?,
            refs: json_col(row, 17)?,
            prov_refs: json_col(row, 18)?,
            copied: row.get(19)?,
            reverted: row.get(20)?,
        };
        Ok((ptr, ver))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// Reference edges
// ---------------------------------------------------------------------------

/// Number of stored versions referencing `target`
pub(crate) fn conn_edges_count(conn: &Connection, target: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM reference_edges WHERE target = ?1",
        params![target],
        |r| r.get(0),
    )?)
}

/// Versions referencing `target`, as (ws_id, obj_id, ver)
pub(crate) fn conn_edges_sources(conn: &Connection, target: &str) -> Result<Vec<(i64, i64, i64)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT ws_id, obj_id, ver FROM reference_edges WHERE target = ?1 ORDER BY ws_id, obj_id, ver",
    )?;
    let rows = stmt.query_map(params![target], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
