//! The persistent graph store.
//!
//! One SQLite database (WAL mode) per base path holds every anchor plus the
//! user table managed by [`crate::users`]. Each execution context opens its
//! own connection over the shared file; WAL keeps readers unblocked while a
//! writer commits, and busy timeouts plus bounded retry linearize
//! concurrent writers.
//!
//! All reads that act on behalf of a user root go through the checked
//! accessors: a denied anchor reads as absent, never as forbidden.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jac_core::error::StorageError;
use jac_core::value::Value;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::anchor::{Access, Anchor, AnchorKind, EdgeEndpoints};

pub const SESSION_DB: &str = "jac.session.db";

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 15;

/// Direction selector for incident-edge queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeSide {
    Out,
    In,
}

pub struct GraphMemory {
    conn: Connection,
    path: PathBuf,
}

impl GraphMemory {
    /// Open (creating if needed) the session store under `base_path`.
    pub fn open(base_path: &Path) -> Result<Self, StorageError> {
        let db_path = if base_path.extension().is_some() {
            base_path.to_path_buf()
        } else {
            std::fs::create_dir_all(base_path)
                .map_err(|e| StorageError::TransientIO(e.to_string()))?;
            base_path.join(SESSION_DB)
        };
        let conn = Connection::open(&db_path)
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let memory = Self {
            conn,
            path: db_path,
        };
        memory.init_schema()?;
        Ok(memory)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        let memory = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        memory.init_schema()?;
        Ok(memory)
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS anchors (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    archetype TEXT NOT NULL,
                    owner_root_id TEXT NOT NULL,
                    access TEXT NOT NULL,
                    fields TEXT NOT NULL,
                    edge_src TEXT,
                    edge_dst TEXT,
                    edge_directed INTEGER,
                    edges TEXT NOT NULL DEFAULT '[]'
                );
                CREATE INDEX IF NOT EXISTS idx_anchors_owner ON anchors(owner_root_id);
                CREATE INDEX IF NOT EXISTS idx_anchors_kind ON anchors(kind);
                CREATE INDEX IF NOT EXISTS idx_anchors_edge_src ON anchors(edge_src);
                CREATE INDEX IF NOT EXISTS idx_anchors_edge_dst ON anchors(edge_dst);

                CREATE TABLE IF NOT EXISTS users (
                    username TEXT PRIMARY KEY,
                    password_hash TEXT NOT NULL,
                    token TEXT NOT NULL,
                    root_id TEXT NOT NULL,
                    created_iat INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        Ok(())
    }

    // ── Anchor CRUD ─────────────────────────────────────────────────────────

    /// Raw fetch with no access predicate. Runtime callers should prefer
    /// [`GraphMemory::get_checked`].
    pub fn get(&self, id: Uuid) -> Result<Option<Anchor>, StorageError> {
        let row = with_retry(|| {
            self.conn
                .query_row(
                    "SELECT id, kind, archetype, owner_root_id, access, fields,
                            edge_src, edge_dst, edge_directed, edges
                     FROM anchors WHERE id = ?1",
                    params![id.to_string()],
                    row_to_parts,
                )
                .optional()
        })?;
        row.map(parts_to_anchor).transpose()
    }

    /// Fetch as seen by `actor`: denied anchors read as absent.
    pub fn get_checked(&self, id: Uuid, actor: Uuid) -> Result<Option<Anchor>, StorageError> {
        Ok(self.get(id)?.filter(|anchor| anchor.accessible_by(actor)))
    }

    /// Insert or update. Updates preserve the stored owner.
    pub fn put(&self, anchor: &Anchor) -> Result<(), StorageError> {
        let owner = match self.get(anchor.id)? {
            Some(existing) => existing.owner_root_id,
            None => anchor.owner_root_id,
        };
        let fields = fields_to_json(&anchor.fields);
        let edges = serde_json::to_string(
            &anchor.edges.iter().map(Uuid::to_string).collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        with_retry(|| {
            self.conn.execute(
                "INSERT OR REPLACE INTO anchors
                 (id, kind, archetype, owner_root_id, access, fields,
                  edge_src, edge_dst, edge_directed, edges)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    anchor.id.to_string(),
                    anchor.kind.as_str(),
                    anchor.archetype,
                    owner.to_string(),
                    anchor.access.as_str(),
                    fields,
                    anchor.edge.map(|e| e.src.to_string()),
                    anchor.edge.map(|e| e.dst.to_string()),
                    anchor.edge.map(|e| e.directed as i64),
                    edges,
                ],
            )
        })?;
        Ok(())
    }

    /// Delete an anchor. Nodes are detached from their incident edges
    /// first; edges are removed from both endpoints' lists.
    pub fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        let Some(anchor) = self.get(id)? else {
            return Ok(());
        };

        match anchor.kind {
            AnchorKind::Node | AnchorKind::Root => {
                for edge_id in self.incident_edges(id)? {
                    self.delete(edge_id)?;
                }
            }
            AnchorKind::Edge => {
                if let Some(endpoints) = anchor.edge {
                    for endpoint in [endpoints.src, endpoints.dst] {
                        if let Some(mut node) = self.get(endpoint)? {
                            node.edges.retain(|e| *e != id);
                            self.put(&node)?;
                        }
                    }
                }
            }
            _ => {}
        }

        with_retry(|| {
            self.conn
                .execute("DELETE FROM anchors WHERE id = ?1", params![id.to_string()])
        })?;
        Ok(())
    }

    /// Index-backed listing. All filters are optional and conjunctive.
    pub fn list_by(
        &self,
        kind: Option<AnchorKind>,
        owner: Option<Uuid>,
        archetype: Option<&str>,
    ) -> Result<Vec<Anchor>, StorageError> {
        let mut sql = String::from(
            "SELECT id, kind, archetype, owner_root_id, access, fields,
                    edge_src, edge_dst, edge_directed, edges
             FROM anchors WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(kind) = kind {
            args.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND kind = ?{}", args.len()));
        }
        if let Some(owner) = owner {
            args.push(owner.to_string());
            sql.push_str(&format!(" AND owner_root_id = ?{}", args.len()));
        }
        if let Some(archetype) = archetype {
            args.push(archetype.to_string());
            sql.push_str(&format!(" AND archetype = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_parts)
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;

        let mut anchors = Vec::new();
        for row in rows {
            let parts = row.map_err(|e| StorageError::TransientIO(e.to_string()))?;
            anchors.push(parts_to_anchor(parts)?);
        }
        Ok(anchors)
    }

    /// Edge ids incident to a node, regardless of which endpoint list they
    /// were recorded on.
    pub fn incident_edges(&self, node_id: Uuid) -> Result<Vec<Uuid>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM anchors WHERE kind = 'edge' AND (edge_src = ?1 OR edge_dst = ?1) ORDER BY rowid")
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        let rows = stmt
            .query_map(params![node_id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::TransientIO(e.to_string()))?;
        let mut ids = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StorageError::TransientIO(e.to_string()))?;
            ids.push(parse_uuid(&raw)?);
        }
        Ok(ids)
    }

    /// Edges usable for traversal leaving (or entering) `node_id`.
    pub fn edges_for(&self, node_id: Uuid, side: EdgeSide) -> Result<Vec<Anchor>, StorageError> {
        let mut out = Vec::new();
        for edge_id in self.incident_edges(node_id)? {
            let Some(edge) = self.get(edge_id)? else {
                continue;
            };
            let Some(endpoints) = edge.edge else {
                continue;
            };
            let usable = match side {
                EdgeSide::Out => endpoints.other(node_id).is_some(),
                EdgeSide::In => {
                    endpoints.dst == node_id || (!endpoints.directed && endpoints.src == node_id)
                }
            };
            if usable {
                out.push(edge);
            }
        }
        Ok(out)
    }

    /// Create an edge between two nodes. The edge id is appended to the
    /// source's incident list, and to the destination's as well when the
    /// edge is undirected.
    pub fn connect(
        &self,
        src: Uuid,
        dst: Uuid,
        archetype: &str,
        owner: Uuid,
        directed: bool,
    ) -> Result<Anchor, StorageError> {
        let edge = Anchor::new_edge(archetype, owner, src, dst, directed);
        self.put(&edge)?;

        if let Some(mut src_node) = self.get(src)? {
            src_node.edges.push(edge.id);
            self.put(&src_node)?;
        }
        if !directed {
            if let Some(mut dst_node) = self.get(dst)? {
                dst_node.edges.push(edge.id);
                self.put(&dst_node)?;
            }
        }
        Ok(edge)
    }

    // ── Meta key-value ──────────────────────────────────────────────────────

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        with_retry(|| {
            self.conn
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
        })
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        with_retry(|| {
            self.conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
        })?;
        Ok(())
    }

    // ── Transactions and lifecycle ──────────────────────────────────────────

    /// Explicit atomicity boundary for callers that need it; the runtime is
    /// otherwise write-through.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&GraphMemory) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        with_retry(|| self.conn.execute_batch("BEGIN IMMEDIATE"))?;
        match f(self) {
            Ok(value) => {
                with_retry(|| self.conn.execute_batch("COMMIT"))?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    /// Flush pending WAL frames into the main database file.
    pub fn commit(&self) -> Result<(), StorageError> {
        let _ = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
        Ok(())
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.commit()?;
        self.conn
            .close()
            .map_err(|(_, e)| StorageError::TransientIO(e.to_string()))
    }
}

type RowParts = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    String,
);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn parts_to_anchor(parts: RowParts) -> Result<Anchor, StorageError> {
    let (id, kind, archetype, owner, access, fields, edge_src, edge_dst, edge_directed, edges) =
        parts;
    let edge = match (edge_src, edge_dst) {
        (Some(src), Some(dst)) => Some(EdgeEndpoints {
            src: parse_uuid(&src)?,
            dst: parse_uuid(&dst)?,
            directed: edge_directed.unwrap_or(1) != 0,
        }),
        _ => None,
    };
    let edge_ids: Vec<String> = serde_json::from_str(&edges)
        .map_err(|e| StorageError::CorruptAnchor(format!("edge list: {e}")))?;
    Ok(Anchor {
        id: parse_uuid(&id)?,
        kind: AnchorKind::parse(&kind)
            .ok_or_else(|| StorageError::CorruptAnchor(format!("unknown kind '{kind}'")))?,
        archetype,
        fields: fields_from_json(&fields)?,
        owner_root_id: parse_uuid(&owner)?,
        access: Access::parse(&access)
            .ok_or_else(|| StorageError::CorruptAnchor(format!("unknown access '{access}'")))?,
        edge,
        edges: edge_ids
            .iter()
            .map(|raw| parse_uuid(raw))
            .collect::<Result<_, _>>()?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::CorruptAnchor(format!("bad uuid '{raw}': {e}")))
}

fn fields_to_json(fields: &BTreeMap<String, Value>) -> String {
    let obj: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(obj).to_string()
}

fn fields_from_json(raw: &str) -> Result<BTreeMap<String, Value>, StorageError> {
    let json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| StorageError::CorruptAnchor(format!("field payload: {e}")))?;
    let serde_json::Value::Object(obj) = json else {
        return Err(StorageError::CorruptAnchor(
            "field payload is not an object".to_string(),
        ));
    };
    Ok(obj
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect())
}

/// Run a sqlite operation with bounded retry on transient failures.
fn with_retry<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> Result<T, StorageError> {
    let mut last = None;
    for attempt in 0..RETRY_ATTEMPTS {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                std::thread::sleep(Duration::from_millis(
                    RETRY_BASE_DELAY_MS * (attempt as u64 + 1),
                ));
                last = Some(err);
            }
            Err(err) => return Err(StorageError::TransientIO(err.to_string())),
        }
    }
    Err(StorageError::TransientIO(
        last.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(owner: Uuid) -> Anchor {
        let mut anchor = Anchor::new_node("Task", owner);
        anchor.fields.insert("title".into(), Value::Str("T".into()));
        anchor
    }

    #[test]
    fn put_get_round_trip() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let anchor = node(owner);
        memory.put(&anchor).unwrap();

        let loaded = memory.get(anchor.id).unwrap().unwrap();
        assert_eq!(loaded.archetype, "Task");
        assert_eq!(loaded.fields.get("title"), Some(&Value::Str("T".into())));
        assert_eq!(loaded.owner_root_id, owner);
    }

    #[test]
    fn update_preserves_owner() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let mut anchor = node(owner);
        memory.put(&anchor).unwrap();

        anchor.owner_root_id = Uuid::new_v4();
        anchor.fields.insert("title".into(), Value::Str("U".into()));
        memory.put(&anchor).unwrap();

        let loaded = memory.get(anchor.id).unwrap().unwrap();
        assert_eq!(loaded.owner_root_id, owner);
        assert_eq!(loaded.fields.get("title"), Some(&Value::Str("U".into())));
    }

    #[test]
    fn checked_get_hides_foreign_private_anchors() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let anchor = node(owner);
        memory.put(&anchor).unwrap();

        assert!(memory.get_checked(anchor.id, owner).unwrap().is_some());
        assert!(memory.get_checked(anchor.id, stranger).unwrap().is_none());
    }

    #[test]
    fn connect_appends_to_source_edge_list() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let a = node(owner);
        let b = node(owner);
        memory.put(&a).unwrap();
        memory.put(&b).unwrap();

        let edge = memory.connect(a.id, b.id, "GenericEdge", owner, true).unwrap();
        let src = memory.get(a.id).unwrap().unwrap();
        let dst = memory.get(b.id).unwrap().unwrap();
        assert_eq!(src.edges, vec![edge.id]);
        assert!(dst.edges.is_empty());
    }

    #[test]
    fn undirected_connect_appends_to_both() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let a = node(owner);
        let b = node(owner);
        memory.put(&a).unwrap();
        memory.put(&b).unwrap();

        let edge = memory.connect(a.id, b.id, "GenericEdge", owner, false).unwrap();
        assert_eq!(memory.get(a.id).unwrap().unwrap().edges, vec![edge.id]);
        assert_eq!(memory.get(b.id).unwrap().unwrap().edges, vec![edge.id]);
    }

    #[test]
    fn deleting_edge_detaches_endpoints() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let a = node(owner);
        let b = node(owner);
        memory.put(&a).unwrap();
        memory.put(&b).unwrap();
        let edge = memory.connect(a.id, b.id, "GenericEdge", owner, false).unwrap();

        memory.delete(edge.id).unwrap();
        assert!(memory.get(edge.id).unwrap().is_none());
        assert!(memory.get(a.id).unwrap().unwrap().edges.is_empty());
        assert!(memory.get(b.id).unwrap().unwrap().edges.is_empty());
    }

    #[test]
    fn deleting_node_removes_incident_edges() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let a = node(owner);
        let b = node(owner);
        memory.put(&a).unwrap();
        memory.put(&b).unwrap();
        let edge = memory.connect(a.id, b.id, "GenericEdge", owner, true).unwrap();

        memory.delete(a.id).unwrap();
        assert!(memory.get(a.id).unwrap().is_none());
        assert!(memory.get(edge.id).unwrap().is_none());
        assert!(memory.get(b.id).unwrap().unwrap().edges.is_empty());
    }

    #[test]
    fn list_by_filters_compose() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        memory.put(&node(owner_a)).unwrap();
        memory.put(&node(owner_a)).unwrap();
        memory.put(&node(owner_b)).unwrap();
        memory.put(&Anchor::new_node("Note", owner_a)).unwrap();

        let tasks_a = memory
            .list_by(Some(AnchorKind::Node), Some(owner_a), Some("Task"))
            .unwrap();
        assert_eq!(tasks_a.len(), 2);

        let all_nodes = memory.list_by(Some(AnchorKind::Node), None, None).unwrap();
        assert_eq!(all_nodes.len(), 4);
    }

    #[test]
    fn edges_for_honors_direction() {
        let memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let a = node(owner);
        let b = node(owner);
        memory.put(&a).unwrap();
        memory.put(&b).unwrap();
        memory.connect(a.id, b.id, "GenericEdge", owner, true).unwrap();

        assert_eq!(memory.edges_for(a.id, EdgeSide::Out).unwrap().len(), 1);
        assert_eq!(memory.edges_for(a.id, EdgeSide::In).unwrap().len(), 0);
        assert_eq!(memory.edges_for(b.id, EdgeSide::In).unwrap().len(), 1);
        // A directed edge cannot be traversed out of its destination.
        assert_eq!(memory.edges_for(b.id, EdgeSide::Out).unwrap().len(), 0);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut memory = GraphMemory::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let anchor = node(owner);
        let id = anchor.id;

        let result: Result<(), StorageError> = memory.transaction(|m| {
            m.put(&anchor)?;
            Err(StorageError::TransientIO("forced".into()))
        });
        assert!(result.is_err());
        assert!(memory.get(id).unwrap().is_none());
    }

    #[test]
    fn meta_round_trip() {
        let memory = GraphMemory::open_in_memory().unwrap();
        assert!(memory.meta_get("k").unwrap().is_none());
        memory.meta_set("k", "v").unwrap();
        assert_eq!(memory.meta_get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let owner = Uuid::new_v4();
        let anchor = node(owner);
        {
            let memory = GraphMemory::open(tmp.path()).unwrap();
            memory.put(&anchor).unwrap();
            memory.close().unwrap();
        }
        let memory = GraphMemory::open(tmp.path()).unwrap();
        assert!(memory.get(anchor.id).unwrap().is_some());
    }
}
