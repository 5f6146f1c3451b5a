//! SQLite-backed store for the sandbox revert engine.
//!
//! One `Kernel` owns a database file holding every registered module table
//! plus the cross-module `pending_reverts` ledger. All SQL is generated from
//! the static module registry; values are always bound as parameters.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};

use freeze_schema::{module, modules, Action, ModuleSchema, Origin, Snapshot};

mod seed;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown module table: {0}")]
    UnknownTable(String),
    #[error("{table} row {id} not found")]
    NotFound { table: String, id: i64 },
    #[error("before-image required for {0} entries")]
    MissingSnapshot(&'static str),
    #[error("blocking task join: {0}")]
    Join(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One row of a module table, payload plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRow {
    pub id: i64,
    pub origin: Origin,
    pub created_by: Option<String>,
    pub created_at: String,
    pub fields: Map<String, Value>,
}

/// Action label as stored in the ledger. Rows written by another build (or by
/// hand) can carry labels this build cannot undo; those surface as `Unknown`
/// so the sweeper retires them instead of re-scanning them every cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LedgerAction {
    Known(Action),
    Unknown(String),
}

impl LedgerAction {
    pub fn label(&self) -> &str {
        match self {
            LedgerAction::Known(action) => action.as_str(),
            LedgerAction::Unknown(raw) => raw,
        }
    }
}

/// One in-flight provisional mutation, as stored in the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct RevertEntry {
    pub id: i64,
    pub table_name: String,
    pub record_id: i64,
    pub action: LedgerAction,
    pub snapshot: Option<String>,
    pub actor: Option<String>,
    pub created: String,
    pub expires: String,
}

/// What applying one expired entry's undo actually did.
#[derive(Debug, Clone, PartialEq)]
pub enum RevertOutcome {
    /// create-undo removed the ephemeral row.
    Deleted,
    /// create-undo found the row already gone (or replaced by baseline).
    AlreadyGone,
    /// update-undo wrote the before-image back.
    Restored,
    /// update-undo found nothing to restore onto.
    TargetMissing,
    /// delete-undo re-created the row under its original id.
    Reinserted,
    /// delete-undo found the id occupied.
    AlreadyPresent,
    /// Stored snapshot was unusable; entry discarded so it cannot jam the sweep.
    DroppedMalformed(String),
    /// Entry referenced a table no longer in the registry; discarded.
    DroppedUnknownTable(String),
    /// Entry carried an action label this build cannot undo; discarded.
    DroppedUnknownAction(String),
    /// Undo hit a row constraint; entry discarded, row left as-is.
    DroppedConflict(String),
}

impl RevertOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RevertOutcome::Deleted => "deleted",
            RevertOutcome::AlreadyGone => "already_gone",
            RevertOutcome::Restored => "restored",
            RevertOutcome::TargetMissing => "target_missing",
            RevertOutcome::Reinserted => "reinserted",
            RevertOutcome::AlreadyPresent => "already_present",
            RevertOutcome::DroppedMalformed(_) => "dropped_malformed",
            RevertOutcome::DroppedUnknownTable(_) => "dropped_unknown_table",
            RevertOutcome::DroppedUnknownAction(_) => "dropped_unknown_action",
            RevertOutcome::DroppedConflict(_) => "dropped_conflict",
        }
    }
}

/// Read-only aggregate over the ledger, consumed by the admin panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub creates: i64,
    pub updates: i64,
    pub deletes: i64,
    pub total: i64,
}

#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn bind_value(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match v {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn read_value(v: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn require_module(table: &str) -> Result<&'static ModuleSchema> {
    module(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("sandbox.sqlite");
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms()))?;
        // Cache size: negative = KB units.
        if let Some(pages) = std::env::var("FREEZE_SQLITE_CACHE_PAGES")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
        {
            let _ = conn.pragma_update(None, "cache_size", pages);
        }
        Self::init_schema(&conn)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let mut ddl = String::new();
        for m in modules() {
            ddl.push_str(&table_ddl(m));
        }
        ddl.push_str(
            r#"
            CREATE TABLE IF NOT EXISTS pending_reverts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              table_name TEXT NOT NULL,
              record_id INTEGER NOT NULL,
              action TEXT NOT NULL,
              snapshot TEXT,
              actor TEXT,
              created TEXT NOT NULL,
              expires TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reverts_expires ON pending_reverts(expires);
            CREATE INDEX IF NOT EXISTS idx_reverts_record ON pending_reverts(table_name, record_id);
            "#,
        );
        conn.execute_batch(&ddl)?;
        Ok(())
    }

    /// Insert the curated sample rows for every empty module table.
    /// Returns how many rows were seeded.
    pub fn seed_baseline(&self) -> Result<usize> {
        let conn = self.conn()?;
        let now = fmt_time(Utc::now());
        let mut inserted = 0usize;
        for (table, rows) in seed::baseline_rows() {
            let schema = require_module(table)?;
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", schema.name),
                [],
                |r| r.get(0),
            )?;
            if count > 0 {
                continue;
            }
            for fields in rows {
                insert_fields(&conn, schema, None, &fields, Origin::Baseline, None, &now)?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    // ---------------- Resource store ----------------

    pub fn insert_row(
        &self,
        table: &str,
        fields: &Map<String, Value>,
        origin: Origin,
        created_by: Option<&str>,
    ) -> Result<i64> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        let now = fmt_time(Utc::now());
        insert_fields(&conn, schema, None, fields, origin, created_by, &now)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert-if-absent under an explicit id. Used by the delete-undo path and
    /// by anything that must reoccupy a known id; a no-op when the id exists.
    pub fn insert_row_with_id(
        &self,
        table: &str,
        id: i64,
        fields: &Map<String, Value>,
        origin: Origin,
    ) -> Result<bool> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        let now = fmt_time(Utc::now());
        let n = insert_fields(&conn, schema, Some(id), fields, origin, None, &now)?;
        Ok(n > 0)
    }

    pub fn fetch_row(&self, table: &str, id: i64) -> Result<Option<ResourceRow>> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        fetch_row_inner(&conn, schema, id)
    }

    pub fn update_row(&self, table: &str, id: i64, fields: &Map<String, Value>) -> Result<bool> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        let n = update_fields(&conn, schema, id, fields)?;
        Ok(n > 0)
    }

    pub fn delete_row(&self, table: &str, id: i64) -> Result<bool> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE id=?", schema.name),
            params![id],
        )?;
        Ok(n > 0)
    }

    /// Before-image of the row's registered payload columns plus its current
    /// provenance. Identity and timestamp columns never enter the snapshot.
    pub fn capture_snapshot(&self, table: &str, id: i64) -> Result<Snapshot> {
        let schema = require_module(table)?;
        let conn = self.conn()?;
        let row = fetch_row_inner(&conn, schema, id)?.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            id,
        })?;
        Ok(Snapshot::new(row.origin, row.fields))
    }

    /// Flip a row to baseline and drop every pending revert for it, exempting
    /// it from all future sweeps.
    pub fn promote_to_baseline(&self, table: &str, id: i64) -> Result<()> {
        let schema = require_module(table)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let n = tx.execute(
            &format!("UPDATE {} SET origin='baseline' WHERE id=?", schema.name),
            params![id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                id,
            });
        }
        tx.execute(
            "DELETE FROM pending_reverts WHERE table_name=? AND record_id=?",
            params![table, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ---------------- Mutation ledger ----------------

    /// Append one ledger entry. `expires` is fixed here from the action's TTL
    /// class; the row is durable before this returns.
    pub fn append_revert(
        &self,
        table: &str,
        record_id: i64,
        action: Action,
        snapshot: Option<&Snapshot>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        require_module(table)?;
        if snapshot.is_none() && !matches!(action, Action::Create) {
            return Err(StoreError::MissingSnapshot(action.as_str()));
        }
        let conn = self.conn()?;
        let expires = now + action.ttl();
        conn.execute(
            "INSERT INTO pending_reverts(table_name,record_id,action,snapshot,actor,created,expires) VALUES(?,?,?,?,?,?,?)",
            params![
                table,
                record_id,
                action.as_str(),
                snapshot.map(|s| s.to_json()),
                actor,
                fmt_time(now),
                fmt_time(expires),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Ledger entries whose window has lapsed, oldest expiry first.
    pub fn pull_expired(&self, now: DateTime<Utc>) -> Result<Vec<RevertEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,table_name,record_id,action,snapshot,actor,created,expires \
             FROM pending_reverts WHERE expires <= ? ORDER BY expires ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![fmt_time(now)])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let action_s: String = r.get(3)?;
            let action = match Action::parse(&action_s) {
                Ok(action) => LedgerAction::Known(action),
                Err(_) => LedgerAction::Unknown(action_s),
            };
            out.push(RevertEntry {
                id: r.get(0)?,
                table_name: r.get(1)?,
                record_id: r.get(2)?,
                action,
                snapshot: r.get(4)?,
                actor: r.get(5)?,
                created: r.get(6)?,
                expires: r.get(7)?,
            });
        }
        Ok(out)
    }

    /// Idempotent: removing an already-removed entry is a no-op.
    pub fn remove_revert(&self, entry_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM pending_reverts WHERE id=?", params![entry_id])?;
        Ok(n > 0)
    }

    /// Drop live update entries for a record; a fresh update entry supersedes
    /// the older ones (its before-image already embeds their effect).
    pub fn supersede_updates(&self, table: &str, record_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM pending_reverts WHERE table_name=? AND record_id=? AND action='update'",
            params![table, record_id],
        )?;
        Ok(n)
    }

    pub fn pending_create(&self, table: &str, record_id: i64) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM pending_reverts WHERE table_name=? AND record_id=? AND action='create' LIMIT 1",
        )?;
        let id = stmt
            .query_row(params![table, record_id], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    pub fn pending_counts(&self) -> Result<PendingCounts> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT action, COUNT(*) FROM pending_reverts GROUP BY action")?;
        let mut rows = stmt.query([])?;
        let mut counts = PendingCounts::default();
        while let Some(r) = rows.next()? {
            let action_s: String = r.get(0)?;
            let n: i64 = r.get(1)?;
            match Action::parse(&action_s) {
                Ok(Action::Create) => counts.creates = n,
                Ok(Action::Update) => counts.updates = n,
                Ok(Action::Delete) => counts.deletes = n,
                Err(_) => {}
            }
            counts.total += n;
        }
        Ok(counts)
    }

    // ---------------- Revert application ----------------

    /// Apply one expired entry's undo and retire the entry, in a single
    /// transaction. Store-level failures propagate so the caller can abort the
    /// cycle; anything that would jam the sweep forever (bad blob, vanished
    /// table, constraint hit) retires the entry with a `Dropped*` outcome.
    pub fn revert_entry(&self, entry: &RevertEntry) -> Result<RevertOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let outcome = match (&entry.action, module(&entry.table_name)) {
            (LedgerAction::Unknown(raw), _) => RevertOutcome::DroppedUnknownAction(raw.clone()),
            (_, None) => RevertOutcome::DroppedUnknownTable(entry.table_name.clone()),
            (LedgerAction::Known(action), Some(schema)) => match action {
                Action::Create => {
                    // Origin guard: only ever delete ephemeral rows, even if a
                    // baseline row somehow reoccupied the id.
                    let n = tx.execute(
                        &format!(
                            "DELETE FROM {} WHERE id=? AND origin='ephemeral'",
                            schema.name
                        ),
                        params![entry.record_id],
                    )?;
                    if n > 0 {
                        RevertOutcome::Deleted
                    } else {
                        RevertOutcome::AlreadyGone
                    }
                }
                Action::Update => match parse_entry_snapshot(entry) {
                    Err(reason) => RevertOutcome::DroppedMalformed(reason),
                    Ok(snap) => {
                        match update_fields(&tx, schema, entry.record_id, &snap.fields) {
                            Ok(0) => RevertOutcome::TargetMissing,
                            Ok(_) => RevertOutcome::Restored,
                            Err(err) if is_constraint(&err) => {
                                RevertOutcome::DroppedConflict(err.to_string())
                            }
                            Err(err) => return Err(err.into()),
                        }
                    }
                },
                Action::Delete => match parse_entry_snapshot(entry) {
                    Err(reason) => RevertOutcome::DroppedMalformed(reason),
                    Ok(snap) => {
                        let now = fmt_time(Utc::now());
                        // OR IGNORE covers both "id reoccupied" and a snapshot
                        // that no longer satisfies the table's constraints.
                        let n = insert_fields(
                            &tx,
                            schema,
                            Some(entry.record_id),
                            &snap.fields,
                            snap.origin,
                            None,
                            &now,
                        )?;
                        if n > 0 {
                            RevertOutcome::Reinserted
                        } else {
                            RevertOutcome::AlreadyPresent
                        }
                    }
                },
            },
        };

        tx.execute("DELETE FROM pending_reverts WHERE id=?", params![entry.id])?;
        tx.commit()?;
        Ok(outcome)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn capture_snapshot_async(&self, table: &str, id: i64) -> Result<Snapshot> {
        let k = self.clone();
        let t = table.to_string();
        tokio::task::spawn_blocking(move || k.capture_snapshot(&t, id))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn pending_counts_async(&self) -> Result<PendingCounts> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.pending_counts())
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    pub async fn promote_to_baseline_async(&self, table: &str, id: i64) -> Result<()> {
        let k = self.clone();
        let t = table.to_string();
        tokio::task::spawn_blocking(move || k.promote_to_baseline(&t, id))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn busy_timeout_ms() -> u64 {
    std::env::var("FREEZE_SQLITE_BUSY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000)
}

fn table_ddl(m: &ModuleSchema) -> String {
    let mut cols = String::from("id INTEGER PRIMARY KEY AUTOINCREMENT");
    for c in m.columns {
        cols.push_str(",\n  ");
        cols.push_str(c.name);
        cols.push(' ');
        cols.push_str(c.ty.sql());
        if c.required {
            cols.push_str(" NOT NULL");
        }
        if c.unique {
            cols.push_str(" UNIQUE");
        }
    }
    cols.push_str(",\n  origin TEXT NOT NULL DEFAULT 'ephemeral'");
    cols.push_str(",\n  created_by TEXT");
    cols.push_str(",\n  created_at TEXT NOT NULL");
    format!("CREATE TABLE IF NOT EXISTS {} (\n  {}\n);\n", m.name, cols)
}

fn parse_entry_snapshot(entry: &RevertEntry) -> std::result::Result<Snapshot, String> {
    let raw = entry
        .snapshot
        .as_deref()
        .ok_or_else(|| "missing before-image".to_string())?;
    Snapshot::from_json(raw).map_err(|e| e.to_string())
}

/// INSERT built from the registered columns present in `fields`; unregistered
/// keys are ignored. With an explicit id the statement is OR IGNORE.
fn insert_fields(
    conn: &Connection,
    schema: &ModuleSchema,
    id: Option<i64>,
    fields: &Map<String, Value>,
    origin: Origin,
    created_by: Option<&str>,
    now: &str,
) -> rusqlite::Result<usize> {
    let mut names: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(id) = id {
        names.push("id");
        values.push(rusqlite::types::Value::Integer(id));
    }
    for col in schema.columns {
        if let Some(v) = fields.get(col.name) {
            names.push(col.name);
            values.push(bind_value(v));
        }
    }
    names.push("origin");
    values.push(rusqlite::types::Value::Text(origin.as_str().to_string()));
    names.push("created_by");
    values.push(match created_by {
        Some(s) => rusqlite::types::Value::Text(s.to_string()),
        None => rusqlite::types::Value::Null,
    });
    names.push("created_at");
    values.push(rusqlite::types::Value::Text(now.to_string()));

    let placeholders = vec!["?"; names.len()].join(",");
    let verb = if id.is_some() {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let sql = format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        schema.name,
        names.join(","),
        placeholders
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
}

/// UPDATE restricted to the registered columns present in `fields`; keys that
/// are not in the registry (dropped columns, foreign junk) are ignored.
fn update_fields(
    conn: &Connection,
    schema: &ModuleSchema,
    id: i64,
    fields: &Map<String, Value>,
) -> rusqlite::Result<usize> {
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for col in schema.columns {
        if let Some(v) = fields.get(col.name) {
            sets.push(format!("{}=?", col.name));
            values.push(bind_value(v));
        }
    }
    if sets.is_empty() {
        return Ok(0);
    }
    values.push(rusqlite::types::Value::Integer(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE id=?",
        schema.name,
        sets.join(",")
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
}

fn fetch_row_inner(
    conn: &Connection,
    schema: &ModuleSchema,
    id: i64,
) -> Result<Option<ResourceRow>> {
    let col_list = schema
        .column_names()
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT {},origin,created_by,created_at FROM {} WHERE id=? LIMIT 1",
        col_list, schema.name
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    let Some(r) = rows.next()? else {
        return Ok(None);
    };
    let mut fields = Map::new();
    for (i, name) in schema.column_names().enumerate() {
        fields.insert(name.to_string(), read_value(r.get_ref(i)?));
    }
    let n = schema.columns.len();
    let origin_s: String = r.get(n)?;
    // Unparseable provenance reads as baseline so nothing mortal is inferred.
    let origin = Origin::parse(&origin_s).unwrap_or(Origin::Baseline);
    Ok(Some(ResourceRow {
        id,
        origin,
        created_by: r.get(n + 1)?,
        created_at: r.get(n + 2)?,
        fields,
    }))
}
