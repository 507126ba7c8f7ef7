//! SQLite-backed trace storage.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;
use traced_core::{
    ArtifactRecord, ArtifactType, ErrorInfo, EventRecord, SpanRecord, Status, TraceQuery,
    TraceRecord,
};

use crate::{StoreError, TraceStore};

/// Embedded single-file store.
///
/// Every call serializes on one connection, which suits the single-writer
/// profile of an instrumented process.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`, creating its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let store = Self::from_connection(Connection::open(path)?)?;
        info!("Connected to SQLite trace store at {}", path.display());
        Ok(store)
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS traces (
                trace_id TEXT PRIMARY KEY,
                root_agent TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spans (
                span_id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                parent_span_id TEXT,
                name TEXT NOT NULL,
                component TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT NOT NULL,
                params TEXT,
                result TEXT,
                error_kind TEXT,
                error_message TEXT,
                seq INTEGER NOT NULL,
                FOREIGN KEY (trace_id) REFERENCES traces(trace_id)
            );

            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                span_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                label TEXT NOT NULL,
                payload TEXT,
                FOREIGN KEY (span_id) REFERENCES spans(span_id)
            );

            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                span_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                artifact_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (span_id, name),
                FOREIGN KEY (span_id) REFERENCES spans(span_id)
            );

            CREATE INDEX IF NOT EXISTS idx_traces_start ON traces(start_time);
            CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
            CREATE INDEX IF NOT EXISTS idx_events_trace ON events(trace_id);
            CREATE INDEX IF NOT EXISTS idx_artifacts_trace ON artifacts(trace_id);
            "#,
        )?;

        Ok(())
    }
}

impl TraceStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn insert_trace(&self, trace: &TraceRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute(
            r#"INSERT INTO traces (trace_id, root_agent, start_time, end_time, status)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                trace.trace_id,
                trace.root_agent,
                trace.start_time,
                trace.end_time,
                trace.status.as_str(),
            ],
        )?;

        Ok(())
    }

    fn close_trace(&self, trace_id: &str, end_time: i64, status: Status) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let updated = conn.execute(
            "UPDATE traces SET end_time = ?1, status = ?2 WHERE trace_id = ?3",
            params![end_time, status.as_str(), trace_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("trace {}", trace_id)));
        }

        Ok(())
    }

    fn insert_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        let params_json = to_json(span.params.as_ref())?;
        let result_json = to_json(span.result.as_ref())?;
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute(
            r#"INSERT INTO spans
               (span_id, trace_id, parent_span_id, name, component, start_time, end_time,
                status, params, result, error_kind, error_message, seq)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                span.span_id,
                span.trace_id,
                span.parent_span_id,
                span.name,
                span.component,
                span.start_time,
                span.end_time,
                span.status.as_str(),
                params_json,
                result_json,
                span.error.as_ref().map(|e| e.kind.as_str()),
                span.error.as_ref().map(|e| e.message.as_str()),
                span.seq,
            ],
        )?;

        Ok(())
    }

    fn finish_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        let result_json = to_json(span.result.as_ref())?;
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let updated = conn.execute(
            r#"UPDATE spans SET
               end_time = ?1, status = ?2, result = ?3, error_kind = ?4, error_message = ?5
               WHERE span_id = ?6"#,
            params![
                span.end_time,
                span.status.as_str(),
                result_json,
                span.error.as_ref().map(|e| e.kind.as_str()),
                span.error.as_ref().map(|e| e.message.as_str()),
                span.span_id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("span {}", span.span_id)));
        }

        Ok(())
    }

    fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let payload_json = to_json(event.payload.as_ref())?;
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute(
            r#"INSERT INTO events (event_id, span_id, trace_id, timestamp, seq, label, payload)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                event.event_id,
                event.span_id,
                event.trace_id,
                event.timestamp,
                event.seq,
                event.label,
                payload_json,
            ],
        )?;

        Ok(())
    }

    fn save_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(&artifact.payload)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute(
            r#"INSERT INTO artifacts
               (artifact_id, span_id, trace_id, name, artifact_type, payload, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(span_id, name) DO UPDATE SET
                 artifact_id = excluded.artifact_id,
                 artifact_type = excluded.artifact_type,
                 payload = excluded.payload,
                 created_at = excluded.created_at"#,
            params![
                artifact.artifact_id,
                artifact.span_id,
                artifact.trace_id,
                artifact.name,
                artifact.artifact_type.as_str(),
                payload_json,
                artifact.created_at,
            ],
        )?;

        Ok(())
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let trace = conn
            .query_row(
                r#"SELECT trace_id, root_agent, start_time, end_time, status
                   FROM traces WHERE trace_id = ?1"#,
                params![trace_id],
                trace_from_row,
            )
            .optional()?;

        Ok(trace)
    }

    fn list_traces(&self, query: &TraceQuery) -> Result<Vec<TraceRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut sql = String::from(
            r#"SELECT trace_id, root_agent, start_time, end_time, status
               FROM traces WHERE 1=1"#,
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref agent) = query.root_agent {
            sql.push_str(" AND root_agent = ?");
            params_vec.push(Box::new(agent.clone()));
        }

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.as_str().to_string()));
        }

        sql.push_str(" ORDER BY start_time ASC, rowid ASC");

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset.unwrap_or(0)))
            }
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let mut stmt = conn.prepare(&sql)?;

        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(params_refs.as_slice(), trace_from_row)?;

        let mut traces = Vec::new();
        for row in rows {
            traces.push(row?);
        }

        Ok(traces)
    }

    fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut stmt = conn.prepare(
            r#"SELECT span_id, trace_id, parent_span_id, name, component, start_time, end_time,
               status, params, result, error_kind, error_message, seq
               FROM spans WHERE trace_id = ?1 ORDER BY start_time, seq"#,
        )?;

        let rows = stmt.query_map(params![trace_id], |row| {
            let status: String = row.get(7)?;
            let error_kind: Option<String> = row.get(10)?;
            let error_message: Option<String> = row.get(11)?;
            let span = SpanRecord {
                span_id: row.get(0)?,
                trace_id: row.get(1)?,
                parent_span_id: row.get(2)?,
                name: row.get(3)?,
                component: row.get(4)?,
                start_time: row.get(5)?,
                end_time: row.get(6)?,
                status: Status::from_str(&status),
                params: None,
                result: None,
                error: error_kind
                    .map(|kind| ErrorInfo::new(kind, error_message.unwrap_or_default())),
                seq: row.get(12)?,
            };
            let params_json: Option<String> = row.get(8)?;
            let result_json: Option<String> = row.get(9)?;
            Ok((span, params_json, result_json))
        })?;

        let mut spans = Vec::new();
        for row in rows {
            let (mut span, params_json, result_json) = row?;
            span.params = from_json(params_json)?;
            span.result = from_json(result_json)?;
            spans.push(span);
        }

        Ok(spans)
    }

    fn get_events(&self, trace_id: &str) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut stmt = conn.prepare(
            r#"SELECT event_id, span_id, trace_id, timestamp, seq, label, payload
               FROM events WHERE trace_id = ?1 ORDER BY timestamp, seq"#,
        )?;

        let rows = stmt.query_map(params![trace_id], |row| {
            let event = EventRecord {
                event_id: row.get(0)?,
                span_id: row.get(1)?,
                trace_id: row.get(2)?,
                timestamp: row.get(3)?,
                seq: row.get(4)?,
                label: row.get(5)?,
                payload: None,
            };
            let payload_json: Option<String> = row.get(6)?;
            Ok((event, payload_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (mut event, payload_json) = row?;
            event.payload = from_json(payload_json)?;
            events.push(event);
        }

        Ok(events)
    }

    fn get_artifacts(&self, trace_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let mut stmt = conn.prepare(
            r#"SELECT artifact_id, span_id, trace_id, name, artifact_type, payload, created_at
               FROM artifacts WHERE trace_id = ?1 ORDER BY created_at, name"#,
        )?;

        let rows = stmt.query_map(params![trace_id], |row| {
            let artifact_type: String = row.get(4)?;
            let payload_json: String = row.get(5)?;
            let artifact = ArtifactRecord {
                artifact_id: row.get(0)?,
                span_id: row.get(1)?,
                trace_id: row.get(2)?,
                name: row.get(3)?,
                artifact_type: ArtifactType::from_str(&artifact_type),
                payload: Value::Null,
                created_at: row.get(6)?,
            };
            Ok((artifact, payload_json))
        })?;

        let mut artifacts = Vec::new();
        for row in rows {
            let (mut artifact, payload_json) = row?;
            artifact.payload = serde_json::from_str(&payload_json)?;
            artifacts.push(artifact);
        }

        Ok(artifacts)
    }

    fn span_count(&self, trace_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM spans WHERE trace_id = ?1",
            params![trace_id],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }
}

fn trace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TraceRecord> {
    let status: String = row.get(4)?;
    Ok(TraceRecord {
        trace_id: row.get(0)?,
        root_agent: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        status: Status::from_str(&status),
    })
}

/// `None` stays SQL NULL; a captured JSON null is stored as the text `null`.
fn to_json(value: Option<&Value>) -> Result<Option<String>, StoreError> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn from_json(text: Option<String>) -> Result<Option<Value>, StoreError> {
    Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}
