use crate::model::{Checkpoint, CheckpointMetrics, PerformanceRow, TaskRow, TaskState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};
use warden_core::{ExecutionMode, WardenError, WardenResult};

/// The durable store collaborator.
///
/// Every write the orchestration core makes goes through this trait. The
/// three logical tables are `checkpoints`, `tasks` and `performance`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persists a new checkpoint. Fails if the id already exists.
    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> WardenResult<()>;
    /// Loads a checkpoint by id.
    async fn get_checkpoint(&self, id: &str) -> WardenResult<Option<Checkpoint>>;
    /// All checkpoints in creation order.
    async fn list_checkpoints(&self) -> WardenResult<Vec<Checkpoint>>;

    /// Inserts or replaces the row for `row.id`.
    async fn upsert_task(&self, row: &TaskRow) -> WardenResult<()>;
    /// Changes the status of an existing row.
    async fn update_task_status(&self, id: &str, status: TaskState) -> WardenResult<()>;
    /// Records the confidence reported for an existing row.
    async fn set_task_confidence(&self, id: &str, confidence: f64) -> WardenResult<()>;
    /// Loads a row by task id.
    async fn get_task(&self, id: &str) -> WardenResult<Option<TaskRow>>;
    /// All rows ordered by task id.
    async fn list_tasks(&self) -> WardenResult<Vec<TaskRow>>;

    /// Appends a performance row.
    async fn record_performance(&self, row: &PerformanceRow) -> WardenResult<()>;
    /// Performance rows of one agent, oldest first.
    async fn performance_for(&self, agent: &str) -> WardenResult<Vec<PerformanceRow>>;
    /// Every performance row, oldest first.
    async fn list_performance(&self) -> WardenResult<Vec<PerformanceRow>>;

    /// Share of successful attempts for `agent`, `None` without history.
    async fn agent_success_rate(&self, agent: &str) -> WardenResult<Option<f64>> {
        let rows = self.performance_for(agent).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let ok = rows.iter().filter(|r| r.success).count();
        Ok(Some(ok as f64 / rows.len() as f64))
    }
}

fn store_err(e: rusqlite::Error) -> WardenError {
    WardenError::Store(e.to_string())
}

fn parse_time(raw: &str) -> WardenResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WardenError::Store(format!("bad timestamp '{raw}': {e}")))
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    tag TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    agent TEXT NOT NULL,
    status TEXT NOT NULL,
    confidence REAL,
    sub_agent TEXT,
    mode TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS performance (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    agent TEXT NOT NULL,
    task_id TEXT NOT NULL,
    duration INTEGER NOT NULL,
    success INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_performance_agent ON performance(agent);
"#;

type RawCheckpoint = (String, String, String, String);
type RawTask = (
    String,
    String,
    String,
    Option<f64>,
    Option<String>,
    Option<String>,
    String,
);
type RawPerformance = (String, String, i64, bool, String);

fn checkpoint_from_raw((id, tag, metrics_json, timestamp): RawCheckpoint) -> WardenResult<Checkpoint> {
    let metrics: CheckpointMetrics = serde_json::from_str(&metrics_json)?;
    Ok(Checkpoint {
        id,
        tag,
        metrics,
        timestamp: parse_time(&timestamp)?,
    })
}

fn task_from_raw(raw: RawTask) -> WardenResult<TaskRow> {
    let (id, agent, status, confidence, sub_agent, mode, updated_at) = raw;
    let status = TaskState::parse(&status)
        .ok_or_else(|| WardenError::Store(format!("unknown task status '{status}'")))?;
    let mode = match mode {
        Some(m) => Some(
            ExecutionMode::parse(&m)
                .ok_or_else(|| WardenError::Store(format!("unknown execution mode '{m}'")))?,
        ),
        None => None,
    };
    Ok(TaskRow {
        id,
        agent,
        status,
        confidence,
        sub_agent,
        mode,
        updated_at: parse_time(&updated_at)?,
    })
}

fn performance_from_raw((agent, task_id, duration, success, recorded_at): RawPerformance) -> WardenResult<PerformanceRow> {
    Ok(PerformanceRow {
        agent,
        task_id,
        duration_ms: u64::try_from(duration).unwrap_or(0),
        success,
        recorded_at: parse_time(&recorded_at)?,
    })
}

/// [`DurableStore`] backed by an embedded SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "durable store opened");
        Ok(store)
    }

    /// A private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> WardenResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> WardenResult<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_performance(&self, agent: Option<&str>) -> WardenResult<Vec<PerformanceRow>> {
        let conn = self.conn.lock();
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<RawPerformance> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        };
        let raws: Vec<RawPerformance> = match agent {
            Some(agent) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT agent, task_id, duration, success, recorded_at
                         FROM performance WHERE agent = ?1 ORDER BY seq",
                    )
                    .map_err(store_err)?;
                let rows = stmt.query_map(params![agent], map).map_err(store_err)?;
                rows.collect::<Result<_, _>>().map_err(store_err)?
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT agent, task_id, duration, success, recorded_at
                         FROM performance ORDER BY seq",
                    )
                    .map_err(store_err)?;
                let rows = stmt.query_map([], map).map_err(store_err)?;
                rows.collect::<Result<_, _>>().map_err(store_err)?
            }
        };
        raws.into_iter().map(performance_from_raw).collect()
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> WardenResult<()> {
        let metrics_json = serde_json::to_string(&checkpoint.metrics)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checkpoints (id, tag, metrics_json, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint.id,
                checkpoint.tag,
                metrics_json,
                checkpoint.timestamp.to_rfc3339()
            ],
        )
        .map_err(store_err)?;
        debug!(checkpoint = %checkpoint.id, tag = %checkpoint.tag, "checkpoint row inserted");
        Ok(())
    }

    async fn get_checkpoint(&self, id: &str) -> WardenResult<Option<Checkpoint>> {
        let raw: Option<RawCheckpoint> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, tag, metrics_json, timestamp FROM checkpoints WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(store_err)?
        };
        raw.map(checkpoint_from_raw).transpose()
    }

    async fn list_checkpoints(&self) -> WardenResult<Vec<Checkpoint>> {
        let raws: Vec<RawCheckpoint> = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, tag, metrics_json, timestamp FROM checkpoints ORDER BY seq",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(store_err)?;
            rows.collect::<Result<_, _>>().map_err(store_err)?
        };
        raws.into_iter().map(checkpoint_from_raw).collect()
    }

    async fn upsert_task(&self, row: &TaskRow) -> WardenResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (id, agent, status, confidence, sub_agent, mode, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                agent = excluded.agent,
                status = excluded.status,
                confidence = excluded.confidence,
                sub_agent = excluded.sub_agent,
                mode = excluded.mode,
                updated_at = excluded.updated_at",
            params![
                row.id,
                row.agent,
                row.status.as_str(),
                row.confidence,
                row.sub_agent,
                row.mode.map(ExecutionMode::as_str),
                row.updated_at.to_rfc3339()
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_task_status(&self, id: &str, status: TaskState) -> WardenResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(WardenError::Store(format!("no task row '{id}'")));
        }
        Ok(())
    }

    async fn set_task_confidence(&self, id: &str, confidence: f64) -> WardenResult<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(WardenError::Store(format!(
                "confidence {confidence} outside 0.0..=1.0"
            )));
        }
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE tasks SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
                params![confidence, Utc::now().to_rfc3339(), id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(WardenError::Store(format!("no task row '{id}'")));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> WardenResult<Option<TaskRow>> {
        let raw: Option<RawTask> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, agent, status, confidence, sub_agent, mode, updated_at
                 FROM tasks WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?
        };
        raw.map(task_from_raw).transpose()
    }

    async fn list_tasks(&self) -> WardenResult<Vec<TaskRow>> {
        let raws: Vec<RawTask> = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, agent, status, confidence, sub_agent, mode, updated_at
                     FROM tasks ORDER BY id",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })
                .map_err(store_err)?;
            rows.collect::<Result<_, _>>().map_err(store_err)?
        };
        raws.into_iter().map(task_from_raw).collect()
    }

    async fn record_performance(&self, row: &PerformanceRow) -> WardenResult<()> {
        let duration = i64::try_from(row.duration_ms).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO performance (agent, task_id, duration, success, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.agent,
                row.task_id,
                duration,
                row.success,
                row.recorded_at.to_rfc3339()
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn performance_for(&self, agent: &str) -> WardenResult<Vec<PerformanceRow>> {
        self.query_performance(Some(agent))
    }

    async fn list_performance(&self) -> WardenResult<Vec<PerformanceRow>> {
        self.query_performance(None)
    }
}
