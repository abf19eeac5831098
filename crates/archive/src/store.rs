//! The SQLite store.

use crate::ArchiveError;
use chrono::{DateTime, Utc};
use nova_core::{Alert, AlertId, EventKind, SkyPosition, TaskId, TaskState, TelescopeId};
use nova_scheduler::TaskEvent;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;
use uuid::Uuid;

/// One journal entry as read back from the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTaskEvent {
    pub seq_no: u64,
    #[serde(flatten)]
    pub event: TaskEvent,
}

/// Latest known state of one task, derived from its journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task: TaskId,
    pub alert: AlertId,
    pub state: TaskState,
    pub telescope: Option<TelescopeId>,
    pub updated_at: DateTime<Utc>,
}

/// Handle to the archive database.
///
/// The connection sits behind a mutex; every operation is one short
/// statement, so contention between the write-behind consumer and the
/// ops surface stays negligible.
pub struct Archive {
    conn: Mutex<Connection>,
}

impl Archive {
    /// Create or open the archive. `:memory:` is accepted for tests and
    /// ephemeral deployments.
    pub fn open(path: &str) -> Result<Self, ArchiveError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn
        };

        Self::init_schema(&conn)?;
        info!(path, "history archive opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), ArchiveError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                kind TEXT NOT NULL,
                ra_deg REAL NOT NULL,
                dec_deg REAL NOT NULL,
                error_deg REAL NOT NULL,
                event_time INTEGER NOT NULL,
                significance REAL,
                astrophysical INTEGER NOT NULL,
                expires_at INTEGER,
                duplicate_of TEXT,
                PRIMARY KEY (alert_id, received_at)
            );

            CREATE TABLE IF NOT EXISTS task_events (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                alert_id TEXT NOT NULL,
                from_state TEXT,
                to_state TEXT NOT NULL,
                telescope TEXT,
                at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_received ON alerts(received_at);
            CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id);
            CREATE INDEX IF NOT EXISTS idx_task_events_alert ON task_events(alert_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one normalized notice. Revisions of the same trigger land
    /// as separate rows keyed by receipt time.
    pub fn record_alert(&self, alert: &Alert) -> Result<(), ArchiveError> {
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO alerts (
                alert_id, received_at, kind, ra_deg, dec_deg, error_deg,
                event_time, significance, astrophysical, expires_at, duplicate_of
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                alert.id.as_str(),
                alert.received_at.timestamp_millis(),
                alert.kind.to_string(),
                alert.position.ra_deg,
                alert.position.dec_deg,
                alert.position.error_deg,
                alert.event_time.timestamp_millis(),
                alert.significance,
                alert.astrophysical,
                alert.expires_at.map(|t| t.timestamp_millis()),
                alert.duplicate_of.as_ref().map(|id| id.as_str().to_string()),
            ],
        )?;
        Ok(())
    }

    /// Append one task lifecycle event to the journal.
    pub fn record_task_event(&self, event: &TaskEvent) -> Result<u64, ArchiveError> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO task_events (task_id, alert_id, from_state, to_state, telescope, at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.task.as_uuid().to_string(),
                event.alert.as_str(),
                event.from.map(|s| s.to_string()),
                event.to.to_string(),
                event.telescope.as_ref().map(|t| t.as_str().to_string()),
                event.at.timestamp_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    /// Most recent notices first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>, ArchiveError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT alert_id, received_at, kind, ra_deg, dec_deg, error_deg,
                   event_time, significance, astrophysical, expires_at, duplicate_of
            FROM alerts
            ORDER BY received_at DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt
            .query_map([limit as i64], alert_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Every recorded notice for one trigger, oldest first.
    pub fn alert_history(&self, alert: &AlertId) -> Result<Vec<Alert>, ArchiveError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT alert_id, received_at, kind, ra_deg, dec_deg, error_deg,
                   event_time, significance, astrophysical, expires_at, duplicate_of
            FROM alerts
            WHERE alert_id = ?1
            ORDER BY received_at ASC
            "#,
        )?;
        let rows = stmt
            .query_map([alert.as_str()], alert_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Full lifecycle journal for one task, in order.
    pub fn events_for_task(&self, task: TaskId) -> Result<Vec<ArchivedTaskEvent>, ArchiveError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq_no, task_id, alert_id, from_state, to_state, telescope, at
            FROM task_events
            WHERE task_id = ?1
            ORDER BY seq_no ASC
            "#,
        )?;
        let rows = stmt
            .query_map([task.as_uuid().to_string()], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Latest state per task, most recently updated first.
    pub fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskSummary>, ArchiveError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT e.task_id, e.alert_id, e.to_state, e.telescope, e.at
            FROM task_events e
            JOIN (
                SELECT task_id, MAX(seq_no) AS seq
                FROM task_events
                GROUP BY task_id
            ) latest ON e.task_id = latest.task_id AND e.seq_no = latest.seq
            ORDER BY e.at DESC, e.task_id ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt
            .query_map([limit as i64], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    /// Latest state of every task spawned by one trigger.
    pub fn tasks_for_alert(&self, alert: &AlertId) -> Result<Vec<TaskSummary>, ArchiveError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT e.task_id, e.alert_id, e.to_state, e.telescope, e.at
            FROM task_events e
            JOIN (
                SELECT task_id, MAX(seq_no) AS seq
                FROM task_events
                WHERE alert_id = ?1
                GROUP BY task_id
            ) latest ON e.task_id = latest.task_id AND e.seq_no = latest.seq
            ORDER BY e.at DESC, e.task_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map([alert.as_str()], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }
}

type SqlRow<'a, 'b> = &'a rusqlite::Row<'b>;

fn alert_from_row(row: SqlRow<'_, '_>) -> rusqlite::Result<Result<Alert, ArchiveError>> {
    let id: String = row.get(0)?;
    let received_at: i64 = row.get(1)?;
    let kind: String = row.get(2)?;
    let position = SkyPosition::new(row.get(3)?, row.get(4)?, row.get(5)?);
    let event_time: i64 = row.get(6)?;
    let significance: Option<f64> = row.get(7)?;
    let astrophysical: bool = row.get(8)?;
    let expires_at: Option<i64> = row.get(9)?;
    let duplicate_of: Option<String> = row.get(10)?;

    Ok(kind_from_str(&kind).map(move |kind| Alert {
        id: AlertId::new(id),
        kind,
        position,
        event_time: timestamp(event_time),
        received_at: timestamp(received_at),
        significance,
        astrophysical,
        expires_at: expires_at.map(timestamp),
        duplicate_of: duplicate_of.map(AlertId::new),
    }))
}

fn event_from_row(
    row: SqlRow<'_, '_>,
) -> rusqlite::Result<Result<ArchivedTaskEvent, ArchiveError>> {
    let seq_no: i64 = row.get(0)?;
    let task: String = row.get(1)?;
    let alert: String = row.get(2)?;
    let from: Option<String> = row.get(3)?;
    let to: String = row.get(4)?;
    let telescope: Option<String> = row.get(5)?;
    let at: i64 = row.get(6)?;

    let convert = move || -> Result<ArchivedTaskEvent, ArchiveError> {
        Ok(ArchivedTaskEvent {
            seq_no: seq_no as u64,
            event: TaskEvent {
                task: task_id_from_str(&task)?,
                alert: AlertId::new(alert),
                from: from.as_deref().map(state_from_str).transpose()?,
                to: state_from_str(&to)?,
                telescope: telescope.map(TelescopeId::new),
                at: timestamp(at),
            },
        })
    };
    Ok(convert())
}

fn summary_from_row(row: SqlRow<'_, '_>) -> rusqlite::Result<Result<TaskSummary, ArchiveError>> {
    let task: String = row.get(0)?;
    let alert: String = row.get(1)?;
    let state: String = row.get(2)?;
    let telescope: Option<String> = row.get(3)?;
    let at: i64 = row.get(4)?;

    let convert = move || -> Result<TaskSummary, ArchiveError> {
        Ok(TaskSummary {
            task: task_id_from_str(&task)?,
            alert: AlertId::new(alert),
            state: state_from_str(&state)?,
            telescope: telescope.map(TelescopeId::new),
            updated_at: timestamp(at),
        })
    };
    Ok(convert())
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn task_id_from_str(s: &str) -> Result<TaskId, ArchiveError> {
    Uuid::parse_str(s)
        .map(TaskId::from)
        .map_err(|_| ArchiveError::Corrupt {
            field: "task_id",
            value: s.to_string(),
        })
}

fn kind_from_str(s: &str) -> Result<EventKind, ArchiveError> {
    Ok(match s {
        "gamma_ray_burst" => EventKind::GammaRayBurst,
        "gravitational_wave" => EventKind::GravitationalWave,
        "fast_xray_transient" => EventKind::FastXrayTransient,
        "supernova_candidate" => EventKind::SupernovaCandidate,
        "unknown" => EventKind::Unknown,
        other => {
            return Err(ArchiveError::Corrupt {
                field: "kind",
                value: other.to_string(),
            })
        }
    })
}

fn state_from_str(s: &str) -> Result<TaskState, ArchiveError> {
    Ok(match s {
        "pending" => TaskState::Pending,
        "assigned" => TaskState::Assigned,
        "dispatched" => TaskState::Dispatched,
        "completed" => TaskState::Completed,
        "failed" => TaskState::Failed,
        "expired" => TaskState::Expired,
        "cancelled" => TaskState::Cancelled,
        other => {
            return Err(ArchiveError::Corrupt {
                field: "state",
                value: other.to_string(),
            })
        }
    })
}
