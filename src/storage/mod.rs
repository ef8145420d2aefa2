//! Storage layer for TimeJet data.
//!
//! Each tenant owns one SQLite file holding three tables:
//!
//! - `tasks` - persisted tasks keyed by (project_name, uid)
//! - `users` - users linked from resource names, keyed by (email, project_name, domain)
//! - `user_activity` - append-only activity events
//!
//! [`gateway::TenantGateway`] maps tenant names to store files and keeps the
//! opened stores so the schema is materialized once per tenant.

pub mod gateway;

pub use gateway::{TenantGateway, TenantLayout, normalize_tenant};

use crate::models::{
    DerivedTask, EventKind, NewActivityEvent, OperatorFields, PersistedTask, UserActivityEvent, UserRecord,
};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// Text format of calendar values in the store.
pub const STORE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

const TASK_COLUMNS: &str = "id, uid, project_name, task_name, step_name, users_assigned, \
     user_working, is_complete, is_milestone, actual_work, remaining_time, additional_time, \
     task_note, actual_start, actual_finish, project_coin_budget, progress, created_at, updated_at";

const USER_COLUMNS: &str = "user_id, email, fullname, domain, coin_balance, project_name, \
     phone_time, email_time, meeting_time, travel_time";

const ACTIVITY_COLUMNS: &str = "id, user_id, project_uid, project_name, task_name, step_name, \
     event_name, event_start, event_finish";

/// A user about to be inserted with zeroed counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub fullname: Option<String>,
    pub domain: String,
    pub project_name: String,
}

/// Store for a single tenant.
pub struct TenantStore {
    tenant: String,
    path: Option<PathBuf>,
    conn: Connection,
}

impl TenantStore {
    /// Open (creating if needed) the store file for a tenant.
    pub fn open(path: &Path, tenant: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            tenant: tenant.to_string(),
            path: Some(path.to_path_buf()),
            conn,
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory(tenant: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            tenant: tenant.to_string(),
            path: None,
            conn,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initialize the SQLite schema.
    ///
    /// Refuses stores stamped by a newer release.
    fn init_schema(conn: &Connection) -> Result<()> {
        let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "store schema version {} is newer than supported version {}",
                found, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid INTEGER NOT NULL,
                project_name TEXT NOT NULL,
                task_name TEXT NOT NULL DEFAULT '',
                step_name TEXT NOT NULL DEFAULT '',
                users_assigned TEXT NOT NULL DEFAULT '',
                user_working TEXT NOT NULL DEFAULT '',
                is_complete INTEGER NOT NULL DEFAULT 0,
                is_milestone INTEGER NOT NULL DEFAULT 0,
                actual_work REAL NOT NULL DEFAULT 0,
                remaining_time REAL,
                additional_time REAL NOT NULL DEFAULT 0,
                task_note TEXT,
                actual_start TEXT,
                actual_finish TEXT,
                project_coin_budget INTEGER,
                progress INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (project_name, uid)
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                fullname TEXT,
                domain TEXT NOT NULL,
                coin_balance INTEGER NOT NULL DEFAULT 0,
                project_name TEXT NOT NULL,
                phone_time REAL NOT NULL DEFAULT 0,
                email_time REAL NOT NULL DEFAULT 0,
                meeting_time REAL NOT NULL DEFAULT 0,
                travel_time REAL NOT NULL DEFAULT 0,
                UNIQUE (email, project_name, domain)
            );

            CREATE TABLE IF NOT EXISTS user_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                project_uid INTEGER NOT NULL,
                project_name TEXT NOT NULL,
                task_name TEXT NOT NULL DEFAULT '',
                step_name TEXT NOT NULL DEFAULT '',
                event_name TEXT NOT NULL,
                event_start TEXT NOT NULL,
                event_finish TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_name);
            CREATE INDEX IF NOT EXISTS idx_activity_user ON user_activity(user_id);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(())
    }

    /// Schema version recorded in the store file.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// Run `f` inside a transaction; rolled back if `f` fails.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    // === Task Operations ===

    /// Insert a task unless (project, uid) already exists.
    ///
    /// Returns true when a row was inserted. Existing rows are left untouched.
    pub fn insert_task_if_absent(&self, project_name: &str, task: &DerivedTask) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO tasks
            (uid, project_name, task_name, step_name, users_assigned, is_milestone,
             remaining_time, progress, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
            params![
                task.record.unique_id,
                project_name,
                task.task_name,
                task.step_name,
                task.users_assigned(),
                task.record.is_milestone,
                task.remaining_time(),
                task.progress,
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get a task by (project name, uid).
    pub fn get_task(&self, project_name: &str, uid: i64) -> Result<Option<PersistedTask>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_name = ?1 AND uid = ?2",
            TASK_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![project_name, uid], task_from_row)
            .optional()?)
    }

    /// All tasks, grouped by project and ordered by uid.
    pub fn list_tasks(&self) -> Result<Vec<PersistedTask>> {
        let sql = format!(
            "SELECT {} FROM tasks ORDER BY project_name ASC, uid ASC",
            TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn count_tasks(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Overwrite the operator-editable fields of one task.
    ///
    /// Returns false when no task matches (project, uid).
    pub fn update_operator_fields(
        &self,
        project_name: &str,
        uid: i64,
        fields: &OperatorFields,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            r#"
            UPDATE tasks SET
                user_working = ?1,
                is_complete = ?2,
                actual_work = ?3,
                additional_time = ?4,
                task_note = ?5,
                actual_start = ?6,
                actual_finish = ?7,
                updated_at = ?8
            WHERE project_name = ?9 AND uid = ?10
            "#,
            params![
                fields.user_working,
                fields.is_complete,
                fields.actual_work,
                fields.additional_time,
                fields.task_note,
                fields.actual_start.map(format_datetime),
                fields.actual_finish.map(format_datetime),
                Utc::now().to_rfc3339(),
                project_name,
                uid,
            ],
        )?;
        Ok(updated > 0)
    }

    // === User Operations ===

    /// Find a user by the identity triple.
    pub fn find_user(
        &self,
        email: &str,
        project_name: &str,
        domain: &str,
    ) -> Result<Option<UserRecord>> {
        let sql = format!(
            "SELECT {} FROM users WHERE email = ?1 AND project_name = ?2 AND domain = ?3",
            USER_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![email, project_name, domain], user_from_row)
            .optional()?)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let sql = format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [user_id], user_from_row)
            .optional()?)
    }

    /// Insert a user with all counters at zero.
    pub fn insert_user(&self, user: &NewUser) -> Result<UserRecord> {
        self.conn.execute(
            r#"
            INSERT INTO users (email, fullname, domain, coin_balance, project_name,
                               phone_time, email_time, meeting_time, travel_time)
            VALUES (?1, ?2, ?3, 0, ?4, 0, 0, 0, 0)
            "#,
            params![user.email, user.fullname, user.domain, user.project_name],
        )?;
        let user_id = self.conn.last_insert_rowid();
        self.get_user(user_id)?
            .ok_or_else(|| Error::Persistence(format!("user {} vanished after insert", user_id)))
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let sql = format!("SELECT {} FROM users ORDER BY user_id ASC", USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    // === Activity Operations ===

    /// Append an activity event.
    pub fn append_activity(&self, event: &NewActivityEvent) -> Result<UserActivityEvent> {
        self.conn.execute(
            r#"
            INSERT INTO user_activity (user_id, project_uid, project_name, task_name,
                                       step_name, event_name, event_start, event_finish)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.user_id,
                event.project_uid,
                event.project_name,
                event.task_name,
                event.step_name,
                event.event_name.as_str(),
                format_datetime(event.event_start),
                event.event_finish.map(format_datetime),
            ],
        )?;
        Ok(UserActivityEvent {
            id: self.conn.last_insert_rowid(),
            event: event.clone(),
        })
    }

    /// Activity events in insertion order, optionally for one user.
    pub fn list_activity(&self, user_id: Option<i64>) -> Result<Vec<UserActivityEvent>> {
        let sql = format!(
            "SELECT {} FROM user_activity WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id ASC",
            ACTIVITY_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map([user_id], activity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

/// Format a calendar value for storage.
pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format(STORE_DATETIME_FORMAT).to_string()
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn naive_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, STORE_DATETIME_FORMAT).map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn utc_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedTask> {
    Ok(PersistedTask {
        id: row.get(0)?,
        uid: row.get(1)?,
        project_name: row.get(2)?,
        task_name: row.get(3)?,
        step_name: row.get(4)?,
        users_assigned: row.get(5)?,
        is_milestone: row.get(8)?,
        remaining_time: row.get(10)?,
        project_coin_budget: row.get(15)?,
        progress: row.get(16)?,
        operator: OperatorFields {
            user_working: row.get(6)?,
            is_complete: row.get(7)?,
            actual_work: row.get(9)?,
            additional_time: row.get(11)?,
            task_note: row.get(12)?,
            actual_start: naive_column(row, 13)?,
            actual_finish: naive_column(row, 14)?,
        },
        created_at: utc_column(row, 17)?,
        updated_at: utc_column(row, 18)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        email: row.get(1)?,
        fullname: row.get(2)?,
        domain: row.get(3)?,
        coin_balance: row.get(4)?,
        project_name: row.get(5)?,
        phone_time: row.get(6)?,
        email_time: row.get(7)?,
        meeting_time: row.get(8)?,
        travel_time: row.get(9)?,
    })
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<UserActivityEvent> {
    let kind: String = row.get(6)?;
    let event_name = kind.parse::<EventKind>().map_err(|e: String| {
        conversion_error(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let event_start = naive_column(row, 7)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(7, "event_start".to_string(), Type::Null))?;
    Ok(UserActivityEvent {
        id: row.get(0)?,
        event: NewActivityEvent {
            user_id: row.get(1)?,
            project_uid: row.get(2)?,
            project_name: row.get(3)?,
            task_name: row.get(4)?,
            step_name: row.get(5)?,
            event_name,
            event_start,
            event_finish: naive_column(row, 8)?,
        },
    })
}
