//! Data models for TimeJet entities.
//!
//! This module defines the core data structures:
//! - `TaskRecord` / `ResourceRecord` - flat records read from a project document
//! - `DerivedTask` - a task record after outline reconstruction
//! - `PersistedTask` - the durable task row owned by reconciliation
//! - `OperatorFields` - the operator-editable subset of a persisted task
//! - `UserRecord` - a user linked from a resource name
//! - `UserActivityEvent` - append-only audit of user activity

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A task as it appears in a project document, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique id within the document
    pub unique_id: i64,

    pub name: String,

    /// Nesting depth, 1 for top-level tasks
    pub outline_level: u32,

    /// Hierarchical position such as "1.2.3"
    pub outline_number: String,

    /// Grouping/summary node
    pub is_rollup: bool,

    pub is_milestone: bool,

    /// Unique ids of predecessor tasks
    #[serde(default)]
    pub predecessors: BTreeSet<i64>,

    /// Baseline duration in minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_duration_minutes: Option<f64>,

    /// Display names of assigned resources, in assignment order
    #[serde(default)]
    pub resource_names: Vec<String>,
}

/// A resource and the tasks it is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub unique_id: i64,

    /// Display name; may carry an email address
    pub name: String,

    #[serde(default)]
    pub assigned_task_uids: Vec<i64>,
}

/// A task record with its reconstructed grouping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedTask {
    #[serde(flatten)]
    pub record: TaskRecord,

    /// Name of the nearest enclosing rollup, empty at top level
    pub task_name: String,

    /// "{outline_number}, {name}"
    pub step_name: String,

    /// None for rollups, Some(0) for trackable tasks
    pub progress: Option<u8>,
}

impl DerivedTask {
    /// Assigned resource names as stored in `users_assigned`.
    pub fn users_assigned(&self) -> String {
        self.record.resource_names.join("; ")
    }

    /// Baseline duration in hours.
    pub fn remaining_time(&self) -> Option<f64> {
        self.record.baseline_duration_minutes.map(|m| m / 60.0)
    }
}

/// The operator-editable fields of a persisted task.
///
/// Only the field update path writes these; reconciliation never does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorFields {
    /// Who is currently working the task
    #[serde(default)]
    pub user_working: String,

    #[serde(default)]
    pub is_complete: bool,

    /// Actual work in hours
    #[serde(default)]
    pub actual_work: f64,

    /// Additional time in hours
    #[serde(default)]
    pub additional_time: f64,

    pub task_note: Option<String>,

    pub actual_start: Option<NaiveDateTime>,

    pub actual_finish: Option<NaiveDateTime>,
}

/// A durable task row, identified by (project name, uid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTask {
    /// Row id
    pub id: i64,

    /// Unique id of the task inside its document
    pub uid: i64,

    pub project_name: String,

    pub task_name: String,

    pub step_name: String,

    pub users_assigned: String,

    pub is_milestone: bool,

    /// Baseline duration in hours
    pub remaining_time: Option<f64>,

    pub project_coin_budget: Option<i64>,

    pub progress: Option<u8>,

    #[serde(flatten)]
    pub operator: OperatorFields,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A user linked from a resource display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,

    /// Lower-cased email address
    pub email: String,

    pub fullname: Option<String>,

    /// Tenant the user belongs to
    pub domain: String,

    pub coin_balance: i64,

    pub project_name: String,

    /// Hours spent on calls
    pub phone_time: f64,

    pub email_time: f64,

    pub meeting_time: f64,

    pub travel_time: f64,
}

/// Kinds of recorded user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Pause,
    End,
    Phone,
    Email,
    Meeting,
    Travel,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Start,
        EventKind::Pause,
        EventKind::End,
        EventKind::Phone,
        EventKind::Email,
        EventKind::Meeting,
        EventKind::Travel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Pause => "pause",
            EventKind::End => "end",
            EventKind::Phone => "phone",
            EventKind::Email => "email",
            EventKind::Meeting => "meeting",
            EventKind::Travel => "travel",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown event kind '{}' (expected one of: start, pause, end, phone, email, meeting, travel)",
                    s
                )
            })
    }
}

/// An activity event about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivityEvent {
    pub user_id: i64,
    pub project_uid: i64,
    pub project_name: String,
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub step_name: String,
    pub event_name: EventKind,
    pub event_start: NaiveDateTime,
    #[serde(default)]
    pub event_finish: Option<NaiveDateTime>,
}

/// A recorded activity event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivityEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: NewActivityEvent,
}
