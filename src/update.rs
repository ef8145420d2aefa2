//! Inbound field updates.
//!
//! Field clients post a flat JSON object naming one task and the six
//! operator-editable values. The payload is checked in two passes, presence
//! then type, and each pass reports every problem it finds at once. Nothing
//! touches the store unless both passes succeed.

use crate::models::OperatorFields;
use crate::storage::TenantStore;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::fmt;

/// Keys every update payload must carry.
pub const REQUIRED_FIELDS: [&str; 12] = [
    "uid",
    "project_name",
    "task_name",
    "step_name",
    "user_working",
    "is_complete",
    "actual_work",
    "additional_time",
    "task_note",
    "actual_start",
    "actual_finish",
    "security_token",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// A validated update for one task.
#[derive(Clone, PartialEq)]
pub struct FieldUpdate {
    pub uid: i64,
    pub project_name: String,
    /// Carried for the client's benefit; never written
    pub task_name: String,
    /// Carried for the client's benefit; never written
    pub step_name: String,
    pub fields: OperatorFields,
    /// Caller-asserted identity. Not verified here.
    pub security_token: String,
}

impl fmt::Debug for FieldUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldUpdate")
            .field("uid", &self.uid)
            .field("project_name", &self.project_name)
            .field("task_name", &self.task_name)
            .field("step_name", &self.step_name)
            .field("fields", &self.fields)
            .field("security_token", &"<redacted>")
            .finish()
    }
}

/// Parse a calendar value as sent by field clients.
///
/// Accepts RFC 3339 (wall-clock time kept, offset dropped), `YYYY-MM-DD
/// HH:MM[:SS]` with a space or `T`, and a bare date meaning midnight.
pub fn parse_datetime_input(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_uid(value: &Value) -> std::result::Result<i64, String> {
    let uid = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match uid {
        Some(uid) if uid >= 0 => Ok(uid),
        _ => Err(format!("uid must be a non-negative integer, got {}", value)),
    }
}

fn parse_bool(key: &str, value: &Value) -> std::result::Result<bool, String> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| format!("{} must be a boolean, got {}", key, value))
}

fn parse_hours(key: &str, value: &Value) -> std::result::Result<f64, String> {
    let parsed = match value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(hours) if hours.is_finite() && hours >= 0.0 => Ok(hours),
        _ => Err(format!("{} must be a non-negative number, got {}", key, value)),
    }
}

fn parse_date_field(key: &str, value: &Value) -> std::result::Result<Option<NaiveDateTime>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_datetime_input(s)
            .map(Some)
            .ok_or_else(|| format!("{} is not a recognized date: {}", key, s)),
        _ => Err(format!("{} must be a date string, got {}", key, value)),
    }
}

fn string_or_null(key: &str, value: &Value) -> std::result::Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(format!("{} must be a string, got {}", key, value)),
    }
}

fn non_empty_string(key: &str, value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(format!("{} must be a non-empty string", key)),
    }
}

/// Collects typed-check failures so every problem is reported at once.
struct Checks<'a> {
    payload: &'a Map<String, Value>,
    errors: Vec<String>,
}

impl<'a> Checks<'a> {
    fn check<T>(
        &mut self,
        key: &str,
        parse: impl FnOnce(&Value) -> std::result::Result<T, String>,
    ) -> Option<T> {
        match parse(&self.payload[key]) {
            Ok(value) => Some(value),
            Err(reason) => {
                self.errors.push(reason);
                None
            }
        }
    }
}

/// Validate a payload into a [`FieldUpdate`].
pub fn parse_update(payload: &Value) -> Result<FieldUpdate> {
    let Some(payload) = payload.as_object() else {
        return Err(Error::Validation(vec![
            "payload must be a JSON object".to_string(),
        ]));
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|key| !payload.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Validation(vec![format!(
            "missing {}",
            missing.join(", ")
        )]));
    }

    let mut checks = Checks {
        payload,
        errors: Vec::new(),
    };
    let uid = checks.check("uid", parse_uid);
    let project_name = checks.check("project_name", |v| non_empty_string("project_name", v));
    let task_name = checks.check("task_name", |v| string_or_null("task_name", v));
    let step_name = checks.check("step_name", |v| string_or_null("step_name", v));
    let user_working = checks.check("user_working", |v| string_or_null("user_working", v));
    let is_complete = checks.check("is_complete", |v| parse_bool("is_complete", v));
    let actual_work = checks.check("actual_work", |v| parse_hours("actual_work", v));
    let additional_time = checks.check("additional_time", |v| parse_hours("additional_time", v));
    let task_note = checks.check("task_note", |v| string_or_null("task_note", v));
    let actual_start = checks.check("actual_start", |v| parse_date_field("actual_start", v));
    let actual_finish = checks.check("actual_finish", |v| parse_date_field("actual_finish", v));
    let security_token =
        checks.check("security_token", |v| non_empty_string("security_token", v));

    if let (Some(Some(start)), Some(Some(finish))) = (actual_start, actual_finish) {
        if finish < start {
            checks
                .errors
                .push(format!("actual_finish {} is before actual_start {}", finish, start));
        }
    }

    match (
        uid,
        project_name,
        task_name,
        step_name,
        user_working,
        is_complete,
        actual_work,
        additional_time,
        task_note,
        actual_start,
        actual_finish,
        security_token,
    ) {
        (
            Some(uid),
            Some(project_name),
            Some(task_name),
            Some(step_name),
            Some(user_working),
            Some(is_complete),
            Some(actual_work),
            Some(additional_time),
            Some(task_note),
            Some(actual_start),
            Some(actual_finish),
            Some(security_token),
        ) if checks.errors.is_empty() => Ok(FieldUpdate {
            uid,
            project_name,
            task_name: task_name.unwrap_or_default(),
            step_name: step_name.unwrap_or_default(),
            fields: OperatorFields {
                user_working: user_working.unwrap_or_default(),
                is_complete,
                actual_work,
                additional_time,
                task_note,
                actual_start,
                actual_finish,
            },
            security_token,
        }),
        _ => Err(Error::Validation(checks.errors)),
    }
}

/// Overwrite the six operator-editable fields of the matching task.
pub fn apply_update(store: &TenantStore, update: &FieldUpdate) -> Result<()> {
    match store.update_operator_fields(&update.project_name, update.uid, &update.fields) {
        Ok(true) => {
            tracing::info!(
                tenant = %store.tenant(),
                project = %update.project_name,
                uid = update.uid,
                complete = update.fields.is_complete,
                "applied field update"
            );
            Ok(())
        }
        Ok(false) => Err(not_found(update)),
        Err(Error::Database(e)) => Err(Error::Persistence(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Error for an update whose task is not in the store.
pub fn not_found(update: &FieldUpdate) -> Error {
    Error::NotFound(format!(
        "Project: {} with uid: {} not found",
        update.project_name, update.uid
    ))
}

/// Validate a raw payload and apply it.
pub fn accept_update(store: &TenantStore, payload: &Value) -> Result<FieldUpdate> {
    let update = parse_update(payload)?;
    apply_update(store, &update)?;
    Ok(update)
}
