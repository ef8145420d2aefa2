//! Command implementations for the TimeJet CLI and HTTP service.
//!
//! This module contains the business logic behind each command. Commands
//! that touch tenant data run on a [`Service`], which owns the tenant
//! gateway, the document engine and the mailer. Every command returns a
//! result value implementing [`Output`] so the caller picks the format.
//!
//! - `import` - reconcile a tenant's documents into its store
//! - `projects` - list a tenant's documents
//! - `dump` - outbound read of tasks and users
//! - `update` - apply an inbound field update
//! - `report` - render and deliver a project report
//! - `activity` - record and list user activity
//! - `doc` - author and inspect project documents
//! - `config` - show resolved settings

use crate::config::ResolvedConfig;
use crate::document::{self, DocumentEngine, ProjectDocument, RetryPolicy, codec};
use crate::mail::{Mailer, OutboxMailer};
use crate::models::{EventKind, NewActivityEvent, PersistedTask, UserActivityEvent, UserRecord};
use crate::reconcile::{self, ReconcileReport};
use crate::report::{self, Delivery, ReportRequest, ReportStatus, SourceDocument};
use crate::storage::TenantGateway;
use crate::update;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_of<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

// === Service ===

/// Everything a tenant-facing command needs.
pub struct Service {
    gateway: TenantGateway,
    engine: DocumentEngine,
    mailer: Box<dyn Mailer>,
    mail_from: String,
}

impl Service {
    pub fn new(
        data_root: &Path,
        policy: RetryPolicy,
        mailer: Box<dyn Mailer>,
        mail_from: impl Into<String>,
    ) -> Self {
        Self {
            gateway: TenantGateway::new(data_root),
            engine: DocumentEngine::new(policy),
            mailer,
            mail_from: mail_from.into(),
        }
    }

    /// Service spooling mail into each tenant's outbox.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.data_root(),
            config.retry_policy(),
            Box::new(OutboxMailer::new(config.data_root())),
            config.mail_from.value.clone(),
        )
    }

    pub fn data_root(&self) -> &Path {
        self.gateway.data_root()
    }

    /// Reconcile every document of a tenant.
    pub fn import(&mut self, tenant: &str, acquired_by: Option<&str>) -> Result<ImportResult> {
        let report = reconcile::reconcile_tenant(&mut self.gateway, tenant, acquired_by)?;
        Ok(ImportResult { report })
    }

    /// Documents in a tenant directory with their project names.
    pub fn projects(&self, tenant: &str) -> Result<ProjectsResult> {
        let layout = self.gateway.layout(tenant)?;
        let projects = report::list_projects(&self.engine, &layout.dir)?;
        Ok(ProjectsResult {
            tenant: layout.tenant,
            projects,
        })
    }

    /// Every persisted task and user of a tenant.
    pub fn dump(&mut self, tenant: &str) -> Result<DumpResult> {
        let store = self.gateway.store(tenant)?;
        Ok(DumpResult {
            tasks: store.list_tasks()?,
            users: store.list_users()?,
        })
    }

    /// Validate and apply an inbound field update.
    pub fn update(&mut self, tenant: &str, payload: &Value) -> Result<UpdateResult> {
        // validate before touching the tenant so a bad payload has no side effects
        let update = update::parse_update(payload)?;
        let Some(store) = self.gateway.existing_store(tenant)? else {
            return Err(update::not_found(&update));
        };
        update::apply_update(store, &update)?;
        Ok(UpdateResult {
            project_name: update.project_name,
            uid: update.uid,
        })
    }

    /// Render a report for a project and mail it to the requester.
    pub fn report(
        &mut self,
        tenant: &str,
        project: &str,
        requested_by: Option<&str>,
    ) -> Result<ReportResult> {
        let request = ReportRequest {
            tenant: tenant.to_string(),
            project: project.to_string(),
            requested_by: requested_by.map(str::to_string),
            date: chrono::Local::now().date_naive(),
        };
        let status = report::render_report(
            &mut self.gateway,
            &self.engine,
            self.mailer.as_ref(),
            &self.mail_from,
            &request,
        )?;
        Ok(ReportResult { status })
    }

    /// Append an activity event for an existing user.
    pub fn record_activity(
        &mut self,
        tenant: &str,
        event: &NewActivityEvent,
    ) -> Result<ActivityRecorded> {
        let store = self.gateway.store(tenant)?;
        if store.get_user(event.user_id)?.is_none() {
            return Err(Error::NotFound(format!("User: {} not found", event.user_id)));
        }
        let event = store.append_activity(event)?;
        tracing::info!(
            tenant = %store.tenant(),
            user_id = event.event.user_id,
            kind = %event.event.event_name,
            "recorded activity"
        );
        Ok(ActivityRecorded { event })
    }

    pub fn list_activity(&mut self, tenant: &str, user_id: Option<i64>) -> Result<ActivityList> {
        let store = self.gateway.store(tenant)?;
        Ok(ActivityList {
            events: store.list_activity(user_id)?,
        })
    }
}

/// Validate a JSON activity payload.
///
/// Required: `user_id`, `project_uid`, `project_name`, `event_name`,
/// `event_start`. Optional: `task_name`, `step_name`, `event_finish`.
pub fn parse_activity(payload: &Value) -> Result<NewActivityEvent> {
    let Some(obj) = payload.as_object() else {
        return Err(Error::Validation(vec![
            "payload must be a JSON object".to_string(),
        ]));
    };

    let missing: Vec<&str> = ["user_id", "project_uid", "project_name", "event_name", "event_start"]
        .into_iter()
        .filter(|key| {
            obj.get(*key)
                .is_none_or(|v| v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()))
        })
        .collect();
    if !missing.is_empty() {
        return Err(Error::Validation(vec![format!(
            "missing {}",
            missing.join(", ")
        )]));
    }

    let mut errors = Vec::new();
    let int = |key: &str, errors: &mut Vec<String>| -> Option<i64> {
        let value = &obj[key];
        let parsed = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
        if parsed.is_none() {
            errors.push(format!("{} must be an integer, got {}", key, value));
        }
        parsed
    };
    let text = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let date = |key: &str, errors: &mut Vec<String>| match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => {
            let parsed = value.as_str().and_then(update::parse_datetime_input);
            if parsed.is_none() {
                errors.push(format!("{} is not a recognized date: {}", key, value));
            }
            parsed
        }
    };

    let user_id = int("user_id", &mut errors);
    let project_uid = int("project_uid", &mut errors);
    let event_name = match obj["event_name"].as_str().map(str::parse::<EventKind>) {
        Some(Ok(kind)) => Some(kind),
        Some(Err(reason)) => {
            errors.push(reason);
            None
        }
        None => {
            errors.push("event_name must be a string".to_string());
            None
        }
    };
    let event_start = date("event_start", &mut errors);
    let event_finish = date("event_finish", &mut errors);
    if let (Some(start), Some(finish)) = (event_start, event_finish) {
        if finish < start {
            errors.push(format!("event_finish {} is before event_start {}", finish, start));
        }
    }

    match (user_id, project_uid, event_name, event_start) {
        (Some(user_id), Some(project_uid), Some(event_name), Some(event_start)) if errors.is_empty() => {
            Ok(NewActivityEvent {
                user_id,
                project_uid,
                project_name: text("project_name"),
                task_name: text("task_name"),
                step_name: text("step_name"),
                event_name,
                event_start,
                event_finish,
            })
        }
        _ => Err(Error::Validation(errors)),
    }
}

// === Import ===

#[derive(Serialize)]
pub struct ImportResult {
    #[serde(flatten)]
    pub report: ReconcileReport,
}

impl Output for ImportResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![format!(
            "Imported {} document(s) for {}: {} task(s) inserted, {} unchanged",
            report.documents.len(),
            report.tenant,
            report.inserted(),
            report.unchanged()
        )];
        for doc in &report.documents {
            lines.push(format!(
                "  {} ({}): +{} tasks, {} new users",
                doc.project_name,
                doc.file.display(),
                doc.inserted,
                doc.identities.created.len()
            ));
        }
        for skipped in &report.skipped {
            lines.push(format!("  skipped {}: {}", skipped.file.display(), skipped.reason));
        }
        lines.join("\n")
    }
}

// === Projects ===

#[derive(Serialize)]
struct ProjectEntry<'a> {
    file: &'a Path,
    project_name: &'a str,
}

pub struct ProjectsResult {
    pub tenant: String,
    pub projects: Vec<SourceDocument>,
}

impl Output for ProjectsResult {
    fn to_json(&self) -> String {
        let entries: Vec<ProjectEntry<'_>> = self
            .projects
            .iter()
            .map(|p| ProjectEntry {
                file: &p.path,
                project_name: &p.project_name,
            })
            .collect();
        json_of(&serde_json::json!({ "tenant": self.tenant, "projects": entries }))
    }

    fn to_human(&self) -> String {
        if self.projects.is_empty() {
            return format!("No project documents for {}", self.tenant);
        }
        self.projects
            .iter()
            .map(|p| format!("{}\t{}", p.project_name, p.path.display()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// === Dump ===

#[derive(Serialize)]
pub struct DumpResult {
    pub tasks: Vec<PersistedTask>,
    pub users: Vec<UserRecord>,
}

impl Output for DumpResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} task(s):", self.tasks.len())];
        for task in &self.tasks {
            lines.push(format!(
                "  [{}] {} #{} {}{}",
                if task.operator.is_complete { "x" } else { " " },
                task.project_name,
                task.uid,
                task.step_name,
                if task.task_name.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", task.task_name)
                }
            ));
        }
        lines.push(format!("{} user(s):", self.users.len()));
        for user in &self.users {
            lines.push(format!("  {} {} [{}]", user.user_id, user.email, user.project_name));
        }
        lines.join("\n")
    }
}

// === Update ===

#[derive(Debug, Serialize)]
pub struct UpdateResult {
    pub project_name: String,
    pub uid: i64,
}

impl Output for UpdateResult {
    fn to_json(&self) -> String {
        json_of(&serde_json::json!({
            "status": "ok",
            "project_name": self.project_name,
            "uid": self.uid,
        }))
    }

    fn to_human(&self) -> String {
        "ok".to_string()
    }
}

// === Report ===

#[derive(Serialize)]
pub struct ReportResult {
    #[serde(flatten)]
    pub status: ReportStatus,
}

impl Output for ReportResult {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        let status = &self.status;
        let mut lines = vec![format!(
            "Rendered {} ({} task(s) matched, {} field(s) written, {} failed)",
            status.report_path.display(),
            status.tasks_matched,
            status.fields_written,
            status.field_failures.len()
        )];
        for failure in &status.field_failures {
            if let report::FieldOutcome::Failed { reason } = &failure.outcome {
                lines.push(format!("  task {} {}: {}", failure.uid, failure.field, reason));
            }
        }
        lines.push(match &status.delivery {
            Delivery::Delivered { to } => format!("Delivered to {}", to),
            Delivery::Failed { to, reason } => format!("Delivery to {} failed: {}", to, reason),
            Delivery::Skipped { reason } => format!("Not delivered: {}", reason),
        });
        lines.join("\n")
    }
}

// === Activity ===

#[derive(Serialize)]
pub struct ActivityRecorded {
    #[serde(flatten)]
    pub event: UserActivityEvent,
}

impl Output for ActivityRecorded {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Recorded {} for user {} (event {})",
            self.event.event.event_name, self.event.event.user_id, self.event.id
        )
    }
}

#[derive(Serialize)]
pub struct ActivityList {
    pub events: Vec<UserActivityEvent>,
}

impl Output for ActivityList {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return "No activity".to_string();
        }
        self.events
            .iter()
            .map(|e| {
                format!(
                    "{}\tuser {}\t{}\t{} #{}\t{}",
                    e.id,
                    e.event.user_id,
                    e.event.event_name,
                    e.event.project_name,
                    e.event.project_uid,
                    e.event.event_start
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// === Doc ===

#[derive(Debug, Serialize)]
pub struct DocPacked {
    pub path: PathBuf,
    pub project_name: String,
    pub tasks: usize,
    pub resources: usize,
}

impl Output for DocPacked {
    fn to_json(&self) -> String {
        json_of(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Wrote {} ({}: {} task(s), {} resource(s))",
            self.path.display(),
            self.project_name,
            self.tasks,
            self.resources
        )
    }
}

/// Convert a JSON project description into a document file.
pub fn doc_pack(input: &Path, output: &Path) -> Result<DocPacked> {
    let content = fs::read_to_string(input)?;
    let doc: ProjectDocument = serde_json::from_str(&content)?;
    codec::validate(&doc).map_err(Error::InvalidInput)?;
    document::write_document(output, &doc)?;
    Ok(DocPacked {
        path: output.to_path_buf(),
        project_name: doc.project_name().unwrap_or_default().to_string(),
        tasks: doc.tasks.len(),
        resources: doc.resources.len(),
    })
}

pub struct DocShown {
    pub path: PathBuf,
    pub document: ProjectDocument,
}

impl Output for DocShown {
    fn to_json(&self) -> String {
        json_of(&self.document)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} ({})",
            self.document.project_name().unwrap_or_default(),
            self.path.display()
        )];
        for task in &self.document.tasks {
            let depth = task.outline_level.unwrap_or(1).saturating_sub(1) as usize;
            lines.push(format!(
                "{}{} {} [uid {}]{}{}",
                "  ".repeat(depth),
                task.outline_number.as_deref().unwrap_or("-"),
                task.name,
                task.unique_id,
                if task.summary { " (summary)" } else { "" },
                if task.milestone { " (milestone)" } else { "" }
            ));
        }
        lines.join("\n")
    }
}

/// Decode a document file.
pub fn doc_show(path: &Path) -> Result<DocShown> {
    Ok(DocShown {
        path: path.to_path_buf(),
        document: document::read_document(path)?,
    })
}

// === Config ===

pub struct ConfigShown {
    pub config: ResolvedConfig,
}

impl Output for ConfigShown {
    fn to_json(&self) -> String {
        json_of(&self.config)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = Vec::new();
        if let Some(ref path) = c.config_path {
            lines.push(format!("config-file  {} ({})", path.value.display(), path.source));
        }
        lines.push(format!("data-root    {} ({})", c.data_root.value.display(), c.data_root.source));
        lines.push(format!("host         {} ({})", c.host.value, c.host.source));
        lines.push(format!("port         {} ({})", c.port.value, c.port.source));
        lines.push(format!("mail-from    {} ({})", c.mail_from.value, c.mail_from.source));
        lines.push(format!(
            "open-retry   {} attempts, {}-{} ms ({})",
            c.open_attempts.value,
            c.open_initial_backoff_ms.value,
            c.open_max_backoff_ms.value,
            c.open_attempts.source
        ));
        lines.push(format!("log-filter   {} ({})", c.log_filter.value, c.log_filter.source));
        lines.join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShown {
    ConfigShown {
        config: config.clone(),
    }
}
