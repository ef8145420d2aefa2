//! Report rendering.
//!
//! A report is a dated copy of a project's source document with the
//! operator-entered values from the tenant store written back into it:
//!
//! ```text
//! <tenant>/apollo.tjp  --copy-->  <tenant>/reports/Apollo_02_05_2024.tjp
//!                                  + notes, actual dates, actual work,
//!                                    milestone completion
//! ```
//!
//! Every field write is attempted on its own and recorded as a
//! [`FieldWrite`]; one failed write never stops the others. The copy is
//! saved, then mailed to the requester. Delivery is reported separately
//! and does not change whether the report counts as rendered.

use crate::document::engine::DocumentHandle;
use crate::document::{self, DocTask, DocumentEngine, TaskType};
use crate::mail::{Attachment, Mailer, OutgoingMail};
use crate::models::PersistedTask;
use crate::storage::TenantGateway;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Store hours to document minutes.
const MINUTES_PER_HOUR: f64 = 60.0;

/// What to render and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub tenant: String,
    pub project: String,
    /// Recipient of the rendered copy
    pub requested_by: Option<String>,
    /// Date stamped into the report file name
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldOutcome {
    Written,
    /// Nothing stored to write
    Skipped,
    Failed { reason: String },
}

/// Outcome of writing one field of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWrite {
    pub uid: i64,
    pub field: &'static str,
    #[serde(flatten)]
    pub outcome: FieldOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Delivered { to: String },
    Failed { to: String, reason: String },
    Skipped { reason: String },
}

/// Structured result of a render request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportStatus {
    pub rendered: bool,
    pub project: String,
    pub source_path: PathBuf,
    pub report_path: PathBuf,
    /// Document tasks with a stored counterpart
    pub tasks_matched: usize,
    pub tasks_unmatched: usize,
    pub fields_written: usize,
    pub fields_skipped: usize,
    pub field_failures: Vec<FieldWrite>,
    pub delivery: Delivery,
}

/// A source document and the project it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub project_name: String,
}

/// Documents in a tenant directory with their project names.
///
/// Unreadable documents are logged and left out.
pub fn list_projects(engine: &DocumentEngine, dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut projects = Vec::new();
    for path in document::list_documents(dir)? {
        match engine.open_read(&path) {
            Ok(doc) => {
                if let Some(name) = doc.project_name() {
                    projects.push(SourceDocument {
                        project_name: name.to_string(),
                        path,
                    });
                }
            }
            Err(Error::Parse { path, reason }) => {
                tracing::warn!(file = %path.display(), %reason, "skipping unreadable document");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(projects)
}

/// First document whose project name matches, ignoring case.
pub fn find_source_document(
    engine: &DocumentEngine,
    dir: &Path,
    project: &str,
) -> Result<Option<SourceDocument>> {
    let wanted = project.trim().to_lowercase();
    Ok(list_projects(engine, dir)?
        .into_iter()
        .find(|source| source.project_name.to_lowercase() == wanted))
}

/// `<reports>/<project>_<DD_MM_YYYY>.<ext>`, keeping the source extension.
pub fn report_path(reports_dir: &Path, project: &str, date: NaiveDate, source: &Path) -> PathBuf {
    let stem: String = project
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| document::DOCUMENT_EXTENSION.to_string());
    reports_dir.join(format!("{}_{}.{}", stem, date.format("%d_%m_%Y"), ext))
}

fn outcome(uid: i64, field: &'static str, result: Result<()>) -> FieldWrite {
    let outcome = match result {
        Ok(()) => FieldOutcome::Written,
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(uid, field, %reason, "field write failed");
            FieldOutcome::Failed { reason }
        }
    };
    FieldWrite { uid, field, outcome }
}

fn skipped(uid: i64, field: &'static str) -> FieldWrite {
    FieldWrite {
        uid,
        field,
        outcome: FieldOutcome::Skipped,
    }
}

/// Write the stored values of one task into its document row.
pub fn apply_stored_fields(task: &mut DocTask, stored: &PersistedTask) -> Vec<FieldWrite> {
    let uid = task.unique_id;
    let fields = &stored.operator;
    let mut writes = Vec::new();

    match &fields.task_note {
        Some(note) => {
            task.set_notes(note);
            writes.push(outcome(uid, "notes", Ok(())));
        }
        None => writes.push(skipped(uid, "notes")),
    }

    if task.summary {
        return writes;
    }

    task.set_task_type(TaskType::FixedWork);
    writes.push(outcome(uid, "task_type", Ok(())));

    // a stale finish from the source must not block the new start;
    // it comes back if the new finish is rejected
    let previous_finish = match fields.actual_finish {
        Some(_) => task.actual_finish.take(),
        None => None,
    };
    writes.push(match fields.actual_start {
        Some(start) => outcome(uid, "actual_start", task.set_actual_start(start)),
        None => skipped(uid, "actual_start"),
    });
    writes.push(match fields.actual_finish {
        Some(finish) => {
            let result = task.set_actual_finish(finish);
            if result.is_err() {
                task.actual_finish = previous_finish;
            }
            outcome(uid, "actual_finish", result)
        }
        None => skipped(uid, "actual_finish"),
    });

    writes.push(outcome(
        uid,
        "actual_work",
        task.set_actual_work_minutes(fields.actual_work * MINUTES_PER_HOUR),
    ));

    if task.milestone && stored.is_milestone {
        writes.push(outcome(uid, "percent_complete", task.set_percent_complete(100)));
    }

    writes
}

struct Rewrite {
    matched: usize,
    unmatched: usize,
    writes: Vec<FieldWrite>,
}

fn rewrite_copy(
    handle: &mut DocumentHandle,
    gateway: &mut TenantGateway,
    tenant: &str,
    project_name: &str,
) -> Result<Rewrite> {
    let store = gateway.store(tenant)?;
    let mut rewrite = Rewrite {
        matched: 0,
        unmatched: 0,
        writes: Vec::new(),
    };
    for task in handle.document_mut().tasks.iter_mut() {
        match store.get_task(project_name, task.unique_id)? {
            Some(stored) => {
                rewrite.matched += 1;
                rewrite.writes.extend(apply_stored_fields(task, &stored));
            }
            None => rewrite.unmatched += 1,
        }
    }
    Ok(rewrite)
}

fn deliver(
    mailer: &dyn Mailer,
    mail_from: &str,
    tenant: &str,
    project: &str,
    report: &Path,
    requested_by: Option<&str>,
) -> Delivery {
    let Some(to) = requested_by.map(str::trim).filter(|to| !to.is_empty()) else {
        return Delivery::Skipped {
            reason: "no recipient".to_string(),
        };
    };
    let to = to.to_lowercase();

    let sent = Attachment::from_path(report).and_then(|attachment| {
        mailer.send(&OutgoingMail {
            tenant: tenant.to_string(),
            from: mail_from.to_string(),
            to: to.clone(),
            subject: format!("Project report: {}", project),
            body: format!("The latest report for {} is attached.", project),
            attachment: Some(attachment),
        })
    });

    match sent {
        Ok(()) => Delivery::Delivered { to },
        Err(e) => {
            let reason = e.to_string();
            tracing::warn!(%to, %reason, "report delivery failed");
            Delivery::Failed { to, reason }
        }
    }
}

/// Render a project report and deliver it to the requester.
pub fn render_report(
    gateway: &mut TenantGateway,
    engine: &DocumentEngine,
    mailer: &dyn Mailer,
    mail_from: &str,
    request: &ReportRequest,
) -> Result<ReportStatus> {
    let layout = gateway.layout(&request.tenant)?;
    let source = find_source_document(engine, &layout.dir, &request.project)?.ok_or_else(|| {
        Error::NotFound(format!("No project document for project: {}", request.project))
    })?;

    let destination = report_path(
        &layout.reports_dir,
        &source.project_name,
        request.date,
        &source.path,
    );

    let rewrite = {
        let _render = engine.render_guard();
        fs::create_dir_all(&layout.reports_dir)?;

        let mut handle = engine.open_copy_for_write(&source.path, &destination)?;
        let rewrite = rewrite_copy(&mut handle, gateway, &layout.tenant, &source.project_name)?;
        handle.save_and_close()?;
        rewrite
    };

    let mut fields_written = 0;
    let mut fields_skipped = 0;
    let mut field_failures = Vec::new();
    for write in rewrite.writes {
        match write.outcome {
            FieldOutcome::Written => fields_written += 1,
            FieldOutcome::Skipped => fields_skipped += 1,
            FieldOutcome::Failed { .. } => field_failures.push(write),
        }
    }

    tracing::info!(
        tenant = %layout.tenant,
        project = %source.project_name,
        report = %destination.display(),
        matched = rewrite.matched,
        written = fields_written,
        failed = field_failures.len(),
        "rendered report"
    );

    let delivery = deliver(
        mailer,
        mail_from,
        &layout.tenant,
        &source.project_name,
        &destination,
        request.requested_by.as_deref(),
    );

    Ok(ReportStatus {
        rendered: true,
        project: source.project_name,
        source_path: source.path,
        report_path: destination,
        tasks_matched: rewrite.matched,
        tasks_unmatched: rewrite.unmatched,
        fields_written,
        fields_skipped,
        field_failures,
        delivery,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::engine::lock_path;
    use crate::document::{RetryPolicy, read_document};
    use crate::mail::RecordingMailer;
    use crate::models::OperatorFields;
    use crate::reconcile::reconcile_tenant;
    use crate::test_utils::{TestEnv, sample_document};
    use chrono::NaiveDateTime;
    use serde_json::json;
    use std::time::Duration;

    const FROM: &str = "TimeJet <timejet@example.com>";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn at(d: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, d)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn request(project: &str, to: Option<&str>) -> ReportRequest {
        ReportRequest {
            tenant: "acme".to_string(),
            project: project.to_string(),
            requested_by: to.map(str::to_string),
            date: day(),
        }
    }

    /// Tenant with the sample plan imported.
    fn imported(env: &TestEnv) -> TenantGateway {
        env.write_document("acme", "apollo.tjp", &sample_document());
        let mut gateway = env.gateway();
        reconcile_tenant(&mut gateway, "acme", None).unwrap();
        gateway
    }

    fn set_fields(gateway: &mut TenantGateway, uid: i64, fields: OperatorFields) {
        assert!(gateway
            .store("acme")
            .unwrap()
            .update_operator_fields("Apollo", uid, &fields)
            .unwrap());
    }

    fn render(gateway: &mut TenantGateway, mailer: &RecordingMailer) -> ReportStatus {
        render_report(
            gateway,
            &DocumentEngine::default(),
            mailer,
            FROM,
            &request("Apollo", Some("Ann@Acme.test")),
        )
        .unwrap()
    }

    #[test]
    fn test_report_path_format() {
        let path = report_path(Path::new("/data/acme/reports"), "Apollo", day(), Path::new("apollo.tjp"));
        assert_eq!(path, PathBuf::from("/data/acme/reports/Apollo_02_05_2024.tjp"));
        let odd = report_path(Path::new("r"), "A/B", day(), Path::new("x"));
        assert_eq!(odd, PathBuf::from("r/A_B_02_05_2024.tjp"));
    }

    #[test]
    fn test_find_source_document_ignores_case() {
        let env = TestEnv::new();
        let path = env.write_document("acme", "plan.tjp", &sample_document());
        let engine = DocumentEngine::default();
        let dir = env.data_path().join("acme");

        let found = find_source_document(&engine, &dir, "APOLLO").unwrap().unwrap();
        assert_eq!(found.path, path);
        assert_eq!(found.project_name, "Apollo");
        assert!(find_source_document(&engine, &dir, "Gemini").unwrap().is_none());
    }

    #[test]
    fn test_render_writes_stored_values_into_copy() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        set_fields(
            &mut gateway,
            3,
            OperatorFields {
                actual_work: 2.5,
                task_note: Some("primer only".to_string()),
                actual_start: Some(at(2, 8)),
                actual_finish: Some(at(2, 16)),
                ..Default::default()
            },
        );

        let mailer = RecordingMailer::default();
        let status = render(&mut gateway, &mailer);
        assert!(status.rendered);
        assert_eq!(status.tasks_matched, 5);
        assert!(status.field_failures.is_empty());
        assert_eq!(status.report_path, env.data_path().join("acme/reports/Apollo_02_05_2024.tjp"));

        let report = read_document(&status.report_path).unwrap();
        let sketch = report.task(3).unwrap();
        assert_eq!(sketch.actual_work_minutes, Some(150.0));
        assert_eq!(sketch.task_type, TaskType::FixedWork);
        assert_eq!(sketch.notes.as_deref(), Some("primer only"));
        assert_eq!(sketch.actual_start, Some(at(2, 8)));
        assert_eq!(sketch.actual_finish, Some(at(2, 16)));

        // source stays as it was
        let source = read_document(&env.data_path().join("acme/apollo.tjp")).unwrap();
        assert_eq!(source, sample_document());
    }

    #[test]
    fn test_work_hours_convert_to_minutes() {
        for hours in [0.25, 1.0, 7.5, 12.125] {
            let mut task = sample_document().tasks[2].clone();
            let stored = PersistedTask {
                id: 1,
                uid: 3,
                project_name: "Apollo".to_string(),
                task_name: "Design".to_string(),
                step_name: "1.1.1, Sketch".to_string(),
                users_assigned: String::new(),
                is_milestone: false,
                remaining_time: None,
                project_coin_budget: None,
                progress: Some(0),
                operator: OperatorFields {
                    actual_work: hours,
                    ..Default::default()
                },
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            apply_stored_fields(&mut task, &stored);
            assert_eq!(task.actual_work_minutes, Some(hours * 60.0));
        }
    }

    #[test]
    fn test_summary_tasks_only_get_notes() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        set_fields(
            &mut gateway,
            2,
            OperatorFields {
                actual_work: 4.0,
                task_note: Some("group note".to_string()),
                actual_start: Some(at(1, 8)),
                ..Default::default()
            },
        );

        let status = render(&mut gateway, &RecordingMailer::default());
        let design = read_document(&status.report_path).unwrap().task(2).unwrap().clone();
        assert_eq!(design.notes.as_deref(), Some("group note"));
        assert_eq!(design.task_type, TaskType::FixedUnits);
        assert_eq!(design.actual_start, None);
        assert_eq!(design.actual_work_minutes, None);
    }

    #[test]
    fn test_milestone_needs_both_flags() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);

        // Build becomes a milestone in the document only
        let mut doc = sample_document();
        doc.tasks[3].milestone = true;
        env.write_document("acme", "apollo.tjp", &doc);

        let status = render(&mut gateway, &RecordingMailer::default());
        let report = read_document(&status.report_path).unwrap();
        assert_eq!(report.task(5).unwrap().percent_complete, 100);
        assert_eq!(report.task(4).unwrap().percent_complete, 0);
    }

    #[test]
    fn test_failed_field_does_not_stop_the_others() {
        let env = TestEnv::new();
        let mut doc = sample_document();
        doc.tasks[2].actual_finish = Some(at(1, 17));
        env.write_document("acme", "apollo.tjp", &doc);
        let mut gateway = env.gateway();
        reconcile_tenant(&mut gateway, "acme", None).unwrap();
        set_fields(
            &mut gateway,
            3,
            OperatorFields {
                actual_work: 1.5,
                task_note: Some("late start".to_string()),
                actual_start: Some(at(3, 8)),
                ..Default::default()
            },
        );

        let status = render(&mut gateway, &RecordingMailer::default());
        assert!(status.rendered);
        assert_eq!(status.field_failures.len(), 1);
        assert_eq!(status.field_failures[0].uid, 3);
        assert_eq!(status.field_failures[0].field, "actual_start");

        let sketch = read_document(&status.report_path).unwrap().task(3).unwrap().clone();
        assert_eq!(sketch.actual_work_minutes, Some(90.0));
        assert_eq!(sketch.notes.as_deref(), Some("late start"));
        assert_eq!(sketch.actual_start, None);
    }

    #[test]
    fn test_unrelated_content_is_preserved() {
        let env = TestEnv::new();
        let mut doc = sample_document();
        doc.extra.insert("calendar".to_string(), json!({"name": "Night shift"}));
        doc.tasks[3].extra.insert("priority".to_string(), json!(700));
        env.write_document("acme", "apollo.tjp", &doc);
        let mut gateway = env.gateway();
        reconcile_tenant(&mut gateway, "acme", None).unwrap();

        let status = render(&mut gateway, &RecordingMailer::default());
        let report = read_document(&status.report_path).unwrap();
        assert_eq!(report.extra["calendar"]["name"], "Night shift");
        assert_eq!(report.task(4).unwrap().extra["priority"], 700);
        assert_eq!(report.resources, doc.resources);
        assert_eq!(report.assignments, doc.assignments);
    }

    #[test]
    fn test_lock_released_and_mail_delivered() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let mailer = RecordingMailer::default();

        let status = render(&mut gateway, &mailer);
        assert!(!lock_path(&status.report_path).exists());
        assert_eq!(
            status.delivery,
            Delivery::Delivered {
                to: "ann@acme.test".to_string()
            }
        );

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tenant, "acme");
        assert_eq!(
            sent[0].attachment.as_ref().unwrap().filename,
            "Apollo_02_05_2024.tjp"
        );
    }

    #[test]
    fn test_delivery_failure_keeps_rendered_report() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let mailer = RecordingMailer {
            fail_with: Some("relay down".to_string()),
            ..Default::default()
        };

        let status = render(&mut gateway, &mailer);
        assert!(status.rendered);
        assert!(status.report_path.exists());
        assert!(matches!(status.delivery, Delivery::Failed { ref reason, .. } if reason.contains("relay down")));
    }

    #[test]
    fn test_no_recipient_skips_delivery() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let status = render_report(
            &mut gateway,
            &DocumentEngine::default(),
            &RecordingMailer::default(),
            FROM,
            &request("apollo", None),
        )
        .unwrap();
        assert!(matches!(status.delivery, Delivery::Skipped { .. }));
    }

    #[test]
    fn test_unknown_project_is_not_found() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let err = render_report(
            &mut gateway,
            &DocumentEngine::default(),
            &RecordingMailer::default(),
            FROM,
            &request("Gemini", None),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_rejected_finish_keeps_document_dates() {
        let env = TestEnv::new();
        let mut doc = sample_document();
        doc.tasks[2].actual_start = Some(at(10, 8));
        doc.tasks[2].actual_finish = Some(at(12, 17));
        env.write_document("acme", "apollo.tjp", &doc);
        let mut gateway = env.gateway();
        reconcile_tenant(&mut gateway, "acme", None).unwrap();
        set_fields(
            &mut gateway,
            3,
            OperatorFields {
                actual_finish: Some(at(5, 17)),
                ..Default::default()
            },
        );

        let status = render(&mut gateway, &RecordingMailer::default());
        assert_eq!(status.field_failures.len(), 1);
        assert_eq!(status.field_failures[0].field, "actual_finish");

        let sketch = read_document(&status.report_path).unwrap().task(3).unwrap().clone();
        assert_eq!(sketch.actual_start, Some(at(10, 8)));
        assert_eq!(sketch.actual_finish, Some(at(12, 17)));
    }

    #[test]
    fn test_locked_report_copy_is_left_untouched() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let reports = env.data_path().join("acme/reports");
        fs::create_dir_all(&reports).unwrap();
        let target = reports.join("Apollo_02_05_2024.tjp");
        let mut other = sample_document();
        other.tasks[2].set_notes("written by another renderer");
        document::write_document(&target, &other).unwrap();
        let before = fs::read(&target).unwrap();
        let _held = DocumentHandle::open(&target).unwrap();

        let engine = DocumentEngine::new(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        });
        let err = render_report(
            &mut gateway,
            &engine,
            &RecordingMailer::default(),
            FROM,
            &request("Apollo", None),
        )
        .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { attempts: 2, .. }));
        assert_eq!(fs::read(&target).unwrap(), before);
        assert!(lock_path(&target).exists());
    }

    #[test]
    fn test_render_reclaims_stale_lock() {
        let env = TestEnv::new();
        let mut gateway = imported(&env);
        let reports = env.data_path().join("acme/reports");
        fs::create_dir_all(&reports).unwrap();
        let target = reports.join("Apollo_02_05_2024.tjp");
        fs::write(lock_path(&target), "999999999\n").unwrap();

        let status = render(&mut gateway, &RecordingMailer::default());
        assert_eq!(status.report_path, target);
        assert!(!lock_path(&target).exists());
    }
}
