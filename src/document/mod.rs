//! Project documents.
//!
//! A project document is a hierarchical plan stored as a flat task list with
//! outline levels, plus resources and the assignments linking them to tasks.
//!
//! ## Modules
//!
//! - [`codec`] - the `.tjp` binary container (magic, version, zstd, JSON body)
//! - [`engine`] - scoped write handles, lock files and bounded open retry
//!
//! Fields this crate does not own are kept in `extra` maps so that a document
//! read and written back keeps all unrelated content.

pub mod codec;
pub mod engine;

pub use engine::{DocumentEngine, DocumentHandle, RetryPolicy};

use crate::models::{ResourceRecord, TaskRecord};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// File extension of project documents.
pub const DOCUMENT_EXTENSION: &str = "tjp";

/// How a task's duration is computed when work or units change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    FixedUnits,
    FixedDuration,
    FixedWork,
}

/// A task row inside a project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocTask {
    pub unique_id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_level: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_number: Option<String>,

    /// Summary (rollup) task
    #[serde(default)]
    pub summary: bool,

    #[serde(default)]
    pub milestone: bool,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub predecessors: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_duration_minutes: Option<f64>,

    #[serde(default)]
    pub task_type: TaskType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_finish: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_work_minutes: Option<f64>,

    #[serde(default)]
    pub percent_complete: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

impl DocTask {
    pub fn set_notes(&mut self, notes: &str) {
        self.notes = Some(notes.to_string());
    }

    pub fn set_task_type(&mut self, task_type: TaskType) {
        self.task_type = task_type;
    }

    /// Set the actual start. Rejected when it falls after the actual finish.
    pub fn set_actual_start(&mut self, start: NaiveDateTime) -> Result<()> {
        if let Some(finish) = self.actual_finish {
            if start > finish {
                return Err(Error::InvalidInput(format!(
                    "actual start {} is after actual finish {}",
                    start, finish
                )));
            }
        }
        self.actual_start = Some(start);
        Ok(())
    }

    /// Set the actual finish. Rejected when it falls before the actual start.
    pub fn set_actual_finish(&mut self, finish: NaiveDateTime) -> Result<()> {
        if let Some(start) = self.actual_start {
            if finish < start {
                return Err(Error::InvalidInput(format!(
                    "actual finish {} is before actual start {}",
                    finish, start
                )));
            }
        }
        self.actual_finish = Some(finish);
        Ok(())
    }

    pub fn set_actual_work_minutes(&mut self, minutes: f64) -> Result<()> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(Error::InvalidInput(format!(
                "actual work must be a non-negative number of minutes, got {}",
                minutes
            )));
        }
        self.actual_work_minutes = Some(minutes);
        Ok(())
    }

    pub fn set_percent_complete(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(Error::InvalidInput(format!(
                "percent complete must be 0-100, got {}",
                percent
            )));
        }
        self.percent_complete = percent;
        Ok(())
    }
}

/// A resource (person, crew, equipment) inside a project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocResource {
    pub unique_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocResource {
    pub fn named(unique_id: i64, name: &str) -> Self {
        Self {
            unique_id,
            name: Some(name.to_string()),
            extra: Map::new(),
        }
    }
}

/// Links a resource to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocAssignment {
    pub task_uid: i64,

    pub resource_uid: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded project document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    #[serde(default)]
    pub tasks: Vec<DocTask>,

    #[serde(default)]
    pub resources: Vec<DocResource>,

    #[serde(default)]
    pub assignments: Vec<DocAssignment>,

    /// Project properties and anything else this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectDocument {
    /// Append a task row.
    pub fn push_task(
        &mut self,
        unique_id: i64,
        name: &str,
        outline_level: u32,
        outline_number: &str,
        summary: bool,
        milestone: bool,
    ) -> &mut DocTask {
        self.tasks.push(DocTask {
            unique_id,
            name: name.to_string(),
            outline_level: Some(outline_level),
            outline_number: Some(outline_number.to_string()),
            summary,
            milestone,
            active: true,
            ..Default::default()
        });
        let last = self.tasks.len() - 1;
        &mut self.tasks[last]
    }

    /// Assign a resource to a task.
    pub fn assign(&mut self, task_uid: i64, resource_uid: i64) {
        self.assignments.push(DocAssignment {
            task_uid,
            resource_uid,
            extra: Map::new(),
        });
    }

    /// The project name is the name of the first task.
    pub fn project_name(&self) -> Option<&str> {
        self.tasks.first().map(|t| t.name.as_str())
    }

    pub fn task(&self, unique_id: i64) -> Option<&DocTask> {
        self.tasks.iter().find(|t| t.unique_id == unique_id)
    }

    pub fn task_mut(&mut self, unique_id: i64) -> Option<&mut DocTask> {
        self.tasks.iter_mut().find(|t| t.unique_id == unique_id)
    }

    /// Names of resources assigned to a task, in assignment order.
    ///
    /// Assignments pointing at a missing or unnamed resource are skipped.
    pub fn resource_names_for(&self, task_uid: i64) -> Vec<String> {
        self.assignments
            .iter()
            .filter(|a| a.task_uid == task_uid)
            .filter_map(|a| {
                self.resources
                    .iter()
                    .find(|r| r.unique_id == a.resource_uid)
                    .and_then(|r| r.name.clone())
            })
            .filter(|name| !name.trim().is_empty())
            .collect()
    }

    /// Flat task records in document order.
    pub fn task_records(&self) -> Vec<TaskRecord> {
        self.tasks
            .iter()
            .map(|task| TaskRecord {
                unique_id: task.unique_id,
                name: task.name.clone(),
                outline_level: task.outline_level.unwrap_or(1),
                outline_number: task.outline_number.clone().unwrap_or_default(),
                is_rollup: task.summary,
                is_milestone: task.milestone,
                predecessors: task.predecessors.iter().copied().collect(),
                baseline_duration_minutes: task.baseline_duration_minutes,
                resource_names: self.resource_names_for(task.unique_id),
            })
            .collect()
    }

    /// Named resources with the tasks they are assigned to.
    pub fn resource_records(&self) -> Vec<ResourceRecord> {
        self.resources
            .iter()
            .filter_map(|resource| {
                let name = resource.name.as_ref()?.trim();
                if name.is_empty() {
                    return None;
                }
                Some(ResourceRecord {
                    unique_id: resource.unique_id,
                    name: name.to_string(),
                    assigned_task_uids: self
                        .assignments
                        .iter()
                        .filter(|a| a.resource_uid == resource.unique_id)
                        .map(|a| a.task_uid)
                        .collect(),
                })
            })
            .collect()
    }
}

/// Everything the reader yields for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecords {
    pub path: PathBuf,
    pub project_name: String,
    pub tasks: Vec<TaskRecord>,
    pub resources: Vec<ResourceRecord>,
}

/// Decode a document from disk.
pub fn read_document(path: &Path) -> Result<ProjectDocument> {
    let bytes = fs::read(path).map_err(|e| Error::parse(path, e.to_string()))?;
    codec::decode(&bytes).map_err(|reason| Error::parse(path, reason))
}

/// Encode a document and write it to disk atomically.
pub fn write_document(path: &Path, doc: &ProjectDocument) -> Result<()> {
    let bytes = codec::encode(doc)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, &bytes)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read a document into flat task and resource records.
pub fn read_records(path: &Path) -> Result<DocumentRecords> {
    let doc = read_document(path)?;
    let project_name = doc
        .project_name()
        .map(str::to_string)
        .ok_or_else(|| Error::parse(path, "document has no tasks"))?;
    Ok(DocumentRecords {
        path: path.to_path_buf(),
        project_name,
        tasks: doc.task_records(),
        resources: doc.resource_records(),
    })
}

/// List the project documents in a directory, sorted by file name.
///
/// A missing directory yields an empty list.
pub fn list_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
        })
        .collect();
    files.sort();
    Ok(files)
}
