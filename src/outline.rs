//! Outline reconstruction.
//!
//! Project documents list tasks flat, each with an outline level. Grouping is
//! recovered with a stack of the rollup tasks that are still open:
//!
//! - entries at the same or a deeper level than the current record have
//!   closed and are popped (an empty stack means the group name is `""`)
//! - the record's `task_name` is the name of the rollup left on top
//! - a rollup record is then pushed, opening a new group for what follows
//!
//! A rollup's own `task_name` is therefore its parent group, never itself.

use crate::models::{DerivedTask, TaskRecord};

/// An open rollup on the stack.
#[derive(Debug)]
struct OpenGroup {
    level: u32,
    name: String,
}

/// Derive grouping for records given in document order.
pub fn reconstruct(records: &[TaskRecord]) -> Vec<DerivedTask> {
    let mut stack: Vec<OpenGroup> = Vec::new();
    let mut derived = Vec::with_capacity(records.len());

    for record in records {
        let level = record.outline_level.max(1);
        while stack.last().is_some_and(|group| group.level >= level) {
            stack.pop();
        }

        let task_name = stack
            .last()
            .map(|group| group.name.clone())
            .unwrap_or_default();

        if record.is_rollup {
            stack.push(OpenGroup {
                level,
                name: record.name.clone(),
            });
        }

        derived.push(DerivedTask {
            task_name,
            step_name: step_name(record),
            progress: if record.is_rollup { None } else { Some(0) },
            record: record.clone(),
        });
    }

    derived
}

/// Display label combining the outline position and the task name.
pub fn step_name(record: &TaskRecord) -> String {
    format!("{}, {}", record.outline_number, record.name)
}
