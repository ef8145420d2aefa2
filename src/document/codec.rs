//! Binary container for project documents.
//!
//! Layout:
//!
//! ```text
//! +--------+---------+---------------------------+
//! | "TJPD" | version | zstd frame (JSON body)    |
//! | 4 B    | 1 B     | ...                       |
//! +--------+---------+---------------------------+
//! ```
//!
//! Decoding also checks the structure of the body; a document that decodes
//! but violates the structure is rejected the same way as a corrupt one.

use super::ProjectDocument;
use crate::Result;
use std::collections::HashSet;

pub const MAGIC: &[u8; 4] = b"TJPD";

pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = 5;

const ZSTD_LEVEL: i32 = 3;

/// Encode a document into the binary container.
pub fn encode(doc: &ProjectDocument) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(doc)?;
    let body = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode and validate a document. The error is a human-readable reason.
pub fn decode(bytes: &[u8]) -> std::result::Result<ProjectDocument, String> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err("not a project document (bad magic)".to_string());
    }
    let version = bytes[4];
    if version != FORMAT_VERSION {
        return Err(format!("unsupported document format version {}", version));
    }

    let json = zstd::decode_all(&bytes[HEADER_LEN..])
        .map_err(|e| format!("corrupt document body: {}", e))?;
    let doc: ProjectDocument =
        serde_json::from_slice(&json).map_err(|e| format!("malformed document body: {}", e))?;

    validate(&doc)?;
    Ok(doc)
}

/// Structural checks applied to every decoded document.
pub fn validate(doc: &ProjectDocument) -> std::result::Result<(), String> {
    if doc.tasks.is_empty() {
        return Err("document has no tasks".to_string());
    }

    let mut seen = HashSet::new();
    for task in &doc.tasks {
        if !seen.insert(task.unique_id) {
            return Err(format!("duplicate task unique id {}", task.unique_id));
        }
        if task.outline_level == Some(0) {
            return Err(format!("task {} has outline level 0", task.unique_id));
        }
        if task.percent_complete > 100 {
            return Err(format!(
                "task {} has percent complete {}",
                task.unique_id, task.percent_complete
            ));
        }
    }

    Ok(())
}
