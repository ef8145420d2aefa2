//! TimeJet - project-plan synchronization for lightweight field clients.
//!
//! This library provides the core functionality for the `tj` CLI and HTTP
//! service: reading project documents, reconciling their tasks into a
//! per-tenant SQLite store, accepting operator field updates, and writing
//! those updates back into dated report copies of the source documents.

pub mod cli;
pub mod commands;
pub mod config;
pub mod document;
pub mod identity;
pub mod mail;
pub mod models;
pub mod outline;
pub mod reconcile;
pub mod report;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod update;

use std::path::PathBuf;


/// Library-level error type for TimeJet operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Kdl(#[from] kdl::KdlError),

    /// Document could not be opened or is structurally invalid.
    #[error("Cannot read project document {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// Inbound payload failed presence or type checks.
    #[error("Errors in json: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    /// Store write failed; surfaced to the caller verbatim.
    #[error("{0}")]
    Persistence(String),

    /// Document is locked by another handle.
    #[error("Project document is locked: {}", .0.display())]
    TransientLock(PathBuf),

    #[error("Gave up opening {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Mail delivery failed: {0}")]
    Mail(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for TimeJet operations.
pub type Result<T> = std::result::Result<T, Error>;
