//! Reconciliation of project documents into a tenant store.
//!
//! For every document in a tenant directory:
//!
//! 1. read flat task and resource records
//! 2. link resources to users
//! 3. reconstruct outline grouping
//! 4. insert each task not yet known under (project name, uid)
//!
//! Reconciliation is insert-only. A task already in the store is never
//! overwritten, so re-reading a document after operators have edited
//! their fields leaves those edits alone, and running it N times yields
//! the same rows as running it once.
//!
//! Unreadable documents are logged and skipped; the batch continues.

use crate::document::{self, DocumentRecords};
use crate::identity::{self, IdentityReport};
use crate::outline;
use crate::storage::{TenantGateway, TenantStore};
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Result of reconciling one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub file: PathBuf,
    pub project_name: String,
    /// Tasks inserted by this pass
    pub inserted: usize,
    /// Tasks already present and left as they were
    pub unchanged: usize,
    pub identities: IdentityReport,
}

/// A document that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    pub file: PathBuf,
    pub reason: String,
}

/// Result of reconciling a tenant directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub tenant: String,
    /// User who triggered the import, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_by: Option<String>,
    pub documents: Vec<DocumentOutcome>,
    pub skipped: Vec<SkippedDocument>,
}

impl ReconcileReport {
    pub fn inserted(&self) -> usize {
        self.documents.iter().map(|d| d.inserted).sum()
    }

    pub fn unchanged(&self) -> usize {
        self.documents.iter().map(|d| d.unchanged).sum()
    }
}

/// Reconcile the records of one document into a store, in one transaction.
pub fn reconcile_document(
    store: &TenantStore,
    domain: &str,
    records: &DocumentRecords,
) -> Result<DocumentOutcome> {
    store.with_transaction(|store| {
        let identities =
            identity::resolve_resources(store, domain, &records.project_name, &records.resources)?;

        let mut inserted = 0;
        let mut unchanged = 0;
        for task in outline::reconstruct(&records.tasks) {
            if store.insert_task_if_absent(&records.project_name, &task)? {
                inserted += 1;
            } else {
                unchanged += 1;
            }
        }

        Ok(DocumentOutcome {
            file: records.path.clone(),
            project_name: records.project_name.clone(),
            inserted,
            unchanged,
            identities,
        })
    })
}

/// Reconcile every document in a tenant's directory.
///
/// `acquired_by` names the user who triggered the import. It is carried into
/// the report and logs; identity linking uses only the tenant.
pub fn reconcile_tenant(
    gateway: &mut TenantGateway,
    tenant: &str,
    acquired_by: Option<&str>,
) -> Result<ReconcileReport> {
    let layout = gateway.layout(tenant)?;
    let files = document::list_documents(&layout.dir)?;
    let store = gateway.store(&layout.tenant)?;

    let mut report = ReconcileReport {
        tenant: layout.tenant.clone(),
        acquired_by: acquired_by.map(str::to_string),
        documents: Vec::new(),
        skipped: Vec::new(),
    };

    for file in files {
        let records = match document::read_records(&file) {
            Ok(records) => records,
            Err(Error::Parse { path, reason }) => {
                tracing::warn!(file = %path.display(), %reason, "skipping unreadable document");
                report.skipped.push(SkippedDocument { file: path, reason });
                continue;
            }
            Err(e) => return Err(e),
        };

        let outcome = reconcile_document(store, &layout.tenant, &records)?;
        tracing::info!(
            tenant = %layout.tenant,
            file = %file.display(),
            project = %outcome.project_name,
            inserted = outcome.inserted,
            unchanged = outcome.unchanged,
            acquired_by = acquired_by.unwrap_or("-"),
            "reconciled document"
        );
        report.documents.push(outcome);
    }

    Ok(report)
}
