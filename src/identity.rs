//! Resource-to-user linking.
//!
//! Resources whose display name carries an email address are linked to a
//! `UserRecord` of the tenant, keyed by (email, project name, domain). A
//! missing user is created with zeroed counters. This is identity linking
//! only; nothing checks that the address is real.

use crate::models::{ResourceRecord, UserRecord};
use crate::storage::{NewUser, TenantStore};
use crate::Result;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\s<>;,]+@[^\s<>;,]+").expect("email pattern compiles"))
}

/// Email and optional full name pulled out of a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentity {
    /// Lower-cased address
    pub email: String,
    pub fullname: Option<String>,
}

/// Extract an identity from `user@host` or `Full Name <user@host>`.
pub fn parse_identity(display_name: &str) -> Option<ParsedIdentity> {
    let found = email_pattern().find(display_name)?;
    let email = found
        .as_str()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_lowercase();

    let rest = format!(
        "{}{}",
        &display_name[..found.start()],
        &display_name[found.end()..]
    );
    let fullname = rest
        .trim()
        .trim_end_matches('>')
        .trim_end()
        .trim_end_matches('<')
        .trim()
        .trim_matches('"')
        .trim();

    Some(ParsedIdentity {
        email,
        fullname: (!fullname.is_empty()).then(|| fullname.to_string()),
    })
}

/// Outcome of resolving one display name.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing(UserRecord),
    Created(UserRecord),
}

impl Resolution {
    pub fn user(&self) -> &UserRecord {
        match self {
            Resolution::Existing(user) | Resolution::Created(user) => user,
        }
    }
}

/// Summary of linking a document's resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdentityReport {
    /// Users created by this pass
    pub created: Vec<String>,
    /// Resources matched to users that already existed
    pub existing: usize,
    /// Resources without an email address
    pub skipped: usize,
}

/// Resolve one display name for a project of a tenant.
///
/// Returns `None` when the name has no email address.
pub fn resolve(
    store: &TenantStore,
    domain: &str,
    project_name: &str,
    display_name: &str,
) -> Result<Option<Resolution>> {
    let Some(identity) = parse_identity(display_name) else {
        return Ok(None);
    };

    if let Some(user) = store.find_user(&identity.email, project_name, domain)? {
        return Ok(Some(Resolution::Existing(user)));
    }

    let user = store.insert_user(&NewUser {
        email: identity.email,
        fullname: identity.fullname,
        domain: domain.to_string(),
        project_name: project_name.to_string(),
    })?;
    tracing::info!(email = %user.email, project = %project_name, domain = %domain, "created placeholder user");
    Ok(Some(Resolution::Created(user)))
}

/// Resolve every resource of a document.
pub fn resolve_resources(
    store: &TenantStore,
    domain: &str,
    project_name: &str,
    resources: &[ResourceRecord],
) -> Result<IdentityReport> {
    let mut report = IdentityReport::default();
    for resource in resources {
        match resolve(store, domain, project_name, &resource.name)? {
            Some(Resolution::Created(user)) => report.created.push(user.email),
            Some(Resolution::Existing(_)) => report.existing += 1,
            None => report.skipped += 1,
        }
    }
    Ok(report)
}
