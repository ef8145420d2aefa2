//! Per-tenant store lifecycle.
//!
//! Directory layout under the data root:
//!
//! ```text
//! <data-root>/
//!   <tenant>/
//!     *.tjp          source project documents
//!     reports/       dated report copies
//!     outbox/        spooled mail
//!     <tenant>.db    tenant store
//! ```
//!
//! Tenant names are case-normalized, so `Acme` and `acme` share one store.

use super::TenantStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

/// Normalize and validate a tenant identifier.
///
/// Tenants name directories, so only `[a-z0-9._-]` is accepted after
/// lower-casing, and `.`/`..` are rejected.
pub fn normalize_tenant(raw: &str) -> Result<String> {
    let tenant = raw.trim().to_lowercase();
    if tenant.is_empty() {
        return Err(Error::InvalidInput("tenant must not be empty".to_string()));
    }
    if tenant == "." || tenant == ".." {
        return Err(Error::InvalidInput(format!("invalid tenant: {}", raw)));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::InvalidInput(format!(
            "tenant may only contain letters, digits, '.', '_' and '-': {}",
            raw
        )));
    }
    Ok(tenant)
}

/// Filesystem locations belonging to one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantLayout {
    pub tenant: String,
    pub dir: PathBuf,
    pub reports_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub store_path: PathBuf,
}

/// Owns every tenant store opened by this process.
pub struct TenantGateway {
    data_root: PathBuf,
    stores: HashMap<String, TenantStore>,
}

impl TenantGateway {
    pub fn new(data_root: &Path) -> Self {
        Self {
            data_root: data_root.to_path_buf(),
            stores: HashMap::new(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Paths for a tenant. Does not touch the filesystem.
    pub fn layout(&self, tenant: &str) -> Result<TenantLayout> {
        let tenant = normalize_tenant(tenant)?;
        let dir = self.data_root.join(&tenant);
        Ok(TenantLayout {
            reports_dir: dir.join("reports"),
            outbox_dir: dir.join("outbox"),
            store_path: dir.join(format!("{}.db", tenant)),
            dir,
            tenant,
        })
    }

    /// Store for a tenant, created and materialized on first reference.
    pub fn store(&mut self, tenant: &str) -> Result<&mut TenantStore> {
        let layout = self.layout(tenant)?;
        match self.stores.entry(layout.tenant.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                fs::create_dir_all(&layout.dir)?;
                let store = TenantStore::open(&layout.store_path, &layout.tenant)?;
                tracing::info!(tenant = %layout.tenant, store = %layout.store_path.display(), "opened tenant store");
                Ok(entry.insert(store))
            }
        }
    }

    /// Store for a tenant that already has one; never creates anything.
    pub fn existing_store(&mut self, tenant: &str) -> Result<Option<&mut TenantStore>> {
        let layout = self.layout(tenant)?;
        if !self.stores.contains_key(&layout.tenant) && !layout.store_path.exists() {
            return Ok(None);
        }
        self.store(&layout.tenant).map(Some)
    }

    /// Whether this gateway already holds an open store for the tenant.
    pub fn is_open(&self, tenant: &str) -> bool {
        normalize_tenant(tenant)
            .map(|t| self.stores.contains_key(&t))
            .unwrap_or(false)
    }

    pub fn open_tenants(&self) -> Vec<&str> {
        let mut tenants: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        tenants.sort_unstable();
        tenants
    }
}
