//! Outgoing mail.
//!
//! Rendered reports are delivered through a [`Mailer`]. The bundled
//! [`OutboxMailer`] does not talk to a mail server: it spools every message
//! as a JSON file into the tenant's `outbox/` directory, where a relay can
//! pick it up. Spooled names derive from the message content, so sending the
//! same message twice leaves one file.

use crate::storage::normalize_tenant;
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Attach a file from disk under its own file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::Mail(format!("attachment has no file name: {}", path.display())))?;
        Ok(Self {
            filename,
            bytes: fs::read(path)?,
        })
    }
}

/// A message to deliver on behalf of a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub tenant: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

/// Delivers outgoing mail.
pub trait Mailer: Send {
    fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

#[derive(Serialize)]
struct SpooledAttachment<'a> {
    filename: &'a str,
    size: usize,
    sha256: String,
    content_base64: String,
}

#[derive(Serialize)]
struct SpooledMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    queued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<SpooledAttachment<'a>>,
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Spools messages into `<data-root>/<tenant>/outbox/`.
#[derive(Debug, Clone)]
pub struct OutboxMailer {
    data_root: PathBuf,
}

impl OutboxMailer {
    pub fn new(data_root: &Path) -> Self {
        Self {
            data_root: data_root.to_path_buf(),
        }
    }

    pub fn outbox_dir(&self, tenant: &str) -> Result<PathBuf> {
        Ok(self.data_root.join(normalize_tenant(tenant)?).join("outbox"))
    }

    /// Spool file a message is written to.
    pub fn spool_path(&self, mail: &OutgoingMail) -> Result<PathBuf> {
        let mut hasher = Sha256::new();
        for part in [&mail.from, &mail.to, &mail.subject, &mail.body] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(attachment) = &mail.attachment {
            hasher.update(attachment.filename.as_bytes());
            hasher.update(&attachment.bytes);
        }
        let digest = hasher.finalize();
        let name: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        Ok(self.outbox_dir(&mail.tenant)?.join(format!("mail-{}.json", name)))
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if !mail.to.contains('@') {
            return Err(Error::Mail(format!("invalid recipient address: {:?}", mail.to)));
        }

        let spooled = SpooledMail {
            from: &mail.from,
            to: &mail.to,
            subject: &mail.subject,
            body: &mail.body,
            queued_at: Utc::now().to_rfc3339(),
            attachment: mail.attachment.as_ref().map(|a| SpooledAttachment {
                filename: &a.filename,
                size: a.bytes.len(),
                sha256: hex_digest(&a.bytes),
                content_base64: STANDARD.encode(&a.bytes),
            }),
        };

        let path = self.spool_path(mail)?;
        let dir = self.outbox_dir(&mail.tenant)?;
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(&spooled)?)?;
        tmp.persist(&path).map_err(|e| Error::Mail(e.to_string()))?;

        tracing::info!(tenant = %mail.tenant, to = %mail.to, spool = %path.display(), "queued mail");
        Ok(())
    }
}

/// Mailer that keeps messages in memory, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<OutgoingMail>>,
    pub fail_with: Option<String>,
}

#[cfg(test)]
impl Mailer for RecordingMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<()> {
        if let Some(reason) = &self.fail_with {
            return Err(Error::Mail(reason.clone()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}
