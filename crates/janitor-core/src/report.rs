use chrono::Utc;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::ReportRequest;

pub const REPORT_SUBJECT: &str = "Janitor activity log";

/// Outbound transport for log reports.
pub trait ReportMailer: Send + Sync {
    fn deliver(&self, recipient: &str, subject: &str, body: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Sent { entries: usize },
    NotRequested,
}

/// Accepts `local@domain` with exactly one `@` and non-empty sides.
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::validation("email must not be empty"));
    }
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(Error::validation(format!("invalid email address '{}'", email))),
    }
}

/// Validates the request before anything is read or sent.
pub fn check_request(request: &ReportRequest) -> Result<()> {
    validate_email(&request.email)
}

/// Writes each report as a file under `dir` for an external relay to pick up.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportMailer for OutboxMailer {
    fn deliver(&self, recipient: &str, subject: &str, body: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let file_name = format!("{}-{}.eml", stamp, sanitize(recipient));
        let path = self.dir.join(file_name);
        let message = format!(
            "To: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            recipient,
            subject,
            Utc::now().to_rfc2822(),
            body
        );
        fs::write(&path, message)?;
        info!("Report for {} queued at {}", recipient, path.display());
        Ok(())
    }
}

fn sanitize(recipient: &str) -> String {
    recipient
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '@' || c == '.' { c } else { '_' })
        .collect()
}

/// Hand `body` to the mailer unless the caller opted out.
pub fn send(
    request: &ReportRequest,
    body: &str,
    entries: usize,
    mailer: &dyn ReportMailer,
) -> Result<ReportStatus> {
    check_request(request)?;
    if !request.send_email {
        debug!("Report for {} not requested, skipping", request.email);
        return Ok(ReportStatus::NotRequested);
    }
    mailer.deliver(request.email.trim(), REPORT_SUBJECT, body)?;
    Ok(ReportStatus::Sent { entries })
}
