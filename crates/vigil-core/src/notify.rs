//! Notification dispatch.
//!
//! Sinks are tagged variants with a single dispatch function rather than a
//! trait hierarchy; attaching zero sinks is fine and a failing sink never
//! affects the scan. The Log sink is the in-process sink; email, telegram
//! and syslog exist as interface variants for deployments that wire them
//! up.

use crate::models::ScanSummary;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The summary shape handed to sinks. Finer grained than the persisted
/// [`ScanSummary`]; the worker computes it from the reconciled records
/// before dispatch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifySummary {
    pub total_files: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub signature_error_count: u64,
    pub new_count: u64,
    pub meta_changed_count: u64,
    pub permission_changed_count: u64,
    pub owner_changed_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} sink is not configured")]
    Unsupported(&'static str),
}

/// One notification destination.
#[derive(Debug, Clone)]
pub enum NotificationSink {
    /// Structured log records via `tracing`.
    Log,
    Syslog,
    Email { recipient: String },
    Telegram { chat_id: String },
}

impl NotificationSink {
    pub fn notify(
        &self,
        summary: &ScanSummary,
        detail: &NotifySummary,
    ) -> Result<(), NotifyError> {
        match self {
            Self::Log => {
                let churn =
                    summary.changed_count + summary.new_count + summary.deleted_count;
                if churn > 0 {
                    info!(
                        changed = summary.changed_count,
                        new = summary.new_count,
                        deleted = summary.deleted_count,
                        modified = detail.modified_count,
                        signature_errors = detail.signature_error_count,
                        "integrity changes detected"
                    );
                }
                if summary.error_count > 0 {
                    warn!(errors = summary.error_count, "files could not be read");
                }
                if churn == 0 && summary.error_count == 0 {
                    info!(total = summary.total_files, "scan clean");
                }
                Ok(())
            }
            Self::Syslog => Err(NotifyError::Unsupported("syslog")),
            Self::Email { .. } => Err(NotifyError::Unsupported("email")),
            Self::Telegram { .. } => Err(NotifyError::Unsupported("telegram")),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Syslog => "syslog",
            Self::Email { .. } => "email",
            Self::Telegram { .. } => "telegram",
        }
    }
}

/// Fans one summary out to every attached sink. Sink failures are swallowed
/// and logged so a broken transport cannot take the monitor down.
#[derive(Debug, Default)]
pub struct Notifier {
    sinks: Vec<NotificationSink>,
}

impl Notifier {
    pub fn new(sinks: Vec<NotificationSink>) -> Self {
        Self { sinks }
    }

    pub fn attach(&mut self, sink: NotificationSink) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, summary: &ScanSummary, detail: &NotifySummary) {
        for sink in &self.sinks {
            if let Err(err) = sink.notify(summary, detail) {
                warn!(sink = sink.name(), %err, "notification sink failed");
            }
        }
    }
}
