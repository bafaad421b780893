// src/reports.rs
//
// Post-batch summary notification for the front desk. Built and sent after
// every non-empty dispatch run; failures are logged and swallowed.

use chrono::{DateTime, FixedOffset};

use crate::dispatch::DispatchSummary;
use crate::gateway::{EmailGateway, EmailPayload};

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub patient: String,
    pub channel: String,
    pub outcome: String,
}

pub fn build_summary_subject(summary: &DispatchSummary) -> String {
    format!(
        "Scheduled wishes: {} sent, {} failed",
        summary.sent, summary.failed
    )
}

/// Plain digest of the run, one line per wish, timestamped in the
/// practice's local timezone.
pub fn build_summary_body(
    ran_at: DateTime<FixedOffset>,
    entries: &[BatchEntry],
    summary: &DispatchSummary,
) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 3);
    lines.push(format!(
        "Dispatch run at {}",
        ran_at.format("%Y-%m-%d %H:%M %z")
    ));
    lines.push(format!(
        "Processed {} wish(es): {} sent, {} failed.",
        summary.total, summary.sent, summary.failed
    ));
    lines.push(String::new());
    for entry in entries {
        lines.push(format!("{} [{}]: {}", entry.patient, entry.channel, entry.outcome));
    }
    lines.join("\n")
}

/// Send the digest to the configured recipients. No recipients configured
/// means the report is skipped.
pub async fn send_batch_summary(
    gateway: &dyn EmailGateway,
    recipients: &[String],
    ran_at: DateTime<FixedOffset>,
    entries: &[BatchEntry],
    summary: &DispatchSummary,
) {
    let Some((to, cc)) = recipients.split_first() else {
        tracing::debug!("no summary recipients configured, skipping batch report");
        return;
    };

    let payload = EmailPayload {
        subject: build_summary_subject(summary),
        html_body: build_summary_body(ran_at, entries, summary).replace('\n', "<br>"),
        to: to.clone(),
        cc: cc.to_vec(),
        bcc: Vec::new(),
    };

    if let Err(e) = gateway.send(&payload).await {
        tracing::error!(error = %e, "failed to send batch summary report");
    }
}
