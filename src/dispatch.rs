// src/dispatch.rs
//
// The scheduled-wish dispatch engine: claims due wishes, routes each one to
// its channel gateway, records the outcome, and triggers the batch summary.
// Wishes are claimed atomically with an expiry before any send happens, so
// concurrent runs work disjoint batches instead of double-sending.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::{to_e164, EmailGateway, EmailPayload, SmsGateway};
use crate::models::{
    AuditActivity, Channel, CommStatus, Direction, PatientRow, ScheduledWishRow,
};
use crate::render;
use crate::reports::{self, BatchEntry};
use crate::store::{
    AuditStore, NewCommunication, NewPatientStatus, PatientStore, StoreError, WishStore,
};

/// Injected time source. Production uses SystemClock; tests pin the batch
/// to a fixed instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Terminal per-wish failures. None of these retry; the wish stays Failed
/// until an operator reschedules it.
#[derive(Debug, thiserror::Error)]
pub enum WishFailure {
    #[error("Patient opted out. Reason: {0}")]
    OptedOut(String),
    #[error("Missing template and custom body")]
    MissingContent,
    #[error("Patient missing phone number for SMS")]
    MissingPhone,
    #[error("Patient missing email address")]
    MissingEmail,
    #[error("Unknown channel code: {0}")]
    UnknownChannel(i16),
    #[error("Patient record missing")]
    MissingPatient,
    /// Raw provider error, preserved for operator diagnosis.
    #[error("{0}")]
    Gateway(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for WishFailure {
    fn from(e: StoreError) -> Self {
        WishFailure::Internal(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub sent: u32,
    pub failed: u32,
    pub total: u32,
}

pub struct Dispatcher<'a> {
    pub patients: &'a dyn PatientStore,
    pub wishes: &'a dyn WishStore,
    pub audit: &'a dyn AuditStore,
    pub sms: &'a dyn SmsGateway,
    pub email: &'a dyn EmailGateway,
    pub clock: &'a dyn Clock,
    pub claim_ttl: Duration,
    pub practice_tz: FixedOffset,
    pub summary_recipients: Vec<String>,
}

impl Dispatcher<'_> {
    /// Process one batch of due wishes, run to completion, and return the
    /// aggregate counters. An empty selection mutates nothing.
    pub async fn run(&self) -> Result<DispatchSummary, StoreError> {
        let now = self.clock.now_utc();
        let batch = self.wishes.claim_due(now, now + self.claim_ttl).await?;

        if batch.is_empty() {
            tracing::debug!("no pending wishes due");
            return Ok(DispatchSummary::default());
        }

        let total = batch.len() as u32;
        tracing::info!(total, "processing scheduled wishes");

        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut entries: Vec<BatchEntry> = Vec::with_capacity(batch.len());

        for wish in &batch {
            let patient = match self.patients.get(wish.patient_id).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(wish_id = %wish.wish_id, error = %e, "patient lookup failed");
                    None
                }
            };

            let outcome = match &patient {
                Some(p) => self.route_wish(wish, p, now).await,
                None => Err(WishFailure::MissingPatient),
            };

            let patient_name = patient
                .as_ref()
                .map(PatientRow::full_name)
                .unwrap_or_else(|| "Unknown patient".to_string());
            let channel_label = Channel::from_code(wish.channel)
                .map(Channel::label)
                .unwrap_or("Unknown");

            match outcome {
                Ok(()) => {
                    sent += 1;
                    tracing::info!(wish_id = %wish.wish_id, patient = %patient_name, channel = channel_label, "wish sent");
                    entries.push(BatchEntry {
                        patient: patient_name,
                        channel: channel_label.to_string(),
                        outcome: "Sent".to_string(),
                    });
                }
                Err(failure) => {
                    failed += 1;
                    let message = failure.to_string();
                    tracing::warn!(wish_id = %wish.wish_id, patient = %patient_name, error = %message, "wish failed");

                    if let Err(e) = self.wishes.mark_failed(wish.wish_id, &message).await {
                        tracing::error!(wish_id = %wish.wish_id, error = %e, "failed to persist wish failure");
                    }
                    if let Some(p) = &patient {
                        self.log_failed_communication(wish, p, &message).await;
                    }
                    entries.push(BatchEntry {
                        patient: patient_name,
                        channel: channel_label.to_string(),
                        outcome: format!("Failed: {message}"),
                    });
                }
            }
        }

        let summary = DispatchSummary { sent, failed, total };
        tracing::info!(sent, failed, total, "batch complete");

        // Fire-and-forget: a summary failure never affects wish statuses.
        reports::send_batch_summary(
            self.email,
            &self.summary_recipients,
            now.with_timezone(&self.practice_tz),
            &entries,
            &summary,
        )
        .await;

        Ok(summary)
    }

    /// Eligibility checks plus per-channel delivery for one claimed wish.
    async fn route_wish(
        &self,
        wish: &ScheduledWishRow,
        patient: &PatientRow,
        now: DateTime<Utc>,
    ) -> Result<(), WishFailure> {
        if !patient.accepts_marketing {
            let reason = patient
                .unsubscribe_reason
                .clone()
                .unwrap_or_else(|| "No reason recorded".to_string());
            return Err(WishFailure::OptedOut(reason));
        }

        let template = match wish.template_id {
            Some(template_id) => self.wishes.template(template_id).await?,
            None => None,
        };

        let custom_body = wish
            .custom_body
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let raw_body = match (custom_body, &template) {
            (Some(body), _) => body.to_string(),
            (None, Some(t)) => t.body.clone(),
            (None, None) => return Err(WishFailure::MissingContent),
        };

        let raw_subject = wish
            .custom_subject
            .clone()
            .or_else(|| template.as_ref().and_then(|t| t.subject.clone()))
            .unwrap_or_else(|| "Happy Birthday!".to_string());

        let subject = render::render_placeholders(&raw_subject, &patient.first_name, &patient.last_name);
        let body = render::render_placeholders(&raw_body, &patient.first_name, &patient.last_name);

        let channel = Channel::from_code(wish.channel)
            .ok_or(WishFailure::UnknownChannel(wish.channel))?;

        match channel {
            Channel::Sms => {
                let phone = patient
                    .phone
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(WishFailure::MissingPhone)?;

                let text = render::sms_plain_text(&body);
                let message_id = self
                    .sms
                    .send(&to_e164(phone), &text)
                    .await
                    .map_err(|e| WishFailure::Gateway(e.to_string()))?;

                self.finalize_sent(
                    wish,
                    patient,
                    now,
                    Channel::Sms,
                    None,
                    &text,
                    phone,
                    Some(message_id),
                    AuditActivity::SmsSent,
                    "Scheduled SMS sent".to_string(),
                )
                .await;
                Ok(())
            }
            Channel::Email => {
                let to = patient
                    .email
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(WishFailure::MissingEmail)?;

                // Custom bodies have the signature baked in at composition
                // time; template bodies get the template's default signature.
                let mut body = body;
                if custom_body.is_none() {
                    if let Some(signature_id) = template.as_ref().and_then(|t| t.signature_id) {
                        if let Some(sig) = self.wishes.signature(signature_id).await? {
                            body.push_str("<br>");
                            body.push_str(&sig.content);
                        }
                    }
                }

                let html_body = render::email_html_body(&body);
                let payload = EmailPayload {
                    subject: subject.clone(),
                    html_body: html_body.clone(),
                    to: to.to_string(),
                    cc: render::split_recipients(wish.cc_recipients.as_deref()),
                    bcc: render::split_recipients(wish.bcc_recipients.as_deref()),
                };

                self.email
                    .send(&payload)
                    .await
                    .map_err(|e| WishFailure::Gateway(e.to_string()))?;

                self.finalize_sent(
                    wish,
                    patient,
                    now,
                    Channel::Email,
                    Some(subject.clone()),
                    &html_body,
                    to,
                    None,
                    AuditActivity::EmailSent,
                    format!("Scheduled wish: {subject}"),
                )
                .await;
                Ok(())
            }
        }
    }

    /// Persist the Sent status and audit trail. The message already left the
    /// gateway, so bookkeeping errors are logged rather than failing the wish.
    #[allow(clippy::too_many_arguments)]
    async fn finalize_sent(
        &self,
        wish: &ScheduledWishRow,
        patient: &PatientRow,
        now: DateTime<Utc>,
        channel: Channel,
        subject: Option<String>,
        body: &str,
        recipient: &str,
        external_message_id: Option<String>,
        activity_type: AuditActivity,
        description: String,
    ) {
        if let Err(e) = self.wishes.mark_sent(wish.wish_id, now).await {
            tracing::error!(wish_id = %wish.wish_id, error = %e, "failed to persist sent status");
        }

        let status = self
            .audit
            .add_patient_status(NewPatientStatus {
                patient_id: patient.patient_id,
                activity_type,
                description: Some(description),
                full_content: Some(body.to_string()),
            })
            .await;
        if let Err(e) = status {
            tracing::error!(wish_id = %wish.wish_id, error = %e, "failed to write patient status");
        }

        let comm = self
            .audit
            .add_communication(NewCommunication {
                patient_id: patient.patient_id,
                channel: channel.code(),
                direction: Direction::Outbound,
                status: CommStatus::Sent,
                subject,
                body: body.to_string(),
                recipient: recipient.to_string(),
                external_message_id,
                error_message: None,
                sent_at: Some(now),
            })
            .await;
        if let Err(e) = comm {
            tracing::error!(wish_id = %wish.wish_id, error = %e, "failed to write communication log");
        }
    }

    /// Best-effort Failed row in the communication log. The body falls back
    /// to the template body for template-based wishes, so the operator sees
    /// what would have been sent.
    async fn log_failed_communication(
        &self,
        wish: &ScheduledWishRow,
        patient: &PatientRow,
        message: &str,
    ) {
        let recipient = match Channel::from_code(wish.channel) {
            Some(Channel::Sms) => patient.phone.clone(),
            Some(Channel::Email) => patient.email.clone(),
            None => None,
        }
        .unwrap_or_default();

        let custom_body = wish
            .custom_body
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let body = match (custom_body, wish.template_id) {
            (Some(b), _) => b.to_string(),
            (None, Some(template_id)) => match self.wishes.template(template_id).await {
                Ok(Some(t)) => t.body,
                _ => String::new(),
            },
            (None, None) => String::new(),
        };

        let result = self
            .audit
            .add_communication(NewCommunication {
                patient_id: patient.patient_id,
                channel: wish.channel,
                direction: Direction::Outbound,
                status: CommStatus::Failed,
                subject: wish.custom_subject.clone(),
                body,
                recipient,
                external_message_id: None,
                error_message: Some(message.to_string()),
                sent_at: None,
            })
            .await;
        if let Err(e) = result {
            tracing::error!(wish_id = %wish.wish_id, error = %e, "failed to write failure log");
        }
    }
}
