//! Shared fixtures for the dispatch engine tests: in-memory stores, scripted
//! gateways, and a pinned clock.

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use pcms_server::dispatch::Clock;
use pcms_server::gateway::{EmailGateway, EmailPayload, GatewayError, SmsGateway};
use pcms_server::models::{
    EmailSignatureRow, MessageTemplateRow, PatientRow, ScheduledWishRow, WishStatus,
};
use pcms_server::store::{
    AuditStore, NewCommunication, NewPatientStatus, NewPlanHistory, PatientStore, StoreError,
    WishStore,
};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap()
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/* -------------------------
   Row builders
--------------------------*/

pub fn patient(first: &str, last: &str) -> PatientRow {
    let now = fixed_now();
    PatientRow {
        patient_id: Uuid::new_v4(),
        first_name: first.to_string(),
        middle_name: None,
        last_name: last.to_string(),
        dob: None,
        phone: Some("7603405107".to_string()),
        email: Some("patient@example.com".to_string()),
        notes: None,
        patient_type: 0,
        membership_plan: None,
        enrollment_date: None,
        accepts_marketing: true,
        unsubscribe_reason: None,
        unsubscribed_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn wish(patient_id: Uuid, channel: i16, due: DateTime<Utc>) -> ScheduledWishRow {
    let now = fixed_now();
    ScheduledWishRow {
        wish_id: Uuid::new_v4(),
        patient_id,
        template_id: None,
        channel,
        scheduled_for: due,
        status: WishStatus::Pending,
        claimed_until: None,
        sent_at: None,
        error_message: None,
        custom_subject: Some("Happy Birthday {first_name}!".to_string()),
        custom_body: Some("<p>Dear {first_name} {last_name},</p><p>Have a great day!</p>".to_string()),
        cc_recipients: None,
        bcc_recipients: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn template(channel: i16, subject: Option<&str>, body: &str) -> MessageTemplateRow {
    let now = fixed_now();
    MessageTemplateRow {
        template_id: Uuid::new_v4(),
        name: "Birthday".to_string(),
        channel,
        subject: subject.map(str::to_string),
        body: body.to_string(),
        signature_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn signature(content: &str) -> EmailSignatureRow {
    let now = fixed_now();
    EmailSignatureRow {
        signature_id: Uuid::new_v4(),
        name: "Default".to_string(),
        content: content.to_string(),
        is_default: true,
        created_at: now,
        updated_at: now,
    }
}

/* -------------------------
   In-memory stores
--------------------------*/

#[derive(Default)]
pub struct MemoryPatientStore {
    pub patients: Mutex<Vec<PatientRow>>,
}

impl MemoryPatientStore {
    pub fn with(patients: Vec<PatientRow>) -> Self {
        Self {
            patients: Mutex::new(patients),
        }
    }
}

#[async_trait]
impl PatientStore for MemoryPatientStore {
    async fn get(&self, patient_id: Uuid) -> Result<Option<PatientRow>, StoreError> {
        let patients = self.patients.lock().unwrap();
        Ok(patients.iter().find(|p| p.patient_id == patient_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryWishStore {
    pub wishes: Mutex<Vec<ScheduledWishRow>>,
    pub templates: Mutex<Vec<MessageTemplateRow>>,
    pub signatures: Mutex<Vec<EmailSignatureRow>>,
}

impl MemoryWishStore {
    pub fn with(wishes: Vec<ScheduledWishRow>) -> Self {
        Self {
            wishes: Mutex::new(wishes),
            templates: Mutex::new(Vec::new()),
            signatures: Mutex::new(Vec::new()),
        }
    }

    pub fn add_template(&self, template: MessageTemplateRow) {
        self.templates.lock().unwrap().push(template);
    }

    pub fn add_signature(&self, signature: EmailSignatureRow) {
        self.signatures.lock().unwrap().push(signature);
    }

    pub fn status_of(&self, wish_id: Uuid) -> WishStatus {
        let wishes = self.wishes.lock().unwrap();
        wishes
            .iter()
            .find(|w| w.wish_id == wish_id)
            .map(|w| w.status)
            .unwrap()
    }

    pub fn error_of(&self, wish_id: Uuid) -> Option<String> {
        let wishes = self.wishes.lock().unwrap();
        wishes
            .iter()
            .find(|w| w.wish_id == wish_id)
            .and_then(|w| w.error_message.clone())
    }
}

#[async_trait]
impl WishStore for MemoryWishStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledWishRow>, StoreError> {
        let mut wishes = self.wishes.lock().unwrap();
        let mut claimed = Vec::new();
        for w in wishes.iter_mut() {
            let due = w.scheduled_for <= now;
            let claimable = w.status == WishStatus::Pending
                || (w.status == WishStatus::Claimed
                    && w.claimed_until.is_some_and(|until| until <= now));
            if due && claimable {
                w.status = WishStatus::Claimed;
                w.claimed_until = Some(claim_until);
                claimed.push(w.clone());
            }
        }
        claimed.sort_by_key(|w| w.scheduled_for);
        Ok(claimed)
    }

    async fn mark_sent(&self, wish_id: Uuid, sent_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut wishes = self.wishes.lock().unwrap();
        if let Some(w) = wishes.iter_mut().find(|w| w.wish_id == wish_id) {
            w.status = WishStatus::Sent;
            w.sent_at = Some(sent_at);
            w.claimed_until = None;
            w.error_message = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, wish_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        let mut wishes = self.wishes.lock().unwrap();
        if let Some(w) = wishes.iter_mut().find(|w| w.wish_id == wish_id) {
            w.status = WishStatus::Failed;
            w.claimed_until = None;
            w.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<MessageTemplateRow>, StoreError> {
        let templates = self.templates.lock().unwrap();
        Ok(templates
            .iter()
            .find(|t| t.template_id == template_id)
            .cloned())
    }

    async fn signature(
        &self,
        signature_id: Uuid,
    ) -> Result<Option<EmailSignatureRow>, StoreError> {
        let signatures = self.signatures.lock().unwrap();
        Ok(signatures
            .iter()
            .find(|s| s.signature_id == signature_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    pub statuses: Mutex<Vec<NewPatientStatus>>,
    pub plan_history: Mutex<Vec<NewPlanHistory>>,
    pub communications: Mutex<Vec<NewCommunication>>,
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn add_patient_status(&self, entry: NewPatientStatus) -> Result<(), StoreError> {
        self.statuses.lock().unwrap().push(entry);
        Ok(())
    }

    async fn add_plan_history(&self, entry: NewPlanHistory) -> Result<(), StoreError> {
        self.plan_history.lock().unwrap().push(entry);
        Ok(())
    }

    async fn add_communication(&self, entry: NewCommunication) -> Result<(), StoreError> {
        self.communications.lock().unwrap().push(entry);
        Ok(())
    }
}

/* -------------------------
   Scripted gateways
--------------------------*/

/// SMS gateway that records every send and optionally fails for chosen
/// recipients.
#[derive(Default)]
pub struct ScriptedSmsGateway {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_numbers: Vec<String>,
}

#[async_trait]
impl SmsGateway for ScriptedSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<String, GatewayError> {
        if self.fail_numbers.iter().any(|n| n == to) {
            return Err(GatewayError("carrier rejected message".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(format!("sms-{}", Uuid::new_v4()))
    }
}

#[derive(Default)]
pub struct RecordingEmailGateway {
    pub sent: Mutex<Vec<EmailPayload>>,
}

#[async_trait]
impl EmailGateway for RecordingEmailGateway {
    async fn send(&self, message: &EmailPayload) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
