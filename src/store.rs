// src/store.rs
//
// Repository traits for the dispatch engine and lifecycle tracker, plus the
// Postgres implementations. The dispatch loop only sees the traits, so tests
// drive it with in-memory stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    AuditActivity, ChangeType, CommStatus, Direction, EmailSignatureRow, MessageTemplateRow,
    PatientRow, ScheduledWishRow, WishStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] sqlx::Error),
}

/* -------------------------
   Insert payloads
--------------------------*/

#[derive(Debug, Clone)]
pub struct NewPatientStatus {
    pub patient_id: Uuid,
    pub activity_type: AuditActivity,
    pub description: Option<String>,
    pub full_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPlanHistory {
    pub patient_id: Uuid,
    pub old_plan: Option<i16>,
    pub new_plan: Option<i16>,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone)]
pub struct NewCommunication {
    pub patient_id: Uuid,
    pub channel: i16,
    pub direction: Direction,
    pub status: CommStatus,
    pub subject: Option<String>,
    pub body: String,
    pub recipient: String,
    pub external_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/* -------------------------
   Traits
--------------------------*/

#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn get(&self, patient_id: Uuid) -> Result<Option<PatientRow>, StoreError>;
}

#[async_trait]
pub trait WishStore: Send + Sync {
    /// Atomically move due Pending wishes (and wishes whose claim expired)
    /// to Claimed with the given expiry, returning the claimed batch.
    /// This is the double-send guard: a concurrent run claims a disjoint set.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledWishRow>, StoreError>;

    async fn mark_sent(&self, wish_id: Uuid, sent_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn mark_failed(&self, wish_id: Uuid, error_message: &str) -> Result<(), StoreError>;

    async fn template(&self, template_id: Uuid)
        -> Result<Option<MessageTemplateRow>, StoreError>;

    async fn signature(&self, signature_id: Uuid)
        -> Result<Option<EmailSignatureRow>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn add_patient_status(&self, entry: NewPatientStatus) -> Result<(), StoreError>;
    async fn add_plan_history(&self, entry: NewPlanHistory) -> Result<(), StoreError>;
    async fn add_communication(&self, entry: NewCommunication) -> Result<(), StoreError>;
}

/* -------------------------
   Postgres implementations
--------------------------*/

pub const WISH_COLUMNS: &str = r#"
  wish_id,
  patient_id,
  template_id,
  channel,
  scheduled_for,
  status,
  claimed_until,
  sent_at,
  error_message,
  custom_subject,
  custom_body,
  cc_recipients,
  bcc_recipients,
  created_at,
  updated_at
"#;

#[derive(Clone)]
pub struct PgPatientStore {
    pool: PgPool,
}

impl PgPatientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientStore for PgPatientStore {
    async fn get(&self, patient_id: Uuid) -> Result<Option<PatientRow>, StoreError> {
        let row = sqlx::query_as::<_, PatientRow>(
            r#"
            SELECT
              patient_id, first_name, middle_name, last_name, dob, phone, email,
              notes, patient_type, membership_plan, enrollment_date,
              accepts_marketing, unsubscribe_reason, unsubscribed_at,
              created_at, updated_at
            FROM patient
            WHERE patient_id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

#[derive(Clone)]
pub struct PgWishStore {
    pool: PgPool,
}

impl PgWishStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WishStore for PgWishStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        claim_until: DateTime<Utc>,
    ) -> Result<Vec<ScheduledWishRow>, StoreError> {
        let sql = format!(
            r#"
            UPDATE scheduled_wish
            SET status = $1, claimed_until = $2, updated_at = now()
            WHERE wish_id IN (
                SELECT wish_id
                FROM scheduled_wish
                WHERE scheduled_for <= $3
                  AND (status = $4
                       OR (status = $1 AND claimed_until IS NOT NULL AND claimed_until <= $3))
                ORDER BY scheduled_for ASC
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {WISH_COLUMNS}
            "#
        );

        let rows = sqlx::query_as::<_, ScheduledWishRow>(&sql)
            .bind(WishStatus::Claimed)
            .bind(claim_until)
            .bind(now)
            .bind(WishStatus::Pending)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn mark_sent(&self, wish_id: Uuid, sent_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scheduled_wish
            SET status = $1,
                sent_at = $2,
                claimed_until = NULL,
                error_message = NULL,
                updated_at = now()
            WHERE wish_id = $3
            "#,
        )
        .bind(WishStatus::Sent)
        .bind(sent_at)
        .bind(wish_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, wish_id: Uuid, error_message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scheduled_wish
            SET status = $1,
                error_message = $2,
                claimed_until = NULL,
                updated_at = now()
            WHERE wish_id = $3
            "#,
        )
        .bind(WishStatus::Failed)
        .bind(error_message)
        .bind(wish_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<MessageTemplateRow>, StoreError> {
        let row = sqlx::query_as::<_, MessageTemplateRow>(
            r#"
            SELECT template_id, name, channel, subject, body, signature_id,
                   created_at, updated_at
            FROM message_template
            WHERE template_id = $1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn signature(
        &self,
        signature_id: Uuid,
    ) -> Result<Option<EmailSignatureRow>, StoreError> {
        let row = sqlx::query_as::<_, EmailSignatureRow>(
            r#"
            SELECT signature_id, name, content, is_default, created_at, updated_at
            FROM email_signature
            WHERE signature_id = $1
            "#,
        )
        .bind(signature_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn add_patient_status(&self, entry: NewPatientStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO patient_status (patient_id, activity_type, description, full_content)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.patient_id)
        .bind(entry.activity_type)
        .bind(entry.description)
        .bind(entry.full_content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_plan_history(&self, entry: NewPlanHistory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO plan_history (patient_id, old_plan, new_plan, change_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.patient_id)
        .bind(entry.old_plan)
        .bind(entry.new_plan)
        .bind(entry.change_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_communication(&self, entry: NewCommunication) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO communication_log
              (patient_id, channel, direction, status, subject, body, recipient,
               external_message_id, error_message, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.patient_id)
        .bind(entry.channel)
        .bind(entry.direction)
        .bind(entry.status)
        .bind(entry.subject)
        .bind(entry.body)
        .bind(entry.recipient)
        .bind(entry.external_message_id)
        .bind(entry.error_message)
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
