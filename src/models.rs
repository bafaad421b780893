use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub cfg: Config,
}

/* -------------------------
   Coded enums (smallint in DB)
--------------------------*/

/// Delivery medium for a wish or template.
/// Kept as a raw smallint on the rows so the dispatcher can fail a wish
/// carrying an unknown code instead of refusing to decode the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Channel::Email),
            1 => Some(Channel::Sms),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Channel::Email => 0,
            Channel::Sms => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Email => "Email",
            Channel::Sms => "SMS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum WishStatus {
    Pending = 0,
    Claimed = 1,
    Sent = 2,
    Failed = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum ChangeType {
    Upgrade = 0,
    Downgrade = 1,
    Renewal = 2,
}

impl ChangeType {
    pub fn label(self) -> &'static str {
        match self {
            ChangeType::Upgrade => "Upgrade",
            ChangeType::Downgrade => "Downgrade",
            ChangeType::Renewal => "Renewal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum Direction {
    Inbound = 0,
    Outbound = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum CommStatus {
    Sent = 0,
    Failed = 1,
}

/// Activity trail entries on a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum AuditActivity {
    Added = 0,
    EmailSent = 1,
    SmsSent = 2,
    PlanUpdated = 3,
    PlanRenewed = 4,
    DetailsUpdated = 5,
    OptOut = 6,
    OptIn = 7,
}

impl AuditActivity {
    pub fn label(self) -> &'static str {
        match self {
            AuditActivity::Added => "Added",
            AuditActivity::EmailSent => "Email Sent",
            AuditActivity::SmsSent => "SMS Sent",
            AuditActivity::PlanUpdated => "Plan Updated",
            AuditActivity::PlanRenewed => "Plan Renewed",
            AuditActivity::DetailsUpdated => "Details Updated",
            AuditActivity::OptOut => "Opt-out",
            AuditActivity::OptIn => "Opt-in",
        }
    }
}

/// Audience selector for a campaign run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum CampaignTrigger {
    /// Patients whose birthday is today.
    Birthday = 0,
    /// Patients whose birthday is `days_before` days from today.
    BirthdayBefore = 1,
    /// Plans whose 365-day cycle ends `days_before` days from today.
    PlanExpiring = 2,
    /// Plans that expired within the last seven days.
    PlanJustExpired = 3,
    /// Bronze and Silver members, for Gold upgrade promotions.
    UpgradePromo = 4,
    /// No audience predicate beyond the plan/type filters.
    Manual = 5,
}

/* -------------------------
   Membership plans
--------------------------*/

/// Plan codes: 1 Bronze, 2 Silver, 3 Gold. NULL means no plan.
pub const PLAN_BRONZE: i16 = 1;
pub const PLAN_SILVER: i16 = 2;
pub const PLAN_GOLD: i16 = 3;

/// Ordinal used to classify plan changes. Unknown codes rank as no plan.
pub fn plan_rank(plan: Option<i16>) -> i16 {
    match plan {
        Some(code @ PLAN_BRONZE..=PLAN_GOLD) => code,
        _ => 0,
    }
}

pub fn plan_label(plan: Option<i16>) -> &'static str {
    match plan {
        Some(PLAN_BRONZE) => "Bronze",
        Some(PLAN_SILVER) => "Silver",
        Some(PLAN_GOLD) => "Gold",
        _ => "None",
    }
}

pub fn is_valid_plan(code: i16) -> bool {
    (PLAN_BRONZE..=PLAN_GOLD).contains(&code)
}

/* -------------------------
   Patient types
--------------------------*/

pub const PATIENT_TYPE_REGULAR: i16 = 0;
/// "Proceed" is the practice's in-house membership product line.
pub const PATIENT_TYPE_PROCEED: i16 = 1;

pub fn patient_type_label(patient_type: i16) -> &'static str {
    match patient_type {
        PATIENT_TYPE_REGULAR => "Regular",
        PATIENT_TYPE_PROCEED => "Proceed",
        _ => "Unknown",
    }
}

/* -------------------------
   Phone normalization
--------------------------*/

/// Standardize a phone number to at most 10 digits.
/// Strips every non-digit, then the leading country code "1" from
/// 11-digit inputs.
pub fn clean_phone_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };
    digits.chars().take(10).collect()
}

/* -------------------------
   Plan progress (365-day cycle)
--------------------------*/

pub const PLAN_DURATION_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanProgress {
    pub percentage: i64,
    pub is_expired: bool,
    pub days_left: i64,
    pub elapsed_days: i64,
    pub overdue_days: i64,
    pub expiry_date: Option<NaiveDate>,
    pub label: &'static str,
}

/// Progress of the one-year plan as of `today`. Pure function of the
/// enrollment date; no enrollment means "No Plan".
pub fn plan_progress(enrollment_date: Option<NaiveDate>, today: NaiveDate) -> PlanProgress {
    let Some(enrolled) = enrollment_date else {
        return PlanProgress {
            percentage: 0,
            is_expired: false,
            days_left: 0,
            elapsed_days: 0,
            overdue_days: 0,
            expiry_date: None,
            label: "No Plan",
        };
    };

    let elapsed = (today - enrolled).num_days();
    let percentage = (elapsed * 100 / PLAN_DURATION_DAYS).clamp(0, 100);
    let is_expired = elapsed > PLAN_DURATION_DAYS;
    let days_left = (PLAN_DURATION_DAYS - elapsed).max(0);
    let overdue_days = (elapsed - PLAN_DURATION_DAYS).max(0);
    let expiry_date = enrolled + Duration::days(PLAN_DURATION_DAYS);

    let label = if is_expired {
        if overdue_days <= 30 { "Just Expired" } else { "Expired" }
    } else if days_left <= 30 {
        "Expiring Soon"
    } else {
        "Active"
    };

    PlanProgress {
        percentage,
        is_expired,
        days_left,
        elapsed_days: elapsed,
        overdue_days,
        expiry_date: Some(expiry_date),
        label,
    }
}

/// Enrollment date whose plan cycle ends exactly `days_ahead` days from
/// `today`. Used to select the "Expiring Soon" campaign audience.
pub fn expiring_enrollment_date(today: NaiveDate, days_ahead: i64) -> NaiveDate {
    today + Duration::days(days_ahead - PLAN_DURATION_DAYS)
}

/// Inclusive enrollment-date window for plans that expired within the last
/// seven days (the "Just Expired" audience).
pub fn just_expired_enrollment_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        today - Duration::days(PLAN_DURATION_DAYS + 7),
        today - Duration::days(PLAN_DURATION_DAYS + 1),
    )
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub dob: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub patient_type: i16,
    pub membership_plan: Option<i16>,
    pub enrollment_date: Option<NaiveDate>,
    pub accepts_marketing: bool,
    pub unsubscribe_reason: Option<String>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MessageTemplateRow {
    pub template_id: Uuid,
    pub name: String,
    pub channel: i16,
    pub subject: Option<String>,
    pub body: String,
    pub signature_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailSignatureRow {
    pub signature_id: Uuid,
    pub name: String,
    pub content: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CampaignRow {
    pub campaign_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: CampaignTrigger,
    /// Days ahead for BirthdayBefore and PlanExpiring triggers.
    pub days_before: i32,
    pub target_plan: Option<i16>,
    pub target_patient_type: Option<i16>,
    pub channel: i16,
    pub template_id: Option<Uuid>,
    pub is_active: bool,
    pub total_scheduled: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CampaignRunRow {
    pub run_id: Uuid,
    pub campaign_id: Uuid,
    pub patients_targeted: i32,
    pub wishes_created: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScheduledWishRow {
    pub wish_id: Uuid,
    pub patient_id: Uuid,
    pub template_id: Option<Uuid>,
    pub channel: i16,
    pub scheduled_for: DateTime<Utc>,
    pub status: WishStatus,
    pub claimed_until: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub custom_subject: Option<String>,
    pub custom_body: Option<String>,
    pub cc_recipients: Option<String>,
    pub bcc_recipients: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientStatusRow {
    pub status_id: Uuid,
    pub patient_id: Uuid,
    pub activity_type: AuditActivity,
    pub description: Option<String>,
    pub full_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlanHistoryRow {
    pub plan_history_id: Uuid,
    pub patient_id: Uuid,
    pub old_plan: Option<i16>,
    pub new_plan: Option<i16>,
    pub change_type: ChangeType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommunicationLogRow {
    pub log_id: Uuid,
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
    pub created_at: DateTime<Utc>,
}
