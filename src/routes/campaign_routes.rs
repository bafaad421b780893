// src/routes/campaign_routes.rs
//
// Campaign surface: reusable audience definitions (birthday and plan-expiry
// selectors) that bulk-schedule Pending wishes from a template. Delivery
// stays with the dispatch engine; a campaign run only creates wishes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        expiring_enrollment_date, is_valid_plan, just_expired_enrollment_window, AppState,
        CampaignRow, CampaignRunRow, CampaignTrigger, Channel, WishStatus, PATIENT_TYPE_PROCEED,
        PATIENT_TYPE_REGULAR, PLAN_BRONZE, PLAN_SILVER,
    },
};

const CAMPAIGN_COLUMNS: &str = r#"
  campaign_id, name, description, trigger_type, days_before, target_plan,
  target_patient_type, channel, template_id, is_active, total_scheduled,
  last_run_at, created_at, updated_at
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/campaigns", post(create_campaign).get(list_campaigns))
        .route(
            "/campaigns/{campaign_id}",
            get(get_campaign).delete(delete_campaign),
        )
        .route("/campaigns/{campaign_id}/run", post(run_campaign))
        .route("/campaigns/{campaign_id}/runs", get(list_runs))
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: CampaignTrigger,
    pub days_before: Option<i32>,
    pub target_plan: Option<i16>,
    pub target_patient_type: Option<i16>,
    pub channel: i16,
    pub template_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<CampaignRow>, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "name is required".into(),
        ));
    }
    if Channel::from_code(req.channel).is_none() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "channel must be 0 (Email) or 1 (SMS)".into(),
        ));
    }
    let days_before = req.days_before.unwrap_or(0);
    if days_before < 0 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "days_before must not be negative".into(),
        ));
    }
    if let Some(plan) = req.target_plan {
        if !is_valid_plan(plan) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "target_plan must be 1 (Bronze), 2 (Silver) or 3 (Gold)".into(),
            ));
        }
    }
    if let Some(pt) = req.target_patient_type {
        if pt != PATIENT_TYPE_REGULAR && pt != PATIENT_TYPE_PROCEED {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "target_patient_type must be 0 (Regular) or 1 (Proceed)".into(),
            ));
        }
    }

    if let Some(template_id) = req.template_id {
        let template_exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM message_template WHERE template_id = $1)
            "#,
        )
        .bind(template_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        if !template_exists {
            return Err(ApiError::NotFound("NOT_FOUND", "template not found".into()));
        }
    }

    let sql = format!(
        r#"
        INSERT INTO campaign
          (name, description, trigger_type, days_before, target_plan,
           target_patient_type, channel, template_id, is_active)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    );

    let row: CampaignRow = sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(name)
        .bind(req.description.as_deref())
        .bind(req.trigger_type)
        .bind(days_before)
        .bind(req.target_plan)
        .bind(req.target_patient_type)
        .bind(req.channel)
        .bind(req.template_id)
        .bind(req.is_active.unwrap_or(false))
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
) -> Result<Json<Vec<CampaignRow>>, ApiError> {
    let sql = format!(
        r#"
        SELECT {CAMPAIGN_COLUMNS}
        FROM campaign
        ORDER BY trigger_type ASC, name ASC
        "#
    );
    let rows: Vec<CampaignRow> = sqlx::query_as::<_, CampaignRow>(&sql)
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

async fn fetch_campaign(state: &AppState, campaign_id: Uuid) -> Result<CampaignRow, ApiError> {
    let sql = format!(
        r#"
        SELECT {CAMPAIGN_COLUMNS}
        FROM campaign
        WHERE campaign_id = $1
        "#
    );
    sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(campaign_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "campaign not found".into()))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignRow>, ApiError> {
    let row = fetch_campaign(&state, campaign_id).await?;
    Ok(Json(row))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let res = sqlx::query(
        r#"
        DELETE FROM campaign
        WHERE campaign_id = $1
        "#,
    )
    .bind(campaign_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "campaign not found".into()));
    }

    Ok(Json(serde_json::json!({ "data": { "ok": true } })))
}

/* -------------------------
   Run
--------------------------*/

#[derive(Debug, Deserialize, Default)]
pub struct RunCampaignRequest {
    /// When the created wishes come due. Defaults to now, so the next
    /// dispatch run picks them up.
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RunCampaignResponse {
    pub data: RunCampaignData,
}

#[derive(Debug, Serialize)]
pub struct RunCampaignData {
    pub patients_targeted: i64,
    pub wishes_created: i64,
}

pub async fn run_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<RunCampaignRequest>,
) -> Result<Json<RunCampaignResponse>, ApiError> {
    let campaign = fetch_campaign(&state, campaign_id).await?;

    // A wish without content fails at dispatch, so refuse to fan out a
    // campaign whose template is gone (set-null FK) or was never set.
    let Some(template_id) = campaign.template_id else {
        return Err(ApiError::Conflict(
            "CONFLICT",
            "campaign has no template".into(),
        ));
    };

    let now = Utc::now();
    let scheduled_for = req.scheduled_for.unwrap_or(now);
    let today = now.with_timezone(&state.cfg.practice_tz()).date_naive();

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO scheduled_wish (patient_id, template_id, channel, scheduled_for, status) \
         SELECT patient_id, ",
    );
    qb.push_bind(template_id);
    qb.push(", ");
    qb.push_bind(campaign.channel);
    qb.push(", ");
    qb.push_bind(scheduled_for);
    qb.push(", ");
    qb.push_bind(WishStatus::Pending);
    qb.push(" FROM patient WHERE 1=1 ");

    if let Some(plan) = campaign.target_plan {
        qb.push(" AND membership_plan = ");
        qb.push_bind(plan);
    }
    if let Some(pt) = campaign.target_patient_type {
        qb.push(" AND patient_type = ");
        qb.push_bind(pt);
    }

    match campaign.trigger_type {
        CampaignTrigger::Birthday | CampaignTrigger::BirthdayBefore => {
            let target = if campaign.trigger_type == CampaignTrigger::Birthday {
                today
            } else {
                today + chrono::Duration::days(campaign.days_before as i64)
            };
            qb.push(" AND dob IS NOT NULL AND EXTRACT(MONTH FROM dob) = ");
            qb.push_bind(target.month() as i32);
            qb.push(" AND EXTRACT(DAY FROM dob) = ");
            qb.push_bind(target.day() as i32);
        }
        CampaignTrigger::PlanExpiring => {
            let enrolled = expiring_enrollment_date(today, campaign.days_before as i64);
            qb.push(" AND enrollment_date = ");
            qb.push_bind(enrolled);
        }
        CampaignTrigger::PlanJustExpired => {
            let (start, end) = just_expired_enrollment_window(today);
            qb.push(" AND enrollment_date >= ");
            qb.push_bind(start);
            qb.push(" AND enrollment_date <= ");
            qb.push_bind(end);
        }
        CampaignTrigger::UpgradePromo => {
            qb.push(" AND membership_plan IN (");
            qb.push_bind(PLAN_BRONZE);
            qb.push(", ");
            qb.push_bind(PLAN_SILVER);
            qb.push(")");
        }
        CampaignTrigger::Manual => {}
    }

    let res = qb
        .build()
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let created = res.rows_affected() as i64;

    sqlx::query(
        r#"
        INSERT INTO campaign_run (campaign_id, patients_targeted, wishes_created, notes)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(campaign_id)
    .bind(created as i32)
    .bind(created as i32)
    .bind(format!("Manual run: {created} patient(s) targeted"))
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(
        r#"
        UPDATE campaign
        SET total_scheduled = total_scheduled + $1,
            last_run_at = $2,
            updated_at = now()
        WHERE campaign_id = $3
        "#,
    )
    .bind(created as i32)
    .bind(now)
    .bind(campaign_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(campaign = %campaign.name, created, "campaign run complete");

    Ok(Json(RunCampaignResponse {
        data: RunCampaignData {
            patients_targeted: created,
            wishes_created: created,
        },
    }))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Vec<CampaignRunRow>>, ApiError> {
    let rows: Vec<CampaignRunRow> = sqlx::query_as::<_, CampaignRunRow>(
        r#"
        SELECT run_id, campaign_id, patients_targeted, wishes_created, notes, created_at
        FROM campaign_run
        WHERE campaign_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(campaign_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}
