// src/routes/wish_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    dispatch::{DispatchSummary, Dispatcher, SystemClock},
    error::ApiError,
    gateway::{LogEmailGateway, LogSmsGateway},
    models::{AppState, Channel, ScheduledWishRow, WishStatus},
    store::{PgAuditStore, PgPatientStore, PgWishStore, WISH_COLUMNS},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/wishes", post(schedule_wish).get(search_wishes))
        .route("/wishes/dispatch", post(dispatch_wishes))
        .route("/wishes/{wish_id}", get(get_wish))
        .route("/wishes/{wish_id}/reschedule", post(reschedule_wish))
}

/* -------------------------
   Schedule + query
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct ScheduleWishRequest {
    pub patient_id: Uuid,
    pub template_id: Option<Uuid>,
    pub channel: i16,
    pub scheduled_for: DateTime<Utc>,
    pub custom_subject: Option<String>,
    pub custom_body: Option<String>,
    pub cc_recipients: Option<String>,
    pub bcc_recipients: Option<String>,
}

pub async fn schedule_wish(
    State(state): State<AppState>,
    Json(req): Json<ScheduleWishRequest>,
) -> Result<Json<ScheduledWishRow>, ApiError> {
    if Channel::from_code(req.channel).is_none() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "channel must be 0 (Email) or 1 (SMS)".into(),
        ));
    }

    let has_custom_body = req
        .custom_body
        .as_deref()
        .map(str::trim)
        .is_some_and(|s| !s.is_empty());
    if req.template_id.is_none() && !has_custom_body {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "either template_id or custom_body must be provided".into(),
        ));
    }

    let patient_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(SELECT 1 FROM patient WHERE patient_id = $1)
        "#,
    )
    .bind(req.patient_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    if !patient_exists {
        return Err(ApiError::NotFound("NOT_FOUND", "patient not found".into()));
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
        INSERT INTO scheduled_wish
          (patient_id, template_id, channel, scheduled_for, status,
           custom_subject, custom_body, cc_recipients, bcc_recipients)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING {WISH_COLUMNS}
        "#
    );

    let row: ScheduledWishRow = sqlx::query_as::<_, ScheduledWishRow>(&sql)
        .bind(req.patient_id)
        .bind(req.template_id)
        .bind(req.channel)
        .bind(req.scheduled_for)
        .bind(WishStatus::Pending)
        .bind(req.custom_subject.as_deref().map(str::trim))
        .bind(req.custom_body.as_deref())
        .bind(req.cc_recipients.as_deref())
        .bind(req.bcc_recipients.as_deref())
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct WishSearchQuery {
    pub patient_id: Option<Uuid>,
    pub status: Option<i16>,
    pub due_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn search_wishes(
    State(state): State<AppState>,
    Query(q): Query<WishSearchQuery>,
) -> Result<Json<Vec<ScheduledWishRow>>, ApiError> {
    if let Some(s) = q.status {
        if !(0..=3).contains(&s) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "status must be 0..3".into(),
            ));
        }
    }

    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);

    let mut qb: QueryBuilder<sqlx::Postgres> =
        QueryBuilder::new(format!("SELECT {WISH_COLUMNS} FROM scheduled_wish WHERE 1=1 "));

    if let Some(pid) = q.patient_id {
        qb.push(" AND patient_id = ");
        qb.push_bind(pid);
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ");
        qb.push_bind(status);
    }
    if let Some(due) = q.due_before {
        qb.push(" AND scheduled_for <= ");
        qb.push_bind(due);
    }

    qb.push(" ORDER BY scheduled_for ASC ");
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows: Vec<ScheduledWishRow> = qb
        .build_query_as::<ScheduledWishRow>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_wish(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
) -> Result<Json<ScheduledWishRow>, ApiError> {
    let sql = format!(
        r#"
        SELECT {WISH_COLUMNS}
        FROM scheduled_wish
        WHERE wish_id = $1
        "#
    );

    let row: ScheduledWishRow = sqlx::query_as::<_, ScheduledWishRow>(&sql)
        .bind(wish_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "wish not found".into()))?;

    Ok(Json(row))
}

/* -------------------------
   Operator reschedule
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_for: DateTime<Utc>,
}

/// Terminal wishes stay terminal until an operator explicitly reschedules.
/// This puts a Sent or Failed wish back to Pending at a new time.
pub async fn reschedule_wish(
    State(state): State<AppState>,
    Path(wish_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ScheduledWishRow>, ApiError> {
    let current_status: Option<WishStatus> = sqlx::query_scalar(
        r#"
        SELECT status
        FROM scheduled_wish
        WHERE wish_id = $1
        "#,
    )
    .bind(wish_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current_status) = current_status else {
        return Err(ApiError::NotFound("NOT_FOUND", "wish not found".into()));
    };

    if current_status == WishStatus::Claimed {
        return Err(ApiError::Conflict(
            "CONFLICT",
            "wish is currently being dispatched".into(),
        ));
    }

    let sql = format!(
        r#"
        UPDATE scheduled_wish
        SET status = $1,
            scheduled_for = $2,
            claimed_until = NULL,
            sent_at = NULL,
            error_message = NULL,
            updated_at = now()
        WHERE wish_id = $3
        RETURNING {WISH_COLUMNS}
        "#
    );

    let row: ScheduledWishRow = sqlx::query_as::<_, ScheduledWishRow>(&sql)
        .bind(WishStatus::Pending)
        .bind(req.scheduled_for)
        .bind(wish_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

/* -------------------------
   Dispatch trigger
--------------------------*/

/// Cron-equivalent external trigger: processes every due wish and returns
/// the aggregate counters.
pub async fn dispatch_wishes(
    State(state): State<AppState>,
) -> Result<Json<DispatchSummary>, ApiError> {
    let patients = PgPatientStore::new(state.db.clone());
    let wishes = PgWishStore::new(state.db.clone());
    let audit = PgAuditStore::new(state.db.clone());
    let sms = LogSmsGateway;
    let email = LogEmailGateway {
        from_name: state.cfg.from_name.clone(),
        from_email: state.cfg.from_email.clone(),
    };

    let dispatcher = Dispatcher {
        patients: &patients,
        wishes: &wishes,
        audit: &audit,
        sms: &sms,
        email: &email,
        clock: &SystemClock,
        claim_ttl: Duration::minutes(state.cfg.claim_ttl_minutes),
        practice_tz: state.cfg.practice_tz(),
        summary_recipients: state.cfg.summary_recipients.clone(),
    };

    let summary = dispatcher.run().await?;
    Ok(Json(summary))
}
