// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    lifecycle,
    models::{
        clean_phone_number, is_valid_plan, plan_progress, AppState, PatientRow, PatientStatusRow,
        PlanHistoryRow, PlanProgress, PATIENT_TYPE_PROCEED, PATIENT_TYPE_REGULAR,
    },
    store::PgAuditStore,
};

const PATIENT_COLUMNS: &str = r#"
  patient_id, first_name, middle_name, last_name, dob, phone, email, notes,
  patient_type, membership_plan, enrollment_date, accepts_marketing,
  unsubscribe_reason, unsubscribed_at, created_at, updated_at
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", post(create_patient).get(search_patients))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
        .route("/patients/{patient_id}/activity", get(list_activity))
        .route("/patients/{patient_id}/plan_history", get(list_plan_history))
        .route("/patients/{patient_id}/opt_out", post(opt_out))
        .route("/patients/{patient_id}/opt_in", post(opt_in))
}

use serde::de::Deserializer;

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Called only when the field is present (even as `null`):
    // null => Some(None) (clear), value => Some(Some(value)).
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

fn validate_patient_type(patient_type: i16) -> Result<(), ApiError> {
    if patient_type != PATIENT_TYPE_REGULAR && patient_type != PATIENT_TYPE_PROCEED {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "patient_type must be 0 (Regular) or 1 (Proceed)".into(),
        ));
    }
    Ok(())
}

fn validate_plan(plan: Option<i16>) -> Result<(), ApiError> {
    if let Some(code) = plan {
        if !is_valid_plan(code) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "membership_plan must be 1 (Bronze), 2 (Silver) or 3 (Gold)".into(),
            ));
        }
    }
    Ok(())
}

async fn fetch_patient(state: &AppState, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    let sql = format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE patient_id = $1
        "#
    );
    sqlx::query_as::<_, PatientRow>(&sql)
        .bind(patient_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))
}

/// Audit logging is best-effort write-through: the persist already
/// succeeded, so trail errors are logged, not surfaced.
async fn log_lifecycle(state: &AppState, old: Option<&PatientRow>, new: &PatientRow) {
    let events = lifecycle::record_patient_change(old, new);
    if events.is_empty() {
        return;
    }
    let audit = PgAuditStore::new(state.db.clone());
    if let Err(e) = lifecycle::apply_audit_events(&audit, new, &events).await {
        tracing::error!(patient_id = %new.patient_id, error = %e, "failed to write audit trail");
    }
}

/* -------------------------
   Create + search
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub dob: Option<chrono::NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub patient_type: Option<i16>, // default 0 (Regular)
    pub membership_plan: Option<i16>,
    pub enrollment_date: Option<chrono::NaiveDate>,
}

pub async fn create_patient(
    State(state): State<AppState>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();

    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "first_name and last_name are required".to_string(),
        ));
    }

    let patient_type = req.patient_type.unwrap_or(PATIENT_TYPE_REGULAR);
    validate_patient_type(patient_type)?;
    validate_plan(req.membership_plan)?;

    let phone = req
        .phone
        .as_deref()
        .map(clean_phone_number)
        .filter(|s| !s.is_empty());
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let sql = format!(
        r#"
        INSERT INTO patient
          (first_name, middle_name, last_name, dob, phone, email, notes,
           patient_type, membership_plan, enrollment_date)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let row: PatientRow = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(first_name)
        .bind(req.middle_name.as_deref().map(str::trim))
        .bind(last_name)
        .bind(req.dob)
        .bind(phone)
        .bind(email)
        .bind(req.notes.as_deref())
        .bind(patient_type)
        .bind(req.membership_plan)
        .bind(req.enrollment_date)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    log_lifecycle(&state, None, &row).await;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<PatientRow>>, ApiError> {
    let query = q.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        // default: most recent
        let sql = format!(
            r#"
            SELECT {PATIENT_COLUMNS}
            FROM patient
            ORDER BY created_at DESC
            LIMIT 50
            "#
        );
        let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&sql)
            .fetch_all(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        return Ok(Json(rows));
    }

    let like = format!("%{}%", query);
    let sql = format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE first_name ILIKE $1
           OR last_name ILIKE $1
           OR phone ILIKE $1
           OR email ILIKE $1
        ORDER BY created_at DESC
        LIMIT 50
        "#
    );

    let rows: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(like)
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

/* -------------------------
   Get + update
--------------------------*/

#[derive(Debug, Serialize)]
pub struct PatientDetailResponse {
    pub data: PatientDetailData,
}

#[derive(Debug, Serialize)]
pub struct PatientDetailData {
    pub patient: PatientRow,
    pub plan_progress: PlanProgress,
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientDetailResponse>, ApiError> {
    let patient = fetch_patient(&state, patient_id).await?;
    let progress = plan_progress(patient.enrollment_date, Utc::now().date_naive());

    Ok(Json(PatientDetailResponse {
        data: PatientDetailData {
            patient,
            plan_progress: progress,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub dob: Option<Option<chrono::NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
    pub patient_type: Option<i16>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub membership_plan: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub enrollment_date: Option<Option<chrono::NaiveDate>>,
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    let existing = fetch_patient(&state, patient_id).await?;

    let first_name = match req.first_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.first_name.clone(),
    };
    let last_name = match req.last_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.last_name.clone(),
    };
    let middle_name = match req.middle_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => existing.middle_name.clone(),
    };

    // Phone is normalized before storage regardless of what else changes.
    let phone: Option<String> = match req.phone {
        None => existing.phone.clone(),
        Some(None) => None,
        Some(Some(p)) => {
            let cleaned = clean_phone_number(&p);
            if cleaned.is_empty() { None } else { Some(cleaned) }
        }
    };

    let email: Option<String> = match req.email {
        None => existing.email.clone(),
        Some(None) => None,
        Some(Some(e)) => {
            let t = e.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
    };

    let membership_plan: Option<i16> = match req.membership_plan {
        None => existing.membership_plan,
        Some(None) => None,
        Some(Some(code)) => {
            validate_plan(Some(code))?;
            Some(code)
        }
    };

    let enrollment_date = match req.enrollment_date {
        None => existing.enrollment_date,
        Some(value) => value,
    };

    let dob = match req.dob {
        None => existing.dob,
        Some(value) => value,
    };
    let notes = match req.notes {
        None => existing.notes.clone(),
        Some(None) => None,
        Some(Some(n)) => {
            let t = n.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
    };
    let patient_type = req.patient_type.unwrap_or(existing.patient_type);
    validate_patient_type(patient_type)?;

    let sql = format!(
        r#"
        UPDATE patient
        SET first_name = $1,
            middle_name = $2,
            last_name = $3,
            dob = $4,
            phone = $5,
            email = $6,
            notes = $7,
            patient_type = $8,
            membership_plan = $9,
            enrollment_date = $10,
            updated_at = now()
        WHERE patient_id = $11
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(&first_name)
        .bind(&middle_name)
        .bind(&last_name)
        .bind(dob)
        .bind(&phone)
        .bind(&email)
        .bind(&notes)
        .bind(patient_type)
        .bind(membership_plan)
        .bind(enrollment_date)
        .bind(patient_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    log_lifecycle(&state, Some(&existing), &updated).await;

    Ok(Json(updated))
}

/* -------------------------
   Opt-out / opt-in
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct OptOutRequest {
    pub reason: Option<String>,
}

pub async fn opt_out(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<OptOutRequest>,
) -> Result<Json<PatientRow>, ApiError> {
    let existing = fetch_patient(&state, patient_id).await?;

    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("No reason recorded")
        .to_string();

    let sql = format!(
        r#"
        UPDATE patient
        SET accepts_marketing = FALSE,
            unsubscribe_reason = $1,
            unsubscribed_at = now(),
            updated_at = now()
        WHERE patient_id = $2
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(&reason)
        .bind(patient_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    log_lifecycle(&state, Some(&existing), &updated).await;

    Ok(Json(updated))
}

pub async fn opt_in(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<PatientRow>, ApiError> {
    let existing = fetch_patient(&state, patient_id).await?;

    let sql = format!(
        r#"
        UPDATE patient
        SET accepts_marketing = TRUE,
            unsubscribe_reason = NULL,
            unsubscribed_at = NULL,
            updated_at = now()
        WHERE patient_id = $1
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(patient_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    log_lifecycle(&state, Some(&existing), &updated).await;

    Ok(Json(updated))
}

/* -------------------------
   Audit trails (read-only, newest first)
--------------------------*/

pub async fn list_activity(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<PatientStatusRow>>, ApiError> {
    let rows: Vec<PatientStatusRow> = sqlx::query_as::<_, PatientStatusRow>(
        r#"
        SELECT status_id, patient_id, activity_type, description, full_content, created_at
        FROM patient_status
        WHERE patient_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn list_plan_history(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<PlanHistoryRow>>, ApiError> {
    let rows: Vec<PlanHistoryRow> = sqlx::query_as::<_, PlanHistoryRow>(
        r#"
        SELECT plan_history_id, patient_id, old_plan, new_plan, change_type, created_at
        FROM plan_history
        WHERE patient_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let req: UpdatePatientRequest =
            serde_json::from_str(r#"{"first_name": "Ann"}"#).unwrap();
        assert!(req.dob.is_none());
        assert!(req.notes.is_none());
        assert!(req.phone.is_none());

        let req: UpdatePatientRequest =
            serde_json::from_str(r#"{"dob": null, "notes": null, "phone": null}"#).unwrap();
        assert_eq!(req.dob, Some(None));
        assert_eq!(req.notes, Some(None));
        assert_eq!(req.phone, Some(None));
    }

    #[test]
    fn patch_accepts_values_for_clearable_fields() {
        let req: UpdatePatientRequest = serde_json::from_str(
            r#"{"dob": "1990-05-01", "notes": "prefers morning slots"}"#,
        )
        .unwrap();
        assert_eq!(
            req.dob,
            Some(Some(chrono::NaiveDate::from_ymd_opt(1990, 5, 1).unwrap()))
        );
        assert_eq!(req.notes, Some(Some("prefers morning slots".to_string())));
    }
}
