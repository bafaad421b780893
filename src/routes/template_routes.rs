// src/routes/template_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{AppState, Channel, EmailSignatureRow, MessageTemplateRow},
    render,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create_template).get(list_templates))
        .route(
            "/templates/{template_id}",
            get(get_template).delete(delete_template),
        )
        .route("/templates/render", post(render_template))
        .route("/signatures", post(create_signature).get(list_signatures))
        .route(
            "/signatures/{signature_id}",
            get(get_signature).delete(delete_signature),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub channel: i16,
    pub subject: Option<String>,
    pub body: String,
    pub signature_id: Option<Uuid>,
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<MessageTemplateRow>, ApiError> {
    let name = req.name.trim();
    let body = req.body.trim();

    if name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "name is required".into(),
        ));
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "body is required".into(),
        ));
    }
    if Channel::from_code(req.channel).is_none() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "channel must be 0 (Email) or 1 (SMS)".into(),
        ));
    }

    if let Some(signature_id) = req.signature_id {
        let signature_exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM email_signature WHERE signature_id = $1)
            "#,
        )
        .bind(signature_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        if !signature_exists {
            return Err(ApiError::NotFound("NOT_FOUND", "signature not found".into()));
        }
    }

    let row: MessageTemplateRow = sqlx::query_as::<_, MessageTemplateRow>(
        r#"
        INSERT INTO message_template (name, channel, subject, body, signature_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING template_id, name, channel, subject, body, signature_id,
                  created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(req.channel)
    .bind(req.subject.as_deref().map(str::trim))
    .bind(body)
    .bind(req.signature_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<MessageTemplateRow>>, ApiError> {
    let rows: Vec<MessageTemplateRow> = sqlx::query_as::<_, MessageTemplateRow>(
        r#"
        SELECT template_id, name, channel, subject, body, signature_id,
               created_at, updated_at
        FROM message_template
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<MessageTemplateRow>, ApiError> {
    let row: MessageTemplateRow = sqlx::query_as::<_, MessageTemplateRow>(
        r#"
        SELECT template_id, name, channel, subject, body, signature_id,
               created_at, updated_at
        FROM message_template
        WHERE template_id = $1
        "#,
    )
    .bind(template_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "template not found".into()))?;

    Ok(Json(row))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Wishes keep dangling references as NULL (set-null FK), so deletion is
    // always allowed; the dispatcher fails such wishes with "missing content".
    let res = sqlx::query(
        r#"
        DELETE FROM message_template
        WHERE template_id = $1
        "#,
    )
    .bind(template_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "template not found".into()));
    }

    Ok(Json(serde_json::json!({ "data": { "ok": true } })))
}

/* -------------------------
   Email signatures
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct CreateSignatureRequest {
    pub name: String,
    pub content: String,
    pub is_default: Option<bool>,
}

pub async fn create_signature(
    State(state): State<AppState>,
    Json(req): Json<CreateSignatureRequest>,
) -> Result<Json<EmailSignatureRow>, ApiError> {
    let name = req.name.trim();
    let content = req.content.trim();

    if name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "name is required".into(),
        ));
    }
    if content.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "content is required".into(),
        ));
    }

    let is_default = req.is_default.unwrap_or(false);
    // Only one default at a time.
    if is_default {
        sqlx::query("UPDATE email_signature SET is_default = FALSE WHERE is_default")
            .execute(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    }

    let row: EmailSignatureRow = sqlx::query_as::<_, EmailSignatureRow>(
        r#"
        INSERT INTO email_signature (name, content, is_default)
        VALUES ($1, $2, $3)
        RETURNING signature_id, name, content, is_default, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(content)
    .bind(is_default)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn list_signatures(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmailSignatureRow>>, ApiError> {
    let rows: Vec<EmailSignatureRow> = sqlx::query_as::<_, EmailSignatureRow>(
        r#"
        SELECT signature_id, name, content, is_default, created_at, updated_at
        FROM email_signature
        ORDER BY is_default DESC, name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_signature(
    State(state): State<AppState>,
    Path(signature_id): Path<Uuid>,
) -> Result<Json<EmailSignatureRow>, ApiError> {
    let row: EmailSignatureRow = sqlx::query_as::<_, EmailSignatureRow>(
        r#"
        SELECT signature_id, name, content, is_default, created_at, updated_at
        FROM email_signature
        WHERE signature_id = $1
        "#,
    )
    .bind(signature_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "signature not found".into()))?;

    Ok(Json(row))
}

pub async fn delete_signature(
    State(state): State<AppState>,
    Path(signature_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Templates keep working; their signature_id goes NULL (set-null FK).
    let res = sqlx::query(
        r#"
        DELETE FROM email_signature
        WHERE signature_id = $1
        "#,
    )
    .bind(signature_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "signature not found".into()));
    }

    Ok(Json(serde_json::json!({ "data": { "ok": true } })))
}

/* -------------------------
   Render preview
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct RenderTemplateRequest {
    pub template: String,
    pub channel: i16,
    pub patient_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RenderTemplateResponse {
    pub data: RenderTemplateData,
}

#[derive(Debug, Serialize)]
pub struct RenderTemplateData {
    pub rendered: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PatientLiteRow {
    first_name: String,
    last_name: String,
}

pub async fn render_template(
    State(state): State<AppState>,
    Json(req): Json<RenderTemplateRequest>,
) -> Result<Json<RenderTemplateResponse>, ApiError> {
    let tpl = req.template.trim().to_string();
    if tpl.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "template is required".into(),
        ));
    }

    let channel = Channel::from_code(req.channel).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", "channel must be 0 (Email) or 1 (SMS)".into())
    })?;

    let p: PatientLiteRow = sqlx::query_as::<_, PatientLiteRow>(
        r#"
        SELECT first_name, last_name
        FROM patient
        WHERE patient_id = $1
        "#,
    )
    .bind(req.patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))?;

    let substituted = render::render_placeholders(&tpl, &p.first_name, &p.last_name);
    let rendered = match channel {
        Channel::Sms => render::sms_plain_text(&substituted),
        Channel::Email => render::email_html_body(&substituted),
    };

    Ok(Json(RenderTemplateResponse {
        data: RenderTemplateData { rendered },
    }))
}
