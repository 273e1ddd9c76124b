// src/routes/appointment_routes.rs

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentStatus, Frequency, OkData, OkResponse},
    reminder::{ReminderDispatcher, ReminderError, ReminderKind, policy},
};

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctor/secretary can manage appointments".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/today", get(today_appointments))
        .route(
            "/appointments/{appointment_id}",
            put(update_appointment).delete(cancel_appointment),
        )
        .route("/send-sms", post(send_sms))
        .route("/cron/send-reminders", post(cron_send_reminders))
}

/// Reminder check kicked off after an appointment write. Runs detached with
/// its own error boundary so the write that triggered it can never fail on
/// SMS problems.
pub(crate) fn spawn_scoped_dispatch(dispatcher: Arc<ReminderDispatcher>, appointment_id: Uuid) {
    tokio::spawn(async move {
        match dispatcher.dispatch_for(&[appointment_id]).await {
            Ok(outcome) if outcome.sent_count > 0 => {
                tracing::info!(%appointment_id, "reminder sent after appointment change");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%appointment_id, error = %e, "scoped reminder dispatch failed");
            }
        }
    });
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub pet_id: Uuid,
    pub pet_name: String,
    pub owner_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub frequency: String,
    pub reason: Option<String>,
    pub status: String,
    pub sms_1d_sent: bool,
    pub sms_sameday_sent: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentJoinRow {
    appointment_id: Uuid,
    pet_id: Uuid,
    pet_name: String,
    owner_name: String,
    date: NaiveDate,
    time: NaiveTime,
    frequency: String,
    reason: Option<String>,
    status: String,
    sms_1d_sent: bool,
    sms_sameday_sent: bool,
}

impl From<AppointmentJoinRow> for AppointmentDto {
    fn from(r: AppointmentJoinRow) -> Self {
        AppointmentDto {
            appointment_id: r.appointment_id,
            pet_id: r.pet_id,
            pet_name: r.pet_name,
            owner_name: r.owner_name,
            date: r.date,
            time: r.time,
            frequency: r.frequency,
            reason: r.reason,
            // legacy 'pending'/'confirmed' rows display as Scheduled
            status: AppointmentStatus::from_db(&r.status).as_str().to_string(),
            sms_1d_sent: r.sms_1d_sent,
            sms_sameday_sent: r.sms_sameday_sent,
        }
    }
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.pet_id,
      p.name AS pet_name,
      o.name AS owner_name,
      a.date,
      a."time" AS time,
      a.frequency,
      a.reason,
      a.status,
      a.sms_1d_sent,
      a.sms_sameday_sent
    FROM appointments a
    JOIN pets p ON p.pet_id = a.pet_id
    JOIN owners o ON o.owner_id = p.owner_id
"#;

async fn fetch_appointment(
    state: &AppState,
    appointment_id: Uuid,
) -> Result<AppointmentDto, ApiError> {
    let row: Option<AppointmentJoinRow> = sqlx::query_as::<_, AppointmentJoinRow>(&format!(
        "{APPOINTMENT_SELECT} WHERE a.appointment_id = $1"
    ))
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    row.map(Into::into)
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "appointment not found".into()))
}

fn parse_time(s: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| {
            ApiError::BadRequest("VALIDATION_ERROR", "time must be HH:MM or HH:MM:SS".into())
        })
}

fn parse_frequency(s: &str) -> Result<Frequency, ApiError> {
    Frequency::parse(s).ok_or_else(|| {
        ApiError::BadRequest(
            "VALIDATION_ERROR",
            "frequency must be one of once, weekly, monthly, 3months, 6months".into(),
        )
    })
}

/* ============================================================
   POST /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub pet_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub frequency: Option<String>,
    pub reason: Option<String>,
    pub status: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_staff(&auth)?;

    let time = parse_time(req.time.trim())?;
    let frequency = match req.frequency.as_deref() {
        Some(s) => parse_frequency(s)?,
        None => Frequency::Once,
    };

    // New appointments always start out Scheduled; accept the field only
    // when it says so (clients send it explicitly).
    if let Some(s) = req.status.as_deref() {
        if AppointmentStatus::parse(s) != Some(AppointmentStatus::Scheduled) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "new appointments must be Scheduled".into(),
            ));
        }
    }

    let pet_exists: bool =
        sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM pets WHERE pet_id = $1)"#)
            .bind(req.pet_id)
            .fetch_one(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    if !pet_exists {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("pet {} not found", req.pet_id),
        ));
    }

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointments (pet_id, date, "time", frequency, reason, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING appointment_id
        "#,
    )
    .bind(req.pet_id)
    .bind(req.date)
    .bind(time)
    .bind(frequency.as_str())
    .bind(req.reason.as_deref().map(str::trim))
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    // Booked for today/tomorrow? The reminder goes out without waiting for
    // the next sweep. Response does not wait on the SMS.
    spawn_scoped_dispatch(state.dispatcher.clone(), appointment_id);

    let dto = fetch_appointment(&state, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   GET /appointments, GET /appointments/today
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let rows: Vec<AppointmentJoinRow> = sqlx::query_as::<_, AppointmentJoinRow>(&format!(
        "{APPOINTMENT_SELECT} ORDER BY a.date ASC, a.\"time\" ASC"
    ))
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn today_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let today = policy::clinic_today(state.clinic.utc_offset_hours);

    let rows: Vec<AppointmentJoinRow> = sqlx::query_as::<_, AppointmentJoinRow>(&format!(
        r#"{APPOINTMENT_SELECT}
        WHERE a.date = $1
          AND a.status NOT IN ('completed', 'cancelled')
        ORDER BY a."time" ASC"#
    ))
    .bind(today)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(Into::into).collect(),
    }))
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub frequency: Option<String>,
    pub reason: Option<String>,
    pub status: Option<String>,
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_staff(&auth)?;

    let current_status: Option<String> = sqlx::query_scalar(
        r#"SELECT status FROM appointments WHERE appointment_id = $1"#,
    )
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current_status) = current_status else {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    };
    let current = AppointmentStatus::from_db(&current_status);

    let next = match req.status.as_deref() {
        Some(s) => Some(AppointmentStatus::parse(s).ok_or_else(|| {
            ApiError::BadRequest(
                "VALIDATION_ERROR",
                "status must be Scheduled, completed or cancelled".into(),
            )
        })?),
        None => None,
    };

    if current.is_terminal() {
        // terminal appointments only tolerate the no-op status write
        let is_noop = next == Some(current)
            && req.date.is_none()
            && req.time.is_none()
            && req.frequency.is_none()
            && req.reason.is_none();
        if !is_noop {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!("appointment is {}; no further changes allowed", current.as_str()),
            ));
        }
    }
    if let Some(next) = next {
        if !current.can_transition_to(next) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                format!(
                    "cannot change a {} appointment to {}",
                    current.as_str(),
                    next.as_str()
                ),
            ));
        }
    }

    let time = match req.time.as_deref() {
        Some(s) => Some(parse_time(s.trim())?),
        None => None,
    };
    let frequency = match req.frequency.as_deref() {
        Some(s) => Some(parse_frequency(s)?),
        None => None,
    };

    sqlx::query(
        r#"
        UPDATE appointments
        SET date      = COALESCE($2, date),
            "time"    = COALESCE($3, "time"),
            frequency = COALESCE($4, frequency),
            reason    = COALESCE($5, reason),
            status    = COALESCE($6, status),
            updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(req.date)
    .bind(time)
    .bind(frequency.map(|f| f.as_str()))
    .bind(req.reason.as_deref().map(str::trim))
    .bind(next.map(|s| s.as_str()))
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    // A reschedule into today/tomorrow still fires its reminder; moving out
    // of the window never un-sets flags. Only open appointments re-check.
    if next.unwrap_or(current) == AppointmentStatus::Scheduled {
        spawn_scoped_dispatch(state.dispatcher.clone(), appointment_id);
    }

    let dto = fetch_appointment(&state, appointment_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   DELETE /appointments/{id} — soft cancel
   ============================================================ */

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_staff(&auth)?;

    // Status transition instead of a row delete; a cancelled appointment
    // must stay visible so reminders stay provably suppressed.
    let res = sqlx::query(
        r#"
        UPDATE appointments
        SET status = 'cancelled', updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/* ============================================================
   POST /send-sms — manual staff-triggered reminder
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    pub appointment_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct SendSmsData {
    pub message: String,
}

pub async fn send_sms(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SendSmsRequest>,
) -> Result<Json<ApiOk<SendSmsData>>, ApiError> {
    ensure_staff(&auth)?;

    let kind = ReminderKind::parse(req.kind.trim()).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", "type must be \"1d\" or \"sameday\"".into())
    })?;

    state
        .dispatcher
        .send_manual(req.appointment_id, kind)
        .await
        .map_err(|e| match e {
            ReminderError::NotFound => {
                ApiError::NotFound("NOT_FOUND", "appointment not found".into())
            }
            ReminderError::AlreadySent => {
                ApiError::BadRequest("ALREADY_SENT", e.to_string())
            }
            ReminderError::Closed(_) => {
                ApiError::BadRequest("APPOINTMENT_CLOSED", e.to_string())
            }
            ReminderError::NoContact => {
                ApiError::BadRequest("NO_CONTACT", "Owner contact number not found".into())
            }
            ReminderError::Gateway(g) => ApiError::BadGateway("GATEWAY_ERROR", g.to_string()),
            ReminderError::Store(s) => ApiError::Internal(s.to_string()),
        })?;

    Ok(Json(ApiOk {
        data: SendSmsData {
            message: "SMS sent successfully".to_string(),
        },
    }))
}

/* ============================================================
   POST /cron/send-reminders — scheduler-facing sweep
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct SweepData {
    pub message: String,
    pub sent_count: usize,
    pub failed_count: usize,
}

pub async fn cron_send_reminders(
    State(state): State<AppState>,
) -> Result<Json<ApiOk<SweepData>>, ApiError> {
    let outcome = state
        .dispatcher
        .sweep()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(ApiOk {
        data: SweepData {
            message: "Reminders processed".to_string(),
            sent_count: outcome.sent_count,
            failed_count: outcome.failed_count,
        },
    }))
}
