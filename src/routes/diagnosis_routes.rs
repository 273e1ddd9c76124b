// src/routes/diagnosis_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, OkResponse},
    routes::appointment_routes::spawn_scoped_dispatch,
};

fn ensure_doctor(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only a doctor can record diagnoses".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/diagnoses", get(list_diagnoses).post(create_diagnosis))
        .route(
            "/diagnoses/{diagnosis_id}",
            axum::routing::delete(delete_diagnosis),
        )
}

/* ============================================================
   POST /diagnoses
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateDiagnosisRequest {
    pub pet_id: Uuid,
    pub vaccination: Option<String>,
    pub date: NaiveDate,
    pub weight_kg: Option<Decimal>,
    pub temperature_c: Option<Decimal>,
    pub test: Option<String>,
    pub dx: Option<String>,
    pub rx: Option<String>,
    pub remarks: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub medications: Option<Vec<MedicationInput>>,
}

#[derive(Debug, Deserialize)]
pub struct MedicationInput {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateDiagnosisData {
    pub diagnosis_id: Uuid,
    /// Set when follow_up_date implicitly scheduled a visit.
    pub follow_up_appointment_id: Option<Uuid>,
}

pub async fn create_diagnosis(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateDiagnosisRequest>,
) -> Result<Json<ApiOk<CreateDiagnosisData>>, ApiError> {
    ensure_doctor(&auth)?;

    let pet_exists: bool = sqlx::query_scalar(
        r#"SELECT EXISTS(SELECT 1 FROM pets WHERE pet_id = $1)"#,
    )
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

    if let Some(meds) = &req.medications {
        if meds.iter().any(|m| m.quantity < 1) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "medication quantity must be at least 1".into(),
            ));
        }
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let diagnosis_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO diagnoses
            (pet_id, vaccination, date, weight_kg, temperature_c, test, dx, rx,
             remarks, follow_up_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING diagnosis_id
        "#,
    )
    .bind(req.pet_id)
    .bind(req.vaccination.as_deref())
    .bind(req.date)
    .bind(req.weight_kg)
    .bind(req.temperature_c)
    .bind(req.test.as_deref())
    .bind(req.dx.as_deref())
    .bind(req.rx.as_deref())
    .bind(req.remarks.as_deref())
    .bind(req.follow_up_date)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if let Some(meds) = &req.medications {
        for m in meds {
            sqlx::query(
                r#"
                INSERT INTO diagnosis_medications (diagnosis_id, inventory_id, quantity)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(diagnosis_id)
            .bind(m.inventory_id)
            .bind(m.quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                ApiError::BadRequest("MEDICATION_SAVE_FAILED", format!("{e}"))
            })?;
        }
    }

    // A follow-up date implicitly books the next visit.
    let follow_up_appointment_id: Option<Uuid> = match req.follow_up_date {
        Some(date) => {
            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO appointments (pet_id, date, "time", reason, created_by)
                VALUES ($1, $2, $3, 'Follow-up checkup', $4)
                RETURNING appointment_id
                "#,
            )
            .bind(req.pet_id)
            .bind(date)
            .bind(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
            .bind(auth.user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
            Some(id)
        }
        None => None,
    };

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // A follow-up booked for today/tomorrow should still get its reminder.
    if let Some(appointment_id) = follow_up_appointment_id {
        spawn_scoped_dispatch(state.dispatcher.clone(), appointment_id);
    }

    Ok(Json(ApiOk {
        data: CreateDiagnosisData {
            diagnosis_id,
            follow_up_appointment_id,
        },
    }))
}

/* ============================================================
   GET /diagnoses
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct DiagnosisDto {
    pub diagnosis_id: Uuid,
    pub pet_id: Uuid,
    pub vaccination: Option<String>,
    pub date: NaiveDate,
    pub weight_kg: Option<Decimal>,
    pub temperature_c: Option<Decimal>,
    pub test: Option<String>,
    pub dx: Option<String>,
    pub rx: Option<String>,
    pub remarks: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub medications: Vec<MedicationDto>,
}

#[derive(Debug, Serialize)]
pub struct MedicationDto {
    pub inventory_id: Uuid,
    pub name: String,
    pub quantity: i32,
}

pub async fn list_diagnoses(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<DiagnosisDto>>>, ApiError> {
    use sqlx::Row;
    use std::collections::BTreeMap;

    let rows = sqlx::query(
        r#"
        SELECT
          d.diagnosis_id,
          d.pet_id,
          d.vaccination,
          d.date,
          d.weight_kg,
          d.temperature_c,
          d.test,
          d.dx,
          d.rx,
          d.remarks,
          d.follow_up_date,
          d.created_at,

          dm.inventory_id AS med_inventory_id,
          dm.quantity AS med_quantity,
          i.name AS med_name

        FROM diagnoses d
        LEFT JOIN diagnosis_medications dm ON dm.diagnosis_id = d.diagnosis_id
        LEFT JOIN inventory i ON i.inventory_id = dm.inventory_id

        ORDER BY d.date DESC, d.created_at DESC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    fn internal_row(e: sqlx::Error) -> ApiError {
        ApiError::Internal(format!("row decode error: {e}"))
    }

    let mut map: BTreeMap<Uuid, DiagnosisDto> = BTreeMap::new();

    for r in rows {
        let diagnosis_id: Uuid = r.try_get("diagnosis_id").map_err(internal_row)?;
        let pet_id: Uuid = r.try_get("pet_id").map_err(internal_row)?;
        let vaccination: Option<String> = r.try_get("vaccination").map_err(internal_row)?;
        let date: NaiveDate = r.try_get("date").map_err(internal_row)?;
        let weight_kg: Option<Decimal> = r.try_get("weight_kg").map_err(internal_row)?;
        let temperature_c: Option<Decimal> = r.try_get("temperature_c").map_err(internal_row)?;
        let test: Option<String> = r.try_get("test").map_err(internal_row)?;
        let dx: Option<String> = r.try_get("dx").map_err(internal_row)?;
        let rx: Option<String> = r.try_get("rx").map_err(internal_row)?;
        let remarks: Option<String> = r.try_get("remarks").map_err(internal_row)?;
        let follow_up_date: Option<NaiveDate> = r.try_get("follow_up_date").map_err(internal_row)?;
        let created_at: DateTime<Utc> = r.try_get("created_at").map_err(internal_row)?;

        let entry = map.entry(diagnosis_id).or_insert_with(|| DiagnosisDto {
            diagnosis_id,
            pet_id,
            vaccination,
            date,
            weight_kg,
            temperature_c,
            test,
            dx,
            rx,
            remarks,
            follow_up_date,
            created_at,
            medications: vec![],
        });

        let med_id: Option<Uuid> = r.try_get("med_inventory_id").ok().flatten();
        if let Some(inventory_id) = med_id {
            let quantity: i32 = r.try_get("med_quantity").unwrap_or(1);
            let name: String = r
                .try_get("med_name")
                .unwrap_or_else(|_| "Unknown".to_string());
            entry.medications.push(MedicationDto {
                inventory_id,
                name,
                quantity,
            });
        }
    }

    Ok(Json(ApiOk {
        data: map.into_values().collect(),
    }))
}

/* ============================================================
   DELETE /diagnoses/{id}
   ============================================================ */

pub async fn delete_diagnosis(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(diagnosis_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_doctor(&auth)?;

    let res = sqlx::query(r#"DELETE FROM diagnoses WHERE diagnosis_id = $1"#)
        .bind(diagnosis_id)
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "diagnosis not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
