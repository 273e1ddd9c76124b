// src/routes/owner_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};
use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, OkResponse, OwnerRow, PetRow},
    reminder::policy,
};

/*
Roles (vet_user.roles):
0 client
1 doctor
2 secretary
*/

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctor/secretary can manage owners and pets".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/owners", get(list_owners).post(register_owner))
        .route("/owners/{owner_id}", put(update_owner))
        .route("/pets", get(list_pets))
        .route("/pets/{pet_id}", put(update_pet))
}

/* ============================================================
   POST /owners — owner registered together with the first pet
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterOwnerRequest {
    pub owner: OwnerInput,
    pub pet: PetInput,
}

#[derive(Debug, Deserialize)]
pub struct OwnerInput {
    pub name: String,
    pub address: Option<String>,
    pub contact: String,
}

#[derive(Debug, Deserialize)]
pub struct PetInput {
    pub name: String,
    pub species: String,
    pub birthday: Option<chrono::NaiveDate>,
    pub color: Option<String>,
    pub sex: Option<String>,
    pub weight_kg: Option<Decimal>,
    pub temperature_c: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct RegisterOwnerData {
    pub owner_id: Uuid,
    pub pet_id: Uuid,
    pub pet_uid: String,
}

pub async fn register_owner(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RegisterOwnerRequest>,
) -> Result<Json<ApiOk<RegisterOwnerData>>, ApiError> {
    ensure_staff(&auth)?;

    let owner_name = req.owner.name.trim();
    let contact = req.owner.contact.trim();
    let pet_name = req.pet.name.trim();
    if owner_name.is_empty() || contact.is_empty() || pet_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "owner name, owner contact and pet name are required".into(),
        ));
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let owner_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO owners (name, address, contact, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING owner_id
        "#,
    )
    .bind(owner_name)
    .bind(req.owner.address.as_deref())
    .bind(contact)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Human-facing registry id: PET-<clinic year>-<running number>.
    let pet_count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM pets"#)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let year = policy::clinic_today(state.clinic.utc_offset_hours).year();
    let pet_uid = format!("PET-{year}-{:04}", pet_count + 1);

    let pet_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO pets
            (owner_id, pet_uid, name, species, birthday, color, sex, weight_kg, temperature_c)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING pet_id
        "#,
    )
    .bind(owner_id)
    .bind(&pet_uid)
    .bind(pet_name)
    .bind(req.pet.species.trim())
    .bind(req.pet.birthday)
    .bind(req.pet.color.as_deref())
    .bind(req.pet.sex.as_deref())
    .bind(req.pet.weight_kg)
    .bind(req.pet.temperature_c)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: RegisterOwnerData {
            owner_id,
            pet_id,
            pet_uid,
        },
    }))
}

/* ============================================================
   GET /owners, GET /pets
   ============================================================ */

pub async fn list_owners(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<OwnerRow>>>, ApiError> {
    let rows: Vec<OwnerRow> = sqlx::query_as::<_, OwnerRow>(
        r#"
        SELECT owner_id, name, address, contact, created_at, updated_at
        FROM owners
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn list_pets(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<PetRow>>>, ApiError> {
    let rows: Vec<PetRow> = sqlx::query_as::<_, PetRow>(
        r#"
        SELECT pet_id, owner_id, pet_uid, name, species, birthday, color, sex,
               weight_kg, temperature_c, created_at, updated_at
        FROM pets
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   PUT /owners/{id}, PUT /pets/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateOwnerRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub contact: Option<String>,
}

pub async fn update_owner(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(owner_id): Path<Uuid>,
    Json(req): Json<UpdateOwnerRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_staff(&auth)?;

    if let Some(contact) = req.contact.as_deref() {
        if contact.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "contact cannot be empty".into(),
            ));
        }
    }

    let res = sqlx::query(
        r#"
        UPDATE owners
        SET name    = COALESCE($2, name),
            address = COALESCE($3, address),
            contact = COALESCE($4, contact),
            updated_at = now()
        WHERE owner_id = $1
        "#,
    )
    .bind(owner_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.address.as_deref())
    .bind(req.contact.as_deref().map(str::trim))
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "owner not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePetRequest {
    pub name: Option<String>,
    pub species: Option<String>,
    pub birthday: Option<chrono::NaiveDate>,
    pub color: Option<String>,
    pub sex: Option<String>,
    pub weight_kg: Option<Decimal>,
    pub temperature_c: Option<Decimal>,
}

pub async fn update_pet(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(pet_id): Path<Uuid>,
    Json(req): Json<UpdatePetRequest>,
) -> Result<Json<ApiOk<PetRow>>, ApiError> {
    ensure_staff(&auth)?;

    let row = sqlx::query(
        r#"
        UPDATE pets
        SET name          = COALESCE($2, name),
            species       = COALESCE($3, species),
            birthday      = COALESCE($4, birthday),
            color         = COALESCE($5, color),
            sex           = COALESCE($6, sex),
            weight_kg     = COALESCE($7, weight_kg),
            temperature_c = COALESCE($8, temperature_c),
            updated_at = now()
        WHERE pet_id = $1
        RETURNING pet_id
        "#,
    )
    .bind(pet_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.species.as_deref().map(str::trim))
    .bind(req.birthday)
    .bind(req.color.as_deref())
    .bind(req.sex.as_deref())
    .bind(req.weight_kg)
    .bind(req.temperature_c)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound("NOT_FOUND", "pet not found".into()));
    };
    let pet_id: Uuid = row
        .try_get("pet_id")
        .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;

    let pet: PetRow = sqlx::query_as::<_, PetRow>(
        r#"
        SELECT pet_id, owner_id, pet_uid, name, species, birthday, color, sex,
               weight_kg, temperature_c, created_at, updated_at
        FROM pets
        WHERE pet_id = $1
        "#,
    )
    .bind(pet_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: pet }))
}
