// src/routes/inventory_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, InventoryItemRow, OkData, OkResponse},
};

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctor/secretary can manage inventory".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(list_inventory).post(create_item))
        .route(
            "/inventory/{inventory_id}",
            axum::routing::put(update_item).delete(delete_item),
        )
}

#[derive(Debug, Deserialize)]
pub struct InventoryItemRequest {
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

fn validate_item(req: &InventoryItemRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() || req.category.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "name and category are required".into(),
        ));
    }
    if req.quantity < 0 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "quantity cannot be negative".into(),
        ));
    }
    if req.unit_price.is_sign_negative() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "unit_price cannot be negative".into(),
        ));
    }
    Ok(())
}

pub async fn create_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<InventoryItemRequest>,
) -> Result<Json<ApiOk<InventoryItemRow>>, ApiError> {
    ensure_staff(&auth)?;
    validate_item(&req)?;

    let row: InventoryItemRow = sqlx::query_as::<_, InventoryItemRow>(
        r#"
        INSERT INTO inventory (name, category, quantity, unit_price, expiry_date)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING inventory_id, name, category, quantity, unit_price, expiry_date,
                  created_at, updated_at
        "#,
    )
    .bind(req.name.trim())
    .bind(req.category.trim())
    .bind(req.quantity)
    .bind(req.unit_price)
    .bind(req.expiry_date)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: row }))
}

pub async fn list_inventory(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<InventoryItemRow>>>, ApiError> {
    let rows: Vec<InventoryItemRow> = sqlx::query_as::<_, InventoryItemRow>(
        r#"
        SELECT inventory_id, name, category, quantity, unit_price, expiry_date,
               created_at, updated_at
        FROM inventory
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(inventory_id): Path<Uuid>,
    Json(req): Json<InventoryItemRequest>,
) -> Result<Json<ApiOk<InventoryItemRow>>, ApiError> {
    ensure_staff(&auth)?;
    validate_item(&req)?;

    let row: Option<InventoryItemRow> = sqlx::query_as::<_, InventoryItemRow>(
        r#"
        UPDATE inventory
        SET name = $2,
            category = $3,
            quantity = $4,
            unit_price = $5,
            expiry_date = $6,
            updated_at = now()
        WHERE inventory_id = $1
        RETURNING inventory_id, name, category, quantity, unit_price, expiry_date,
                  created_at, updated_at
        "#,
    )
    .bind(inventory_id)
    .bind(req.name.trim())
    .bind(req.category.trim())
    .bind(req.quantity)
    .bind(req.unit_price)
    .bind(req.expiry_date)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound("NOT_FOUND", "inventory item not found".into()));
    };

    Ok(Json(ApiOk { data: row }))
}

pub async fn delete_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(inventory_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_staff(&auth)?;

    // Refuse while diagnosis records still reference the item; bills are
    // unaffected either way (they snapshot name and price).
    let referenced: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM diagnosis_medications
            WHERE inventory_id = $1
        )
        "#,
    )
    .bind(inventory_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if referenced {
        return Err(ApiError::BadRequest(
            "CONFLICT",
            "Cannot delete inventory item: it is referenced by diagnosis records.".into(),
        ));
    }

    let res = sqlx::query(r#"DELETE FROM inventory WHERE inventory_id = $1"#)
        .bind(inventory_id)
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "inventory item not found".into()));
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
