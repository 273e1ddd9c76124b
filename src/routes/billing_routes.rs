// src/routes/billing_routes.rs

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, BillStatus, OkData, OkResponse},
    pricing::{self, PriceSnapshot, RequestedItem},
};

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctor/secretary can manage billing".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/billing", get(list_bills).post(create_bill))
        .route("/billing/{bill_id}", get(get_bill).put(update_bill_status))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct BillDto {
    pub bill_id: Uuid,
    pub pet_id: Uuid,
    pub diagnosis_id: Option<Uuid>,
    pub consultation_fee: Decimal,
    pub total_cost: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<BillItemDto>,
}

#[derive(Debug, Serialize)]
pub struct BillItemDto {
    pub inventory_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/* ============================================================
   POST /billing
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateBillRequest {
    pub pet_id: Uuid,
    pub diagnosis_id: Option<Uuid>,
    pub consultation_fee: Decimal,
    #[serde(default)]
    pub items: Vec<BillItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct BillItemInput {
    pub inventory_id: Uuid,
    pub quantity: i32,
}

pub async fn create_bill(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateBillRequest>,
) -> Result<Json<ApiOk<BillDto>>, ApiError> {
    ensure_staff(&auth)?;

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

    // Current unit prices and display names; the bill snapshots these and
    // never re-reads them.
    let requested: Vec<RequestedItem> = req
        .items
        .iter()
        .map(|i| RequestedItem {
            inventory_id: i.inventory_id,
            quantity: i.quantity,
        })
        .collect();

    let ids: Vec<Uuid> = requested.iter().map(|i| i.inventory_id).collect();
    let price_rows = sqlx::query(
        r#"
        SELECT inventory_id, name, unit_price
        FROM inventory
        WHERE inventory_id = ANY($1)
        "#,
    )
    .bind(&ids)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let mut prices: HashMap<Uuid, PriceSnapshot> = HashMap::with_capacity(price_rows.len());
    for r in price_rows {
        let inventory_id: Uuid = r
            .try_get("inventory_id")
            .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;
        let name: String = r
            .try_get("name")
            .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;
        let unit_price: Decimal = r
            .try_get("unit_price")
            .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;
        prices.insert(inventory_id, PriceSnapshot { name, unit_price });
    }

    let priced = pricing::compute_bill(
        req.consultation_fee,
        &requested,
        &prices,
        state.legacy_unknown_items,
    )
    .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e.to_string()))?;

    // Header and line items commit as one unit; a failed item insert rolls
    // the header back.
    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let row = sqlx::query(
        r#"
        INSERT INTO billing (pet_id, diagnosis_id, consultation_fee, total_cost, status)
        VALUES ($1, $2, $3, $4, 'unpaid')
        RETURNING bill_id, created_at
        "#,
    )
    .bind(req.pet_id)
    .bind(req.diagnosis_id)
    .bind(req.consultation_fee)
    .bind(priced.total)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("BILL_CREATE_FAILED", format!("{e}")))?;

    let bill_id: Uuid = row
        .try_get("bill_id")
        .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;

    for line in &priced.line_items {
        sqlx::query(
            r#"
            INSERT INTO billing_items (bill_id, inventory_id, name, quantity, unit_price, subtotal)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(bill_id)
        .bind(line.inventory_id)
        .bind(&line.name)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.subtotal)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: BillDto {
            bill_id,
            pet_id: req.pet_id,
            diagnosis_id: req.diagnosis_id,
            consultation_fee: req.consultation_fee,
            total_cost: priced.total,
            status: BillStatus::Unpaid.as_str().to_string(),
            created_at,
            items: priced
                .line_items
                .into_iter()
                .map(|l| BillItemDto {
                    inventory_id: l.inventory_id,
                    name: l.name,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    subtotal: l.subtotal,
                })
                .collect(),
        },
    }))
}

/* ============================================================
   GET /billing, GET /billing/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BillListQuery {
    pub pet_id: Option<Uuid>,
    pub status: Option<String>,
}

pub async fn list_bills(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<BillListQuery>,
) -> Result<Json<ApiOk<Vec<BillDto>>>, ApiError> {
    let status = match q.status.as_deref() {
        Some(s) => Some(BillStatus::parse(s).ok_or_else(|| {
            ApiError::BadRequest("VALIDATION_ERROR", "status must be unpaid or paid".into())
        })?),
        None => None,
    };

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        r#"
        SELECT
          b.bill_id,
          b.pet_id,
          b.diagnosis_id,
          b.consultation_fee,
          b.total_cost,
          b.status,
          b.created_at,

          bi.inventory_id AS item_inventory_id,
          bi.name AS item_name,
          bi.quantity AS item_quantity,
          bi.unit_price AS item_unit_price,
          bi.subtotal AS item_subtotal

        FROM billing b
        LEFT JOIN billing_items bi ON bi.bill_id = b.bill_id
        WHERE 1=1
        "#,
    );

    if let Some(pet_id) = q.pet_id {
        qb.push(" AND b.pet_id = ");
        qb.push_bind(pet_id);
    }
    if let Some(status) = status {
        qb.push(" AND b.status = ");
        qb.push_bind(status.as_str());
    }

    qb.push(" ORDER BY b.created_at DESC ");

    let rows = qb
        .build()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: fold_rows_into_bills(rows)?,
    }))
}

pub async fn get_bill(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<ApiOk<BillDto>>, ApiError> {
    let rows = sqlx::query(
        r#"
        SELECT
          b.bill_id,
          b.pet_id,
          b.diagnosis_id,
          b.consultation_fee,
          b.total_cost,
          b.status,
          b.created_at,

          bi.inventory_id AS item_inventory_id,
          bi.name AS item_name,
          bi.quantity AS item_quantity,
          bi.unit_price AS item_unit_price,
          bi.subtotal AS item_subtotal

        FROM billing b
        LEFT JOIN billing_items bi ON bi.bill_id = b.bill_id
        WHERE b.bill_id = $1
        "#,
    )
    .bind(bill_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if rows.is_empty() {
        return Err(ApiError::NotFound("NOT_FOUND", "bill not found".into()));
    }

    let bills = fold_rows_into_bills(rows)?;
    let bill = bills.into_iter().next().unwrap();

    Ok(Json(ApiOk { data: bill }))
}

/* ============================================================
   PUT /billing/{id} — status-only update
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateBillStatusRequest {
    pub status: String,
}

pub async fn update_bill_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(bill_id): Path<Uuid>,
    Json(req): Json<UpdateBillStatusRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_staff(&auth)?;

    let requested = BillStatus::parse(req.status.trim()).ok_or_else(|| {
        ApiError::BadRequest("VALIDATION_ERROR", "status must be unpaid or paid".into())
    })?;

    let current: Option<String> =
        sqlx::query_scalar(r#"SELECT status FROM billing WHERE bill_id = $1"#)
            .bind(bill_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current) = current else {
        return Err(ApiError::NotFound("NOT_FOUND", "bill not found".into()));
    };

    // Forward-only: unpaid -> paid, plus the idempotent no-op on an
    // already-paid bill. Everything else is refused.
    let Some(next) = BillStatus::from_db(&current).apply(requested) else {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "a paid bill cannot go back to unpaid".into(),
        ));
    };

    sqlx::query(r#"UPDATE billing SET status = $2 WHERE bill_id = $1"#)
        .bind(bill_id)
        .bind(next.as_str())
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/* ============================================================
   Helper: fold joined rows into bills with their line items
   ============================================================ */

fn fold_rows_into_bills(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<BillDto>, ApiError> {
    use std::collections::BTreeMap;

    let mut map: BTreeMap<Uuid, BillDto> = BTreeMap::new();

    for r in rows {
        let bill_id: Uuid = r.try_get("bill_id").map_err(internal_row)?;
        let pet_id: Uuid = r.try_get("pet_id").map_err(internal_row)?;
        let diagnosis_id: Option<Uuid> = r.try_get("diagnosis_id").map_err(internal_row)?;
        let consultation_fee: Decimal = r.try_get("consultation_fee").map_err(internal_row)?;
        let total_cost: Decimal = r.try_get("total_cost").map_err(internal_row)?;
        let status: String = r.try_get("status").map_err(internal_row)?;
        let created_at: DateTime<Utc> = r.try_get("created_at").map_err(internal_row)?;

        let entry = map.entry(bill_id).or_insert_with(|| BillDto {
            bill_id,
            pet_id,
            diagnosis_id,
            consultation_fee,
            total_cost,
            status: BillStatus::from_db(&status).as_str().to_string(),
            created_at,
            items: vec![],
        });

        // line item columns are NULL for bills without items
        let item_name: Option<String> = r.try_get("item_name").ok().flatten();
        if let Some(name) = item_name {
            let inventory_id: Option<Uuid> = r.try_get("item_inventory_id").ok().flatten();
            let quantity: i32 = r.try_get("item_quantity").unwrap_or(0);
            let unit_price: Decimal = r.try_get("item_unit_price").unwrap_or_default();
            let subtotal: Decimal = r.try_get("item_subtotal").unwrap_or_default();
            entry.items.push(BillItemDto {
                inventory_id,
                name,
                quantity,
                unit_price,
                subtotal,
            });
        }
    }

    Ok(map.into_values().collect())
}

fn internal_row(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("row decode error: {e}"))
}
