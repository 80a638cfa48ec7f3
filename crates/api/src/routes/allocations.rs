//! Allocation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Allocate, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
}

#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    pub batchref: String,
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub sku: String,
    pub batchref: String,
}

/// POST /allocate — allocates an order line to the preferred batch.
#[tracing::instrument(skip(state, req), fields(order_id = %req.orderid, sku = %req.sku))]
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AllocateRequest>,
) -> Result<(StatusCode, Json<AllocateResponse>), ApiError> {
    let results = state
        .bus
        .handle(Allocate::new(req.orderid, req.sku.as_str(), req.qty))
        .await?;

    match results.into_iter().next().flatten() {
        Some(reference) => Ok((
            StatusCode::CREATED,
            Json(AllocateResponse {
                batchref: reference.to_string(),
            }),
        )),
        None => Err(ApiError::BadRequest(format!("Out of stock for sku {}", req.sku))),
    }
}

/// GET /allocations/{orderid} — lists where an order's lines were allocated.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<AllocationResponse>>, ApiError> {
    let rows = state
        .allocations
        .allocations_for(&OrderId::new(order_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if rows.is_empty() {
        return Err(ApiError::NotFound("not found".to_string()));
    }

    Ok(Json(
        rows.into_iter()
            .map(|row| AllocationResponse {
                sku: row.sku.to_string(),
                batchref: row.batch_reference.to_string(),
            })
            .collect(),
    ))
}
