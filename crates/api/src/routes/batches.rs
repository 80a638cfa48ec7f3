//! Batch endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDate;
use domain::{ChangeBatchQuantity, CreateBatch};
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct AddBatchRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub sku: String,
    pub qty: u32,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeBatchQuantityRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub qty: u32,
}

/// POST /add_batch — registers a new batch of stock.
#[tracing::instrument(skip(state, req), fields(reference = %req.reference, sku = %req.sku))]
pub async fn add_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddBatchRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    state
        .bus
        .handle(CreateBatch::new(req.reference, req.sku, req.qty, req.eta))
        .await?;
    Ok((StatusCode::CREATED, "OK"))
}

/// POST /change_batch_quantity — sets a batch's purchased quantity.
///
/// Lines that no longer fit are deallocated and reallocated in the same
/// request.
#[tracing::instrument(skip(state, req), fields(reference = %req.reference, qty = req.qty))]
pub async fn change_batch_quantity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangeBatchQuantityRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    state
        .bus
        .handle(ChangeBatchQuantity::new(req.reference, req.qty))
        .await?;
    Ok((StatusCode::OK, "OK"))
}
