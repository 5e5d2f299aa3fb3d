use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::models::delivery::{AssignResult, Delivery, UnassignResult};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/unassign", post(unassign_order))
        .route("/deliveries", get(list_deliveries))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<AssignResult>, AppError> {
    Ok(Json(state.dispatcher.assign(&order_id).await?))
}

async fn unassign_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<UnassignResult>, AppError> {
    Ok(Json(state.dispatcher.unassign(&order_id).await?))
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    Ok(Json(state.fleet.deliveries().await?))
}
