use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus, NewCourier, TransportType};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/status", patch(update_courier_status))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub phone: String,
    pub transport_type: TransportType,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let phone = payload.phone.trim();
    if phone.is_empty() {
        return Err(AppError::BadRequest("phone cannot be empty".to_string()));
    }

    let courier = state
        .fleet
        .register_courier(NewCourier {
            name: name.to_string(),
            phone: phone.to_string(),
            transport_type: payload.transport_type,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.fleet.couriers().await?))
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.status == CourierStatus::Busy {
        return Err(AppError::BadRequest(
            "busy is set by assignment only".to_string(),
        ));
    }

    let courier = state.fleet.set_courier_status(id, payload.status).await?;
    Ok(Json(courier))
}
