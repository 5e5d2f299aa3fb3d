use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::models::order::OrderEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events/orders", post(publish_order_event))
}

/// Accepts an order lifecycle event for asynchronous processing. Waits for
/// queue capacity rather than dropping the event.
async fn publish_order_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<OrderEvent>,
) -> Result<StatusCode, AppError> {
    if event.order_id.trim().is_empty() {
        return Err(AppError::BadRequest("order_id cannot be empty".to_string()));
    }

    let order_id = event.order_id.clone();
    state
        .events_tx
        .send(event)
        .await
        .map_err(|_| AppError::Internal("order event processor is not running".to_string()))?;
    state.metrics.order_events_in_queue.inc();
    tracing::debug!(order_id = %order_id, "order event queued");

    Ok(StatusCode::ACCEPTED)
}
