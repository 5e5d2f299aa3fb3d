use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&request);

    if !state.limiter.allow(&key) {
        state.metrics.rate_limited_total.inc();
        debug!(client = %key, path = %request.uri().path(), "request rate limited");
        return Err(AppError::TooManyRequests);
    }

    Ok(next.run(request).await)
}

/// Peer IP from the connection, else the first `X-Forwarded-For` hop.
pub fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
