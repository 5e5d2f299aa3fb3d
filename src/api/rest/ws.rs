use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.fleet.subscribe();

    info!("websocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let assigned = match rx.recv().await {
                Ok(assigned) => assigned,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ws client lagging; dropped assignment events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&assigned) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize assignment for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    first_to_finish(send_task, recv_task).await;

    info!("websocket client disconnected");
}

/// Waits for either task, then aborts the other and waits for it to drop.
async fn first_to_finish(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    let a_finished = tokio::select! {
        _ = &mut a => true,
        _ = &mut b => false,
    };
    let loser = if a_finished { b } else { a };
    loser.abort();
    let _ = loser.await;
}
