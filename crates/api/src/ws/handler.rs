use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};

use crate::error::AppResult;
use crate::routes::jobs::validate_job_id;
use crate::state::AppState;
use crate::ws::heartbeat;

/// HTTP handler that upgrades the connection to a progress socket for one job.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    validate_job_id(&job_id)?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, job_id, state))
        .into_response())
}

/// Serve one progress socket.
///
/// The connection subscribes to the bus, so its first frames are the job's
/// recent history, followed by live events as JSON text frames. Inbound
/// frames other than Close are ignored. The listener is removed on
/// disconnect, and the socket is closed if the bus drops a listener that
/// fell behind.
async fn handle_socket(socket: WebSocket, job_id: String, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut subscription = state.bus.subscribe(&job_id).await;
    let handle = subscription.handle();
    tracing::info!(
        conn_id = %conn_id,
        job_id = %job_id,
        replay = subscription.backlog().len(),
        "Progress socket connected",
    );

    let (mut sink, mut stream) = socket.split();
    let mut ping = heartbeat(state.config.heartbeat_interval);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    tracing::debug!(conn_id = %conn_id, "Listener dropped by bus, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id, error = %e, "Failed to encode progress event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                    break;
                }
                if event.event_type.is_terminal() {
                    tracing::debug!(
                        conn_id = %conn_id,
                        job_id = %job_id,
                        event = %event.event_type,
                        "Job stream ended",
                    );
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.bus.unsubscribe(&handle).await;
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Progress socket disconnected");
}
