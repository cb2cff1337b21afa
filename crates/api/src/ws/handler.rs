use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use pmdash_core::types::DbId;
use serde::Deserialize;
use serde_json::json;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;
use crate::ws::manager::WsManager;

/// Messages a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    JoinProject {
        #[serde(alias = "projectId")]
        project_id: DbId,
    },
    LeaveProject {
        #[serde(alias = "projectId")]
        project_id: DbId,
    },
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The client authenticates with a bearer header or the `access_token`
/// query parameter before the upgrade is accepted. It then receives the
/// `task_update` messages for its own tasks and for every project room it
/// joins.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    user: AuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, user, state.ws_manager))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), registers
/// the connection, forwards channel messages to the sink from a spawned
/// task, and handles room requests on the current task until disconnect.
async fn handle_socket(socket: WebSocket, user: AuthUser, ws_manager: Arc<WsManager>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, user_id = user.user_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone(), user.user_id).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Text(text)) => {
                let reply = handle_client_message(&ws_manager, &conn_id, text.as_str()).await;
                ws_manager
                    .send_to_connection(&conn_id, Message::Text(reply.to_string().into()))
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Apply one inbound message and build the acknowledgement.
async fn handle_client_message(
    ws_manager: &WsManager,
    conn_id: &str,
    text: &str,
) -> serde_json::Value {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::JoinProject { project_id }) => {
            ws_manager.join_project(conn_id, project_id).await;
            tracing::debug!(conn_id, project_id, "Joined project room");
            json!({"type": "joined_project", "project_id": project_id})
        }
        Ok(ClientMessage::LeaveProject { project_id }) => {
            let was_member = ws_manager.leave_project(conn_id, project_id).await;
            tracing::debug!(conn_id, project_id, was_member, "Left project room");
            json!({"type": "left_project", "project_id": project_id})
        }
        Err(e) => json!({"type": "error", "error": format!("Unrecognized message: {e}")}),
    }
}
