//! Viewer channel for `{instance_id}_{role}` sessions.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt as _, StreamExt as _};

use super::SharedState;
use crate::session::{Attachment, HistoryRange, Inbound, Outbound};

pub(super) async fn session_socket(
    ws: WebSocketUpgrade,
    Path(session_key): Path<String>,
    Query(range): Query<HistoryRange>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_key, range))
}

async fn handle_socket(socket: WebSocket, state: SharedState, key: String, range: HistoryRange) {
    let (mut sender, mut incoming) = socket.split();

    let Attachment {
        viewer_id,
        history,
        receiver: mut live,
    } = match state.attach_viewer(&key, &range) {
        Ok(attachment) => attachment,
        Err(e) => {
            log::warn!("Refused viewer for {}: {}", key, e);
            send(&mut sender, &Outbound::error(e.message())).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    if send(&mut sender, &Outbound::HistoryLogs { logs: history }).await {
        loop {
            tokio::select! {
                outbound = live.recv() => match outbound {
                    Some(message) => {
                        if !send(&mut sender, &message).await {
                            break;
                        }
                    }
                    None => {
                        send(&mut sender, &Outbound::status("Session closed")).await;
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                inbound = incoming.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<Inbound>(&text) {
                            Ok(message) => state.handle_inbound(&key, message),
                            Err(e) => Some(Outbound::error(format!("Invalid message: {}", e))),
                        };
                        if let Some(reply) = reply {
                            if !send(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Viewer {} on {} errored: {}", viewer_id, key, e);
                        break;
                    }
                },
            }
        }
    }

    state.detach_viewer(&key, viewer_id);
}

/// Returns false once the socket is gone.
async fn send(sender: &mut SplitSink<WebSocket, Message>, message: &Outbound) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            log::error!("Failed to encode viewer message: {}", e);
            true
        }
    }
}
