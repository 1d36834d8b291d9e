use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use cloak_db::Database;
use cloak_types::events::{GatewayCommand, GatewayEvent};

use crate::presence;
use crate::registry::{ConnectionRegistry, SocketHandle};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so we go
/// straight to Ready + event loop.
pub async fn handle_connection(
    socket: WebSocket,
    registry: ConnectionRegistry,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    // Register before the snapshot: any presence flip after this point is
    // queued for the socket and arrives after the snapshot.
    let (handle, user_rx) = SocketHandle::new(user_id);
    let socket_id = presence::join(&registry, &db, handle, &username).await;

    if send_greeting(&mut sender, &registry, user_id, &username).await {
        run_connection_loop(sender, receiver, user_rx, user_id, &username).await;
    }

    presence::leave(&registry, &db, socket_id, &username).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Ready, then a status event for everyone else already online.
async fn send_greeting(
    sender: &mut SplitSink<WebSocket, Message>,
    registry: &ConnectionRegistry,
    user_id: Uuid,
    username: &str,
) -> bool {
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.to_string(),
    };
    if !send_event(sender, &ready).await {
        return false;
    }

    for event in online_snapshot(registry, user_id) {
        if !send_event(sender, &event).await {
            return false;
        }
    }
    true
}

/// A status event for every online user other than `user_id`.
fn online_snapshot(registry: &ConnectionRegistry, user_id: Uuid) -> Vec<GatewayEvent> {
    registry
        .online_users()
        .into_iter()
        .filter(|(uid, _)| *uid != user_id)
        .map(|(uid, uname)| GatewayEvent::Status {
            user_id: uid,
            username: uname,
            is_online: true,
        })
        .collect()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    user_id: Uuid,
    username: &str,
) {
    // Replies are written by the send task; the recv task only queues them.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward registry events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    // None: the registry dropped this socket (logout or failed send)
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Some(reply) = reply_rx.recv() => {
                    if !send_event(&mut sender, &reply).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match reply_to(text.as_str()) {
                    Some(reply) => {
                        trace!("{} ({}) ping", username_recv, user_id);
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(
                            "{} ({}) ignored frame: {}",
                            username_recv,
                            user_id,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Serialize and write one event. Returns false once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

/// The reply to a client text frame, if it warrants one. Only `ping` does.
fn reply_to(text: &str) -> Option<GatewayEvent> {
    match serde_json::from_str::<GatewayCommand>(text) {
        Ok(GatewayCommand::Ping) => Some(GatewayEvent::Pong),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_socket_queues_flips_behind_snapshot() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConnectionRegistry::new();
        let (ayse, bora) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(&ayse.to_string(), "ayse", "sender88", b"png").unwrap();
        db.create_user(&bora.to_string(), "bora", "receive8", b"png").unwrap();

        let (bora_socket, _bora_rx) = SocketHandle::new(bora);
        let bora_id = presence::join(&registry, &db, bora_socket, "bora").await;

        let (ayse_socket, mut ayse_rx) = SocketHandle::new(ayse);
        presence::join(&registry, &db, ayse_socket, "ayse").await;

        let snapshot = online_snapshot(&registry, ayse);
        let bora_online = GatewayEvent::Status {
            user_id: bora,
            username: "bora".into(),
            is_online: true,
        };
        assert_eq!(snapshot, vec![bora_online]);

        // A flip between registration and the snapshot write is not lost.
        presence::leave(&registry, &db, bora_id, "bora").await;
        let mut queued = Vec::new();
        while let Ok(event) = ayse_rx.try_recv() {
            queued.push(event);
        }
        assert!(queued.contains(&GatewayEvent::Status {
            user_id: bora,
            username: "bora".into(),
            is_online: false,
        }));
    }

    #[test]
    fn ping_gets_pong() {
        assert_eq!(reply_to(r#"{"type":"ping"}"#), Some(GatewayEvent::Pong));
    }

    #[test]
    fn other_frames_are_ignored() {
        assert_eq!(reply_to(r#"{"type":"typing","to":"bora"}"#), None);
        assert_eq!(reply_to("ping"), None);
        assert_eq!(reply_to(""), None);
    }
}
