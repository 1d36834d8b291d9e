//! Online/offline transitions: registry membership, the stored flag that
//! mirrors it, and the presence broadcast.

use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use cloak_db::Database;

use crate::registry::{ConnectionRegistry, SocketHandle, SocketId};

/// Rewrites allowed while the registry keeps changing under us. Any
/// connect/disconnect that lands later runs its own sync.
const MAX_SYNC_ATTEMPTS: usize = 4;

/// Register a socket. A user's first socket flips them online.
pub async fn join(
    registry: &ConnectionRegistry,
    db: &Arc<Database>,
    socket: SocketHandle,
    username: &str,
) -> SocketId {
    let id = socket.id();
    if registry.connect(socket, username) {
        sync_presence(registry, db, id.user_id).await;
        registry.broadcast_presence(id.user_id, username, true);
    }
    id
}

/// Drop a socket. Removing a user's last socket flips them offline.
pub async fn leave(
    registry: &ConnectionRegistry,
    db: &Arc<Database>,
    socket: SocketId,
    username: &str,
) {
    let went_offline = registry.disconnect(socket);

    // A failed fan-out send may already have removed this socket (and
    // announced the user offline), so the flag is synced either way.
    if went_offline || !registry.is_online(socket.user_id) {
        sync_presence(registry, db, socket.user_id).await;
    }
    if went_offline {
        registry.broadcast_presence(socket.user_id, username, false);
    }
}

/// Bring the stored online flag in line with the registry.
///
/// The value written is read from the registry, and re-read after the
/// write: a connect or disconnect that raced the write gets it redone.
pub async fn sync_presence(registry: &ConnectionRegistry, db: &Arc<Database>, user_id: Uuid) {
    for _ in 0..MAX_SYNC_ATTEMPTS {
        let online = registry.is_online(user_id);
        let db = db.clone();
        let uid = user_id.to_string();
        let result = tokio::task::spawn_blocking(move || db.set_user_online(&uid, online)).await;

        match result {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!("Presence update for unknown user {}", user_id);
                return;
            }
            Ok(Err(e)) => {
                warn!("Failed to store presence for {}: {}", user_id, e);
                return;
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                return;
            }
        }

        if registry.is_online(user_id) == online {
            return;
        }
    }
    warn!("Presence for {} still changing after {} writes", user_id, MAX_SYNC_ATTEMPTS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_types::events::GatewayEvent;
    use tokio::sync::mpsc;

    fn setup() -> (ConnectionRegistry, Arc<Database>, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "ayse", "sender88", b"png").unwrap();
        (ConnectionRegistry::new(), db, user)
    }

    fn stored_flag(db: &Database, user: Uuid) -> bool {
        db.get_user_by_id(&user.to_string()).unwrap().unwrap().is_online
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status(user_id: Uuid, is_online: bool) -> GatewayEvent {
        GatewayEvent::Status {
            user_id,
            username: "ayse".into(),
            is_online,
        }
    }

    #[tokio::test]
    async fn flag_and_broadcast_follow_first_and_last_socket() {
        let (registry, db, user) = setup();
        let watcher = Uuid::new_v4();
        let (watcher_socket, mut watcher_rx) = SocketHandle::new(watcher);
        registry.connect(watcher_socket, "bora");

        let (phone, _phone_rx) = SocketHandle::new(user);
        let (laptop, _laptop_rx) = SocketHandle::new(user);

        let phone = join(&registry, &db, phone, "ayse").await;
        assert!(stored_flag(&db, user));
        assert_eq!(drain(&mut watcher_rx), vec![status(user, true)]);

        let laptop = join(&registry, &db, laptop, "ayse").await;
        assert!(drain(&mut watcher_rx).is_empty());

        leave(&registry, &db, phone, "ayse").await;
        assert!(stored_flag(&db, user));
        assert!(drain(&mut watcher_rx).is_empty());

        leave(&registry, &db, laptop, "ayse").await;
        assert!(!stored_flag(&db, user));
        assert_eq!(drain(&mut watcher_rx), vec![status(user, false)]);
    }

    #[tokio::test]
    async fn stale_offline_write_is_corrected() {
        let (registry, db, user) = setup();
        let (socket, _rx) = SocketHandle::new(user);
        join(&registry, &db, socket, "ayse").await;

        // What a departing socket's late write leaves behind.
        db.set_user_online(&user.to_string(), false).unwrap();

        sync_presence(&registry, &db, user).await;
        assert!(stored_flag(&db, user));
    }

    #[tokio::test]
    async fn leave_after_send_failure_still_clears_flag() {
        let (registry, db, user) = setup();
        let (socket, rx) = SocketHandle::new(user);
        let id = join(&registry, &db, socket, "ayse").await;

        // Fan-out prunes the dead socket before its own task cleans up.
        drop(rx);
        registry.send_to(user, &GatewayEvent::Pong);
        assert!(!registry.is_online(user));
        assert!(stored_flag(&db, user));

        leave(&registry, &db, id, "ayse").await;
        assert!(!stored_flag(&db, user));
    }

    #[tokio::test]
    async fn racing_join_and_leave_settle_on_registry_state() {
        let (registry, db, user) = setup();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                let (socket, _rx) = SocketHandle::new(user);
                let id = join(&registry, &db, socket, "ayse").await;
                tokio::task::yield_now().await;
                leave(&registry, &db, id, "ayse").await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let (socket, _rx) = SocketHandle::new(user);
        join(&registry, &db, socket, "ayse").await;
        assert!(registry.is_online(user));
        assert!(stored_flag(&db, user));
    }
}
