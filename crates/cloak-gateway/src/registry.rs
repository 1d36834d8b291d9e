use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use cloak_types::events::GatewayEvent;

/// A send to a socket whose connection task has already gone away.
#[derive(Debug, Error)]
#[error("socket {} of user {} is closed", .0.conn_id, .0.user_id)]
pub struct SocketSendFailure(pub SocketId);

/// Identity of one socket, without the ability to send to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId {
    pub conn_id: Uuid,
    pub user_id: Uuid,
}

/// Opaque handle to one live socket.
///
/// Events pushed through the handle are queued on an unbounded channel
/// drained by that socket's connection task, so each socket sees events in
/// send-call order. The registry owns the only handle: once it drops it,
/// the queue closes and the connection task winds down.
#[derive(Debug)]
pub struct SocketHandle {
    id: SocketId,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl SocketHandle {
    /// Create a handle for `user_id` and the receiver its connection task drains.
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SocketId {
            conn_id: Uuid::new_v4(),
            user_id,
        };
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn send(&self, event: GatewayEvent) -> Result<(), SocketSendFailure> {
        self.tx.send(event).map_err(|_| SocketSendFailure(self.id))
    }
}

struct UserSockets {
    username: String,
    /// Connect order; no duplicates by `conn_id`.
    sockets: Vec<SocketHandle>,
}

/// Tracks every live socket per user and fans events out to them.
///
/// A user is online iff they have an entry, and an entry is removed the
/// moment its last socket goes, so presence is a membership test. All
/// mutation of one user's sockets happens under that user's map entry lock;
/// there is no registry-wide lock.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, UserSockets>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket. Returns true if this was the user's first socket
    /// (they just came online).
    pub fn connect(&self, socket: SocketHandle, username: &str) -> bool {
        let id = socket.id();
        let mut entry = self.inner.entry(id.user_id).or_insert_with(|| UserSockets {
            username: username.to_string(),
            sockets: Vec::new(),
        });

        let came_online = entry.sockets.is_empty();
        if !entry.sockets.iter().any(|s| s.id.conn_id == id.conn_id) {
            entry.sockets.push(socket);
        }
        debug!(
            "registry: {} ({}) now has {} socket(s)",
            entry.username,
            id.user_id,
            entry.sockets.len()
        );
        came_online
    }

    /// Remove a socket. Returns true if this call removed the user's last
    /// socket (they just went offline).
    pub fn disconnect(&self, socket: SocketId) -> bool {
        let mut removed = false;
        let emptied = self
            .inner
            .remove_if_mut(&socket.user_id, |_, entry| {
                let before = entry.sockets.len();
                entry.sockets.retain(|s| s.id.conn_id != socket.conn_id);
                removed = entry.sockets.len() != before;
                entry.sockets.is_empty()
            })
            .is_some();

        removed && emptied
    }

    /// Drop every socket of a user. Returns their username if they were online.
    pub fn disconnect_user(&self, user_id: Uuid) -> Option<String> {
        self.inner.remove(&user_id).map(|(_, entry)| entry.username)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.contains_key(&user_id)
    }

    pub fn socket_count(&self, user_id: Uuid) -> usize {
        self.inner.get(&user_id).map_or(0, |entry| entry.sockets.len())
    }

    /// Get list of online users.
    pub fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .iter()
            .map(|entry| (*entry.key(), entry.username.clone()))
            .collect()
    }

    /// Deliver `event` to every live socket of `user_id`. Returns how many
    /// sockets accepted it.
    ///
    /// A socket that fails is disconnected and delivery carries on with the
    /// rest; nothing is retried. If that leaves the user with no sockets,
    /// an offline presence event goes out.
    pub fn send_to(&self, user_id: Uuid, event: &GatewayEvent) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        let username = {
            let Some(entry) = self.inner.get(&user_id) else {
                return 0;
            };
            for socket in &entry.sockets {
                match socket.send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("Dropping socket after failed send: {}", e);
                        failed.push(socket.id());
                    }
                }
            }
            entry.username.clone()
        };

        for socket in failed {
            if self.disconnect(socket) {
                self.broadcast_presence(user_id, &username, false);
            }
        }

        delivered
    }

    /// Send a presence event to every connected user, the subject included.
    pub fn broadcast_presence(&self, user_id: Uuid, username: &str, online: bool) {
        let event = GatewayEvent::Status {
            user_id,
            username: username.to_string(),
            is_online: online,
        };

        // Collect first: send_to takes entry locks of its own.
        let recipients: Vec<Uuid> = self.inner.iter().map(|entry| *entry.key()).collect();
        for recipient in recipients {
            self.send_to(recipient, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn connect_then_disconnect_goes_offline() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (socket, _rx) = SocketHandle::new(user);
        let id = socket.id();

        assert!(!registry.is_online(user));
        assert!(registry.connect(socket, "ayse"));
        assert!(registry.is_online(user));

        assert!(registry.disconnect(id));
        assert!(!registry.is_online(user));
        assert_eq!(registry.socket_count(user), 0);
        assert!(registry.online_users().is_empty());

        // second disconnect of the same socket is a no-op
        assert!(!registry.disconnect(id));
    }

    #[test]
    fn multiple_sockets_per_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (phone, _phone_rx) = SocketHandle::new(user);
        let (laptop, _laptop_rx) = SocketHandle::new(user);
        let (phone_id, laptop_id) = (phone.id(), laptop.id());

        assert!(registry.connect(phone, "ayse"));
        assert!(!registry.connect(laptop, "ayse"));
        assert_eq!(registry.socket_count(user), 2);
        assert_eq!(registry.online_users(), vec![(user, "ayse".to_string())]);

        assert!(!registry.disconnect(phone_id));
        assert!(registry.is_online(user));
        assert!(registry.disconnect(laptop_id));
        assert!(!registry.is_online(user));
    }

    #[test]
    fn send_to_reaches_every_socket_in_order() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (a, mut a_rx) = SocketHandle::new(user);
        let (b, mut b_rx) = SocketHandle::new(user);
        registry.connect(a, "ayse");
        registry.connect(b, "ayse");

        assert_eq!(registry.send_to(user, &GatewayEvent::Pong), 2);
        let status = GatewayEvent::Status {
            user_id: user,
            username: "ayse".into(),
            is_online: true,
        };
        assert_eq!(registry.send_to(user, &status), 2);

        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(drain(rx), vec![GatewayEvent::Pong, status.clone()]);
        }

        assert_eq!(registry.send_to(Uuid::new_v4(), &GatewayEvent::Pong), 0);
    }

    #[test]
    fn failed_socket_is_dropped_and_others_still_receive() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (dead, dead_rx) = SocketHandle::new(user);
        let (live, mut live_rx) = SocketHandle::new(user);
        registry.connect(dead, "ayse");
        registry.connect(live, "ayse");
        drop(dead_rx);

        assert_eq!(registry.send_to(user, &GatewayEvent::Pong), 1);
        assert_eq!(registry.socket_count(user), 1);
        assert!(registry.is_online(user));
        assert_eq!(drain(&mut live_rx), vec![GatewayEvent::Pong]);
    }

    #[test]
    fn losing_last_socket_on_send_broadcasts_offline() {
        let registry = ConnectionRegistry::new();
        let ayse = Uuid::new_v4();
        let bora = Uuid::new_v4();
        let (ayse_socket, ayse_rx) = SocketHandle::new(ayse);
        let (bora_socket, mut bora_rx) = SocketHandle::new(bora);
        registry.connect(ayse_socket, "ayse");
        registry.connect(bora_socket, "bora");
        drop(ayse_rx);

        assert_eq!(registry.send_to(ayse, &GatewayEvent::Pong), 0);
        assert!(!registry.is_online(ayse));
        assert_eq!(
            drain(&mut bora_rx),
            vec![GatewayEvent::Status {
                user_id: ayse,
                username: "ayse".into(),
                is_online: false,
            }]
        );
    }

    #[test]
    fn presence_reaches_everyone_including_subject() {
        let registry = ConnectionRegistry::new();
        let ayse = Uuid::new_v4();
        let bora = Uuid::new_v4();
        let (ayse_socket, mut ayse_rx) = SocketHandle::new(ayse);
        let (bora_socket, mut bora_rx) = SocketHandle::new(bora);
        registry.connect(ayse_socket, "ayse");
        registry.connect(bora_socket, "bora");

        registry.broadcast_presence(ayse, "ayse", true);

        let expected = GatewayEvent::Status {
            user_id: ayse,
            username: "ayse".into(),
            is_online: true,
        };
        assert_eq!(drain(&mut ayse_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut bora_rx), vec![expected]);
    }

    #[test]
    fn disconnect_user_closes_every_queue() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (a, mut a_rx) = SocketHandle::new(user);
        let (b, mut b_rx) = SocketHandle::new(user);
        registry.connect(a, "ayse");
        registry.connect(b, "ayse");

        assert_eq!(registry.disconnect_user(user).as_deref(), Some("ayse"));
        assert!(!registry.is_online(user));
        assert!(matches!(a_rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(matches!(b_rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(registry.disconnect_user(user), None);
    }

    #[tokio::test]
    async fn concurrent_senders_all_deliver() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (socket, mut rx) = SocketHandle::new(user);
        registry.connect(socket, "ayse");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..8 {
                    assert_eq!(registry.send_to(user, &GatewayEvent::Pong), 1);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(drain(&mut rx).len(), 16 * 8);
        assert_eq!(registry.socket_count(user), 1);
    }

    #[tokio::test]
    async fn concurrent_connects_and_disconnects_settle() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (socket, _rx) = SocketHandle::new(user);
                let id = socket.id();
                registry.connect(socket, "ayse");
                tokio::task::yield_now().await;
                registry.disconnect(id)
            }));
        }

        let mut went_offline = 0;
        for task in tasks {
            if task.await.unwrap() {
                went_offline += 1;
            }
        }

        assert!(went_offline >= 1);
        assert!(!registry.is_online(user));
        assert_eq!(registry.socket_count(user), 0);
    }
}
