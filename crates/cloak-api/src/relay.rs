use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cloak_crypto::Key;
use cloak_gateway::ConnectionRegistry;
use cloak_types::api::{MessageView, SendMessageResponse};
use cloak_types::events::GatewayEvent;
use cloak_types::models::Message;

use crate::error::RelayError;
use crate::store::{KeyStore, MessageStore};

/// Moves messages between users, re-keying them on the way in and on the
/// way out, and pushes them to whoever is connected.
///
/// Stored ciphertext is always under the receiver's key.
pub struct RelayService<S> {
    store: Arc<S>,
    registry: ConnectionRegistry,
}

impl<S> Clone for RelayService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<S: KeyStore + MessageStore> RelayService<S> {
    pub fn new(store: Arc<S>, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// Run blocking store work off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&S) -> Result<T, RelayError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                RelayError::Storage(anyhow::anyhow!("store task failed: {}", e))
            })?
    }

    /// Relay `ciphertext` (under the sender's key) to `receiver_id`.
    ///
    /// Nothing is persisted unless both keys resolve and the ciphertext
    /// re-keys cleanly. Once the row is written, pushes are best effort.
    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        ciphertext: String,
    ) -> Result<SendMessageResponse, RelayError> {
        let (sender_key, receiver_key) = self
            .blocking(move |store| {
                resolve_user(store, sender_id)?;
                resolve_user(store, receiver_id)?;
                Ok((resolve_key(store, sender_id)?, resolve_key(store, receiver_id)?))
            })
            .await?;

        let stored = cloak_crypto::relay(&ciphertext, &sender_key, &receiver_key)
            .map_err(|source| RelayError::RelayFailure {
                message_id: None,
                source,
            })?;

        // Presence is sampled here; a receiver dropping before the push
        // below leaves the row marked delivered.
        let delivered = self.registry.is_online(receiver_id);

        let message = self
            .blocking(move |store| {
                store
                    .create_message(sender_id, receiver_id, &stored, delivered)
                    .map_err(RelayError::Storage)
            })
            .await?;

        info!(
            "Message {} {} -> {} stored ({} bytes, {})",
            message.id,
            sender_id,
            receiver_id,
            message.encrypted_content.len(),
            message.status()
        );

        if delivered && receiver_id != sender_id {
            let event = GatewayEvent::message(&message, message.encrypted_content.clone());
            let sockets = self.registry.send_to(receiver_id, &event);
            debug!("Message {} pushed to {} receiver socket(s)", message.id, sockets);
        }

        // The sender's own sockets get the content back under their own key.
        let echo = GatewayEvent::message(&message, ciphertext);
        self.registry.send_to(sender_id, &echo);

        Ok(SendMessageResponse {
            message_id: message.id,
            status: message.status(),
        })
    }

    /// The conversation between `viewer_id` and `peer_id`, oldest first,
    /// keyed for the viewer.
    ///
    /// Messages the viewer received are returned as stored and marked read
    /// in one batch afterwards. Messages the viewer sent are re-keyed from
    /// the peer's key to the viewer's for this response only. A row that
    /// fails to re-key, or whose keys are unavailable, is returned with its
    /// stored ciphertext.
    pub async fn history(
        &self,
        viewer_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Vec<MessageView>, RelayError> {
        let (messages, peer_key, viewer_key) = self
            .blocking(move |store| {
                resolve_user(store, viewer_id)?;
                resolve_user(store, peer_id)?;

                let messages = store
                    .fetch_messages_between(viewer_id, peer_id)
                    .map_err(RelayError::Storage)?;

                // A missing key only costs the rows that need re-keying.
                let needs_relay = messages.iter().any(|m| m.receiver_id != viewer_id);
                let (peer_key, viewer_key) = if needs_relay {
                    (
                        store.get_user_key(peer_id).map_err(RelayError::Storage)?,
                        store.get_user_key(viewer_id).map_err(RelayError::Storage)?,
                    )
                } else {
                    (None, None)
                };
                Ok((messages, peer_key, viewer_key))
            })
            .await?;

        let mut to_mark = Vec::new();
        let mut views = Vec::with_capacity(messages.len());

        for message in messages {
            let encrypted_content = if message.receiver_id == viewer_id {
                if !message.is_read {
                    to_mark.push(message.id);
                }
                message.encrypted_content.clone()
            } else {
                match (&peer_key, &viewer_key) {
                    (Some(peer_key), Some(viewer_key)) => {
                        rekey_for_viewer(&message, peer_key, viewer_key)
                    }
                    _ => {
                        let missing = if peer_key.is_none() { peer_id } else { viewer_id };
                        warn!(
                            "Message {}: {}, returning stored ciphertext",
                            message.id,
                            RelayError::KeyUnavailable(missing)
                        );
                        message.encrypted_content.clone()
                    }
                }
            };

            views.push(MessageView {
                message_id: message.id,
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                encrypted_content,
                status: message.status(),
                created_at: message.created_at,
            });
        }

        if !to_mark.is_empty() {
            let count = to_mark.len();
            let result = self
                .blocking(move |store| {
                    store
                        .mark_messages_read_and_delivered(&to_mark)
                        .map_err(RelayError::Storage)
                })
                .await;
            match result {
                Ok(()) => debug!("{} marked {} message(s) from {} read", viewer_id, count, peer_id),
                Err(e) => warn!("Failed to mark messages read for {}: {}", viewer_id, e),
            }
        }

        Ok(views)
    }
}

fn resolve_user<S: KeyStore>(store: &S, user_id: Uuid) -> Result<(), RelayError> {
    match store.get_user(user_id).map_err(RelayError::Storage)? {
        Some(_) => Ok(()),
        None => Err(RelayError::UserNotFound(user_id)),
    }
}

fn resolve_key<S: KeyStore>(store: &S, user_id: Uuid) -> Result<Key, RelayError> {
    store
        .get_user_key(user_id)
        .map_err(RelayError::Storage)?
        .ok_or(RelayError::KeyUnavailable(user_id))
}

fn rekey_for_viewer(message: &Message, peer_key: &Key, viewer_key: &Key) -> String {
    match cloak_crypto::relay(&message.encrypted_content, peer_key, viewer_key) {
        Ok(content) => content,
        Err(source) => {
            let err = RelayError::RelayFailure {
                message_id: Some(message.id),
                source,
            };
            warn!("Message {}: {}, returning stored ciphertext", message.id, err);
            message.encrypted_content.clone()
        }
    }
}
