//! Message ingest pipeline: validate, deliver live, then persist.
//!
//! Delivery deliberately runs before the durable write so a slow disk
//! never adds latency to the conversation.  The payload pushed to sockets
//! carries its own freshly generated id; the stored row gets another one,
//! and the two are never reconciled.  If the write fails the recipients
//! keep what they saw and only the sender is told.

use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use parley_shared::constants::MAX_MESSAGE_LEN;
use parley_shared::events::ServerEvent;
use parley_shared::types::{ChatId, EphemeralMessage, MessageId, SenderSummary, UserId};
use parley_store::models::{Attachment, Message, User};
use parley_store::Database;

use crate::error::ApiError;
use crate::fanout::FanoutRouter;

pub struct MessageIngestPipeline {
    fanout: FanoutRouter,
    db: Arc<Mutex<Database>>,
}

impl MessageIngestPipeline {
    pub fn new(fanout: FanoutRouter, db: Arc<Mutex<Database>>) -> Self {
        Self { fanout, db }
    }

    /// Ingest one text message from a live socket or the REST surface.
    ///
    /// Steps, in order: validate the content, check the sender belongs to
    /// the chat, push `newMessage` and `newMessageAlert` to every member
    /// including the sender, then write the durable record.  A failed
    /// write is acknowledged to the sender with an `alert` and surfaced
    /// as [`ApiError::Persistence`]; nothing already delivered is
    /// retracted.
    pub async fn send_message(
        &self,
        sender: &User,
        chat_id: ChatId,
        content: String,
    ) -> Result<(), ApiError> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ApiError::Validation("Message is empty".to_string()));
        }
        if content.len() > MAX_MESSAGE_LEN {
            return Err(ApiError::Validation(format!(
                "Message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let members = self.members_or_reject(sender.id, chat_id).await?;

        let payload = EphemeralMessage::compose(
            SenderSummary {
                id: sender.id,
                name: sender.name.clone(),
                avatar: sender.avatar_url.clone(),
            },
            chat_id,
            content.clone(),
        );
        let created_at = payload.created_at;

        self.fanout
            .dispatch(
                &members,
                ServerEvent::NewMessage {
                    chat_id,
                    message: payload,
                },
            )
            .await;
        self.fanout
            .dispatch(&members, ServerEvent::NewMessageAlert { chat_id })
            .await;

        debug!(chat_id = %chat_id, targets = members.len(), "Message delivered");

        let record = Message {
            id: MessageId::new(),
            chat_id,
            sender: sender.id,
            content,
            attachments: Vec::new(),
            created_at,
        };
        let sender_id = sender.id;
        let persisted = self.run_db(move |db| db.insert_message(&record)).await;

        if let Err(e) = persisted {
            error!(chat_id = %chat_id, error = %e, "Message delivered but not persisted");
            self.fanout
                .dispatch_to(
                    sender_id,
                    ServerEvent::Alert {
                        message: "Message could not be saved".to_string(),
                        chat_id: Some(chat_id),
                    },
                )
                .await;
            return Err(ApiError::Persistence(e));
        }

        Ok(())
    }

    /// Ingest a file message from the upload route.
    ///
    /// Unlike the text path this persists first: the blobs are already on
    /// disk, so a failed write means nothing is delivered and the caller
    /// can clean the blobs up.
    pub async fn send_attachment_message(
        &self,
        sender: &User,
        chat_id: ChatId,
        attachments: Vec<Attachment>,
    ) -> Result<(), ApiError> {
        if attachments.is_empty() {
            return Err(ApiError::Validation("No files attached".to_string()));
        }

        let members = self.members_or_reject(sender.id, chat_id).await?;

        let urls: Vec<String> = attachments.iter().map(|a| a.url.clone()).collect();
        let record = Message {
            id: MessageId::new(),
            chat_id,
            sender: sender.id,
            content: String::new(),
            attachments,
            created_at: chrono::Utc::now(),
        };
        let created_at = record.created_at;
        self.run_db(move |db| db.insert_message(&record))
            .await
            .map_err(ApiError::Persistence)?;

        let mut payload = EphemeralMessage::compose(
            SenderSummary {
                id: sender.id,
                name: sender.name.clone(),
                avatar: sender.avatar_url.clone(),
            },
            chat_id,
            String::new(),
        );
        payload.attachments = urls;
        payload.created_at = created_at;

        self.fanout
            .dispatch(
                &members,
                ServerEvent::NewMessage {
                    chat_id,
                    message: payload,
                },
            )
            .await;
        self.fanout
            .dispatch(&members, ServerEvent::NewMessageAlert { chat_id })
            .await;

        debug!(chat_id = %chat_id, targets = members.len(), "Attachment message delivered");
        Ok(())
    }

    /// Member list of the chat, or an authorization error when the sender
    /// does not belong to it.
    async fn members_or_reject(
        &self,
        sender_id: UserId,
        chat_id: ChatId,
    ) -> Result<Vec<UserId>, ApiError> {
        self.run_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            if !chat.members.contains(&sender_id) {
                return Err(parley_store::StoreError::NotFound);
            }
            Ok(chat.members)
        })
        .await
        .map_err(|_| ApiError::Authorization("You are not a member of this chat".to_string()))
    }

    async fn run_db<T, F>(&self, f: F) -> Result<T, parley_store::StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, parley_store::StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().unwrap_or_else(|poison| poison.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| parley_store::StoreError::Migration(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::types::UserId;
    use parley_store::models::Chat;
    use tokio::sync::mpsc;

    use crate::registry::{ConnectionId, ConnectionRegistry};

    fn test_user(name: &str) -> User {
        User {
            id: UserId::new(),
            name: name.to_string(),
            username: name.to_lowercase(),
            bio: String::new(),
            password_hash: "x".to_string(),
            avatar_ref: None,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    struct Harness {
        pipeline: MessageIngestPipeline,
        registry: Arc<ConnectionRegistry>,
        db: Arc<Mutex<Database>>,
    }

    async fn harness() -> Harness {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = FanoutRouter::new(registry.clone());
        Harness {
            pipeline: MessageIngestPipeline::new(fanout, db.clone()),
            registry,
            db,
        }
    }

    fn seed_chat(db: &Arc<Mutex<Database>>, members: &[&User]) -> ChatId {
        let mut guard = db.lock().unwrap();
        for user in members {
            guard.create_user(user).unwrap();
        }
        let chat = Chat {
            id: ChatId::new(),
            name: "test chat".to_string(),
            is_group: members.len() > 2,
            creator: Some(members[0].id),
            members: members.iter().map(|u| u.id).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        guard.create_chat(&chat).unwrap();
        chat.id
    }

    async fn connect(
        registry: &ConnectionRegistry,
        user: UserId,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user, ConnectionId::new(), tx).await;
        rx
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_member_including_sender() {
        let h = harness().await;
        let (alice, bob, carol) = (test_user("Alice"), test_user("Bob"), test_user("Carol"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob, &carol]);

        let mut rx_a = connect(&h.registry, alice.id).await;
        let mut rx_b = connect(&h.registry, bob.id).await;
        let mut rx_c = connect(&h.registry, carol.id).await;

        h.pipeline
            .send_message(&alice, chat_id, "hello".to_string())
            .await
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let first = rx.recv().await.unwrap();
            assert!(matches!(first, ServerEvent::NewMessage { .. }));
            let second = rx.recv().await.unwrap();
            assert!(matches!(second, ServerEvent::NewMessageAlert { .. }));
        }
    }

    #[tokio::test]
    async fn test_message_persisted_with_distinct_id() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        let mut rx_b = connect(&h.registry, bob.id).await;

        h.pipeline
            .send_message(&alice, chat_id, "hi bob".to_string())
            .await
            .unwrap();

        let delivered = match rx_b.recv().await.unwrap() {
            ServerEvent::NewMessage { message, .. } => message,
            other => panic!("expected newMessage, got {other:?}"),
        };

        let stored = h
            .db
            .lock()
            .unwrap()
            .messages_for_chat(chat_id, 10, 0)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi bob");
        // Delivery and storage each mint their own id.
        assert_ne!(stored[0].id, delivered.id);
    }

    #[tokio::test]
    async fn test_non_member_rejected_before_delivery() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        let mallory = test_user("Mallory");
        h.db.lock().unwrap().create_user(&mallory).unwrap();
        let mut rx_b = connect(&h.registry, bob.id).await;

        let result = h
            .pipeline
            .send_message(&mallory, chat_id, "intruding".to_string())
            .await;
        assert!(matches!(result, Err(ApiError::Authorization(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        let result = h
            .pipeline
            .send_message(&alice, chat_id, "   ".to_string())
            .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        let result = h
            .pipeline
            .send_message(&alice, chat_id, "x".repeat(MAX_MESSAGE_LEN + 1))
            .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_attachment_message_persists_before_delivery() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        let mut rx_b = connect(&h.registry, bob.id).await;

        let attachments = vec![Attachment {
            blob_ref: "ref-1".to_string(),
            url: "http://localhost:3000/api/v1/blob/ref-1".to_string(),
        }];
        h.pipeline
            .send_attachment_message(&alice, chat_id, attachments)
            .await
            .unwrap();

        let delivered = match rx_b.recv().await.unwrap() {
            ServerEvent::NewMessage { message, .. } => message,
            other => panic!("expected newMessage, got {other:?}"),
        };
        assert_eq!(delivered.attachments.len(), 1);

        let stored = h
            .db
            .lock()
            .unwrap()
            .messages_for_chat(chat_id, 10, 0)
            .unwrap();
        assert_eq!(stored[0].attachments.len(), 1);
        assert_eq!(stored[0].attachments[0].blob_ref, "ref-1");
    }

    #[tokio::test]
    async fn test_attachment_persist_failure_delivers_nothing() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        h.db.lock()
            .unwrap()
            .conn()
            .execute_batch("DROP TABLE attachments; DROP TABLE messages;")
            .unwrap();

        let mut rx_b = connect(&h.registry, bob.id).await;

        let attachments = vec![Attachment {
            blob_ref: "ref-1".to_string(),
            url: "http://localhost:3000/api/v1/blob/ref-1".to_string(),
        }];
        let result = h
            .pipeline
            .send_attachment_message(&alice, chat_id, attachments)
            .await;
        assert!(matches!(result, Err(ApiError::Persistence(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_delivery_and_alerts_sender() {
        let h = harness().await;
        let (alice, bob) = (test_user("Alice"), test_user("Bob"));
        let chat_id = seed_chat(&h.db, &[&alice, &bob]);

        // Break the durable path after validation data is in place.
        h.db.lock()
            .unwrap()
            .conn()
            .execute_batch("DROP TABLE attachments; DROP TABLE messages;")
            .unwrap();

        let mut rx_a = connect(&h.registry, alice.id).await;
        let mut rx_b = connect(&h.registry, bob.id).await;

        let result = h
            .pipeline
            .send_message(&alice, chat_id, "doomed".to_string())
            .await;
        assert!(matches!(result, Err(ApiError::Persistence(_))));

        // Bob still got the full delivery.
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            ServerEvent::NewMessage { .. }
        ));
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            ServerEvent::NewMessageAlert { .. }
        ));

        // Alice got the delivery too, then the failure ack.
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ServerEvent::NewMessage { .. }
        ));
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ServerEvent::NewMessageAlert { .. }
        ));
        match rx_a.recv().await.unwrap() {
            ServerEvent::Alert { chat_id: scope, .. } => assert_eq!(scope, Some(chat_id)),
            other => panic!("expected alert, got {other:?}"),
        }
    }
}
