//! CRUD operations for [`Message`] records and their attachments.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::types::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message};

impl Database {
    /// Insert a message together with its attachment rows.
    pub fn insert_message(&mut self, message: &Message) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender.to_string(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;

        for attachment in &message.attachments {
            tx.execute(
                "INSERT INTO attachments (blob_ref, url, message_id) VALUES (?1, ?2, ?3)",
                params![attachment.blob_ref, attachment.url, message.id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch one page of a chat's history, newest first.
    pub fn messages_for_chat(
        &self,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, content, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        for message in &mut messages {
            message.attachments = self.attachments_for_message(message.id)?;
        }
        Ok(messages)
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, chat_id, sender_id, content, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        message.attachments = self.attachments_for_message(id)?;
        Ok(message)
    }

    /// Total number of messages in a chat.
    pub fn count_messages_for_chat(&self, chat_id: ChatId) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total message count.
    pub fn count_messages(&self) -> Result<u64> {
        let count: u64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// All attachment references across a chat, for blob cleanup before a
    /// chat deletion.
    pub fn attachments_for_chat(&self, chat_id: ChatId) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT a.blob_ref, a.url
             FROM attachments a
             JOIN messages m ON m.id = a.message_id
             WHERE m.chat_id = ?1",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            Ok(Attachment {
                blob_ref: row.get(0)?,
                url: row.get(1)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    /// Delete every message in a chat.  Returns the number of rows removed.
    pub fn delete_messages_for_chat(&self, chat_id: ChatId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
        )?;
        Ok(affected)
    }

    fn attachments_for_message(&self, message_id: MessageId) -> Result<Vec<Attachment>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT blob_ref, url FROM attachments WHERE message_id = ?1")?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            Ok(Attachment {
                blob_ref: row.get(0)?,
                url: row.get(1)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`] (attachments filled in separately).
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let chat_id = ChatId::parse(&chat_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        chat_id,
        sender,
        content,
        attachments: Vec::new(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, User};

    fn seed(db: &mut Database) -> (UserId, ChatId) {
        let mut ids = Vec::new();
        for name in ["a", "b"] {
            let user = User {
                id: UserId::new(),
                name: name.to_string(),
                username: name.to_string(),
                bio: String::new(),
                password_hash: "$argon2id$stub".to_string(),
                avatar_ref: None,
                avatar_url: None,
                created_at: Utc::now(),
            };
            db.create_user(&user).unwrap();
            ids.push(user.id);
        }

        let chat = Chat {
            id: ChatId::new(),
            name: "a -- b".to_string(),
            is_group: false,
            creator: Some(ids[0]),
            members: ids.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.create_chat(&chat).unwrap();
        (ids[0], chat.id)
    }

    fn message(sender: UserId, chat_id: ChatId, content: &str) -> Message {
        Message {
            id: MessageId::new(),
            chat_id,
            sender,
            content: content.to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_page() {
        let mut db = Database::open_in_memory().unwrap();
        let (sender, chat_id) = seed(&mut db);

        for i in 0..25 {
            db.insert_message(&message(sender, chat_id, &format!("msg {i}")))
                .unwrap();
        }

        assert_eq!(db.count_messages_for_chat(chat_id).unwrap(), 25);
        let page = db.messages_for_chat(chat_id, 20, 0).unwrap();
        assert_eq!(page.len(), 20);
        let page2 = db.messages_for_chat(chat_id, 20, 20).unwrap();
        assert_eq!(page2.len(), 5);
    }

    #[test]
    fn attachments_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let (sender, chat_id) = seed(&mut db);

        let mut msg = message(sender, chat_id, "");
        msg.attachments = vec![Attachment {
            blob_ref: "blob-1".to_string(),
            url: "http://host/blob/blob-1".to_string(),
        }];
        db.insert_message(&msg).unwrap();

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched.attachments.len(), 1);

        let all = db.attachments_for_chat(chat_id).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].blob_ref, "blob-1");
    }

    #[test]
    fn delete_many() {
        let mut db = Database::open_in_memory().unwrap();
        let (sender, chat_id) = seed(&mut db);

        for _ in 0..3 {
            db.insert_message(&message(sender, chat_id, "x")).unwrap();
        }

        assert_eq!(db.delete_messages_for_chat(chat_id).unwrap(), 3);
        assert_eq!(db.count_messages_for_chat(chat_id).unwrap(), 0);
    }
}
