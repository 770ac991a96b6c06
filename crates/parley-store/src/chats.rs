//! CRUD operations for [`Chat`] records and the chat membership table.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::types::{ChatId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Chat;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new chat together with its membership rows.
    pub fn create_chat(&mut self, chat: &Chat) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO chats (id, name, is_group, creator_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat.id.to_string(),
                chat.name,
                chat.is_group as i64,
                chat.creator.map(|c| c.to_string()),
                chat.created_at.to_rfc3339(),
                chat.updated_at.to_rfc3339(),
            ],
        )?;

        for member in &chat.members {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                params![chat.id.to_string(), member.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single chat by id, members included.
    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        let mut chat = self
            .conn()
            .query_row(
                "SELECT id, name, is_group, creator_id, created_at, updated_at
                 FROM chats WHERE id = ?1",
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        chat.members = self.members_of_chat(id)?;
        Ok(chat)
    }

    /// List every chat the user belongs to, most recently updated first.
    pub fn chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        self.chats_with_membership(
            "SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at, c.updated_at
             FROM chats c
             JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?1
             ORDER BY c.updated_at DESC",
            params![user_id.to_string()],
        )
    }

    /// List the user's direct (non-group) chats.
    pub fn direct_chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        self.chats_with_membership(
            "SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at, c.updated_at
             FROM chats c
             JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?1 AND c.is_group = 0
             ORDER BY c.updated_at DESC",
            params![user_id.to_string()],
        )
    }

    /// List the group chats created by the user.
    pub fn groups_created_by(&self, user_id: UserId) -> Result<Vec<Chat>> {
        self.chats_with_membership(
            "SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at, c.updated_at
             FROM chats c
             JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?1 AND c.is_group = 1 AND c.creator_id = ?1
             ORDER BY c.updated_at DESC",
            params![user_id.to_string()],
        )
    }

    /// Whether a group chat with this name already exists for the creator.
    pub fn group_name_taken(&self, creator: UserId, name: &str) -> Result<bool> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chats
             WHERE is_group = 1 AND creator_id = ?1 AND name = ?2",
            params![creator.to_string(), name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Member ids of a chat.
    pub fn members_of_chat(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            UserId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Whether the user is a member of the chat.
    pub fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every distinct user sharing at least one chat with `user_id`,
    /// excluding the user themselves.
    ///
    /// Used to capture a connection's peer set at connect time, so that
    /// the disconnect path can broadcast presence without re-deriving
    /// membership after teardown.
    pub fn co_members_for_user(&self, user_id: UserId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT other.user_id
             FROM chat_members mine
             JOIN chat_members other ON other.chat_id = mine.chat_id
             WHERE mine.user_id = ?1 AND other.user_id != ?1",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            UserId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    /// Total chat count.
    pub fn count_chats(&self) -> Result<u64> {
        let count: u64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename a chat.
    pub fn rename_chat(&self, id: ChatId, name: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chats SET name = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), name, Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Replace the full membership of a chat.
    pub fn set_chat_members(&mut self, id: ChatId, members: &[UserId]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "DELETE FROM chat_members WHERE chat_id = ?1",
            params![id.to_string()],
        )?;
        for member in members {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                params![id.to_string(), member.to_string()],
            )?;
        }
        tx.execute(
            "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reassign the chat creator.
    pub fn set_chat_creator(&self, id: ChatId, creator: UserId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chats SET creator_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), creator.to_string(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a chat.  Membership, messages, and attachment rows cascade.
    /// Returns `true` if a row was deleted.
    pub fn delete_chat(&self, id: ChatId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn chats_with_membership(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        for chat in &mut chats {
            chat.members = self.members_of_chat(chat.id)?;
        }
        Ok(chats)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Chat`] (members filled in separately).
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let is_group: i64 = row.get(2)?;
    let creator_str: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let id = ChatId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let creator = creator_str
        .map(|s| UserId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Chat {
        id,
        name,
        is_group: is_group != 0,
        creator,
        members: Vec::new(),
        created_at,
        updated_at,
    })
}
