//! CRUD operations for [`FriendRequest`] records.
//!
//! The create path enforces the pair invariant: at most one pending
//! request may exist per unordered (sender, receiver) pair, checked and
//! inserted inside a single transaction.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::types::{RequestId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FriendRequest, RequestStatus};

impl Database {
    /// Create a pending friend request from `sender` to `receiver`.
    ///
    /// Fails with [`StoreError::Conflict`] when a pending request already
    /// exists between the two users in either direction.
    pub fn create_request(&mut self, sender: UserId, receiver: UserId) -> Result<FriendRequest> {
        let tx = self.conn_mut().transaction()?;

        let existing: u64 = tx.query_row(
            "SELECT COUNT(*) FROM friend_requests
             WHERE status = 'pending'
               AND ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))",
            params![sender.to_string(), receiver.to_string()],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(StoreError::Conflict);
        }

        let request = FriendRequest {
            id: RequestId::new(),
            sender,
            receiver,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO friend_requests (id, sender_id, receiver_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                request.status.as_str(),
                request.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(request)
    }

    /// Fetch a single request by id.
    pub fn get_request(&self, id: RequestId) -> Result<FriendRequest> {
        self.conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, status, created_at
                 FROM friend_requests WHERE id = ?1",
                params![id.to_string()],
                row_to_request,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Pending requests addressed to a user, newest first.
    pub fn pending_requests_for_receiver(&self, receiver: UserId) -> Result<Vec<FriendRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, status, created_at
             FROM friend_requests
             WHERE receiver_id = ?1 AND status = 'pending'
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![receiver.to_string()], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Delete a request by id.  Returns `true` if a row was deleted.
    pub fn delete_request(&self, id: RequestId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friend_requests WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`FriendRequest`].
fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = RequestId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = RequestStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown request status: {status_str}").into(),
        )
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(FriendRequest {
        id,
        sender,
        receiver,
        status,
        created_at,
    })
}
