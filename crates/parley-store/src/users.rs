//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user.  Fails with [`StoreError::Conflict`] when the
    /// username is already taken.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name, username, bio, password_hash, avatar_ref, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.username,
                    user.bio,
                    user.password_hash,
                    user.avatar_ref,
                    user.avatar_url,
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, username, bio, password_hash, avatar_ref, avatar_url, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch a user by unique username.  Returns `None` when absent.
    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.conn().query_row(
            "SELECT id, name, username, bio, password_hash, avatar_ref, avatar_url, created_at
             FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Case-insensitive substring search on display name, excluding the
    /// given user ids (typically the caller plus their existing friends).
    pub fn search_users(&self, name_fragment: &str, exclude: &[UserId]) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, username, bio, password_hash, avatar_ref, avatar_url, created_at
             FROM users
             WHERE name LIKE '%' || ?1 || '%'
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map(params![name_fragment], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            let user = row?;
            if !exclude.contains(&user.id) {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Total user count.
    pub fn count_users(&self) -> Result<u64> {
        let count: u64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let username: String = row.get(2)?;
    let bio: String = row.get(3)?;
    let password_hash: String = row.get(4)?;
    let avatar_ref: Option<String> = row.get(5)?;
    let avatar_url: Option<String> = row.get(6)?;
    let created_str: String = row.get(7)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        name,
        username,
        bio,
        password_hash,
        avatar_ref,
        avatar_url,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(name: &str, username: &str) -> User {
        User {
            id: UserId::new(),
            name: name.to_string(),
            username: username.to_string(),
            bio: "hello".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            avatar_ref: None,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("Alice", "alice");

        db.create_user(&user).unwrap();
        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.password_hash, user.password_hash);
    }

    #[test]
    fn duplicate_username_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&test_user("Alice", "alice")).unwrap();

        let result = db.create_user(&test_user("Other Alice", "alice"));
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[test]
    fn find_by_username_missing() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn search_excludes_listed_ids() {
        let db = Database::open_in_memory().unwrap();
        let alice = test_user("Alice", "alice");
        let alicia = test_user("Alicia", "alicia");
        db.create_user(&alice).unwrap();
        db.create_user(&alicia).unwrap();

        let found = db.search_users("Ali", &[alice.id]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, alicia.id);
    }
}
