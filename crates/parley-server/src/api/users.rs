//! Account, session and friend request handlers.

use axum::{
    extract::{Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_shared::constants::{MAX_BIO_LEN, MIN_PASSWORD_LEN};
use parley_shared::events::ServerEvent;
use parley_shared::types::{ChatId, RequestId, SenderSummary, UserId};
use parley_store::models::{Chat, User};

use crate::auth::{clear_session_cookie, issue_session, AuthedUser};
use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

async fn hash_password(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || {
        use argon2::password_hash::{rand_core::OsRng, SaltString};
        use argon2::{Argon2, PasswordHasher};

        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("hash task failed: {e}")))?
}

async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        use argon2::{Argon2, PasswordHash, PasswordVerifier};

        let Ok(parsed) = PasswordHash::new(&hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Signup / login / logout
// ---------------------------------------------------------------------------

/// `POST /api/v1/user/new`.  Multipart form: `name`, `username`,
/// `password`, optional `bio` and `avatar` file.
pub async fn signup(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut name = String::new();
    let mut username = String::new();
    let mut password = String::new();
    let mut bio = String::new();
    let mut avatar: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "name" => name = read_text_field(field).await?,
            "username" => username = read_text_field(field).await?,
            "password" => password = read_text_field(field).await?,
            "bio" => bio = read_text_field(field).await?,
            "avatar" => {
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read avatar: {e}")))?;
                if !data.is_empty() {
                    avatar = Some((data.to_vec(), mime));
                }
            }
            _ => {}
        }
    }

    let name = name.trim().to_string();
    let username = username.trim().to_lowercase();
    if name.is_empty() || username.is_empty() {
        return Err(ApiError::Validation(
            "Name and username are required".to_string(),
        ));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if bio.len() > MAX_BIO_LEN {
        return Err(ApiError::Validation(format!(
            "Bio exceeds {MAX_BIO_LEN} characters"
        )));
    }

    let (avatar_ref, avatar_url) = match avatar {
        Some((data, mime)) => {
            let stored = state.blob_store.store_blob(&data, &mime).await?;
            (Some(stored.id.to_string()), Some(stored.public_url))
        }
        None => (None, None),
    };

    let user = User {
        id: UserId::new(),
        name,
        username,
        bio,
        password_hash: hash_password(password).await?,
        avatar_ref,
        avatar_url,
        created_at: Utc::now(),
    };

    let created = user.clone();
    let result = state
        .with_db(move |db| db.create_user(&created))
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => {
                ApiError::Validation("Username is already taken".to_string())
            }
            other => other,
        });
    if let Err(e) = result {
        // Avatar blob is orphaned if the row never landed.
        if let Some(ref blob_ref) = user.avatar_ref {
            let _ = state.blob_store.delete_blobs(&[blob_ref.clone()]).await;
        }
        return Err(e);
    }

    info!(user_id = %user.id, username = %user.username, "User registered");

    let (_, cookie) = issue_session(&state, user.id);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true, "user": user })),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /api/v1/user/login`.  Unknown username and wrong password are
/// indistinguishable to the caller.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let username = req.username.trim().to_lowercase();
    let user = state
        .with_db(move |db| db.find_user_by_username(&username))
        .await?
        .ok_or(ApiError::Authentication)?;

    if !verify_password(req.password, user.password_hash.clone()).await {
        return Err(ApiError::Authentication);
    }

    info!(user_id = %user.id, "User logged in");

    let (_, cookie) = issue_session(&state, user.id);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true, "user": user })),
    )
        .into_response())
}

/// `GET /api/v1/user/logout`.  Clears the session cookie; the token itself
/// simply expires.
pub async fn logout(Extension(AuthedUser(user)): Extension<AuthedUser>) -> Response {
    info!(user_id = %user.id, "User logged out");
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(serde_json::json!({ "success": true, "message": "Logged out" })),
    )
        .into_response()
}

/// `GET /api/v1/user/me`.
pub async fn me(Extension(AuthedUser(user)): Extension<AuthedUser>) -> Json<User> {
    Json(user)
}

// ---------------------------------------------------------------------------
// Search / friends
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: String,
}

/// `GET /api/v1/user/search?name=...`.  Excludes the caller and everyone
/// they already share a direct chat with.
pub async fn search(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SenderSummary>>, ApiError> {
    let user_id = user.id;
    let fragment = query.name;

    let matches = state
        .with_db(move |db| {
            let mut exclude = vec![user_id];
            for chat in db.direct_chats_for_user(user_id)? {
                exclude.extend(chat.members);
            }
            db.search_users(&fragment, &exclude)
        })
        .await?;

    Ok(Json(matches.into_iter().map(user_summary).collect()))
}

#[derive(Deserialize)]
pub struct FriendsQuery {
    #[serde(rename = "chatId")]
    pub chat_id: Option<ChatId>,
}

/// `GET /api/v1/user/friends[?chatId=...]`.  Friends are the other ends of
/// the caller's direct chats; with `chatId`, members of that chat are
/// filtered out so the client can offer an add-members picker.
pub async fn friends(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Query(query): Query<FriendsQuery>,
) -> Result<Json<Vec<SenderSummary>>, ApiError> {
    let user_id = user.id;

    let friends = state
        .with_db(move |db| {
            let already_in: Vec<UserId> = match query.chat_id {
                Some(chat_id) => db.members_of_chat(chat_id)?,
                None => Vec::new(),
            };

            let mut out = Vec::new();
            for chat in db.direct_chats_for_user(user_id)? {
                for member in chat.members {
                    if member != user_id && !already_in.contains(&member) {
                        out.push(db.get_user(member)?);
                    }
                }
            }
            Ok(out)
        })
        .await?;

    Ok(Json(friends.into_iter().map(user_summary).collect()))
}

// ---------------------------------------------------------------------------
// Friend requests
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SendRequestBody {
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

/// `PUT /api/v1/user/sendrequest`.  Pushes `newRequest` to the receiver's
/// live connections.
pub async fn send_request(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<SendRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let receiver = body.user_id;
    if receiver == user.id {
        return Err(ApiError::Validation(
            "Cannot send a request to yourself".to_string(),
        ));
    }

    let sender_id = user.id;
    state
        .with_db(move |db| {
            db.get_user(receiver)?;
            for chat in db.direct_chats_for_user(sender_id)? {
                if chat.members.contains(&receiver) {
                    return Err(parley_store::StoreError::Conflict);
                }
            }
            db.create_request(sender_id, receiver)
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => ApiError::Validation(
                "Already connected, or a request is pending".to_string(),
            ),
            other => other,
        })?;

    state.fanout.dispatch_to(receiver, ServerEvent::NewRequest).await;

    info!(sender = %user.id, receiver = %receiver, "Friend request sent");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Friend request sent"
    })))
}

#[derive(Deserialize)]
pub struct AcceptRequestBody {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    pub accept: bool,
}

/// `PUT /api/v1/user/acceptrequest`.  Accepting creates the direct chat
/// and pushes `refetchChats` to both parties; rejecting only deletes the
/// request, reopening the pair.
pub async fn accept_request(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<AcceptRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = user.id;
    let request_id = body.request_id;
    let accept = body.accept;

    let request = state
        .with_db(move |db| db.get_request(request_id))
        .await
        .map_err(|_| ApiError::NotFound("Request not found".to_string()))?;

    if request.receiver != user_id {
        return Err(ApiError::Authorization(
            "Only the receiver can act on a request".to_string(),
        ));
    }

    if !accept {
        state
            .with_db(move |db| {
                db.delete_request(request_id)?;
                Ok(())
            })
            .await?;
        return Ok(Json(serde_json::json!({
            "success": true,
            "message": "Friend request rejected"
        })));
    }

    let sender_id = request.sender;
    state
        .with_db(move |db| {
            let sender = db.get_user(sender_id)?;
            let receiver = db.get_user(user_id)?;
            let now = Utc::now();
            let chat = Chat {
                id: ChatId::new(),
                name: format!("{}-{}", sender.name, receiver.name),
                is_group: false,
                creator: None,
                members: vec![sender_id, user_id],
                created_at: now,
                updated_at: now,
            };
            db.create_chat(&chat)?;
            db.delete_request(request_id)?;
            Ok(())
        })
        .await?;

    state
        .fanout
        .dispatch(&[sender_id, user_id], ServerEvent::RefetchChats)
        .await;

    info!(request_id = %request_id, "Friend request accepted");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Friend request accepted"
    })))
}

#[derive(Serialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: RequestId,
    pub sender: SenderSummary,
}

/// `GET /api/v1/user/notifications`.  Pending requests addressed to the
/// caller, with enough sender detail to render them.
pub async fn notifications(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let user_id = user.id;

    let notifications = state
        .with_db(move |db| {
            let mut out = Vec::new();
            for request in db.pending_requests_for_receiver(user_id)? {
                let sender = db.get_user(request.sender)?;
                out.push((request.id, sender));
            }
            Ok(out)
        })
        .await?;

    Ok(Json(
        notifications
            .into_iter()
            .map(|(id, sender)| Notification {
                id,
                sender: user_summary(sender),
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn user_summary(user: User) -> SenderSummary {
    SenderSummary {
        id: user.id,
        name: user.name,
        avatar: user.avatar_url,
    }
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("Failed to read field: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionId;
    use crate::state::test_support::test_state;
    use tokio::sync::mpsc;

    fn seed_user(state: &AppState, name: &str) -> User {
        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            username: name.to_lowercase(),
            bio: String::new(),
            password_hash: "x".to_string(),
            avatar_ref: None,
            avatar_url: None,
            created_at: Utc::now(),
        };
        state.db.lock().unwrap().create_user(&user).unwrap();
        user
    }

    #[tokio::test]
    async fn test_password_hash_roundtrip() {
        let hash = hash_password("hunter2hunter2".to_string()).await.unwrap();
        assert!(verify_password("hunter2hunter2".to_string(), hash.clone()).await);
        assert!(!verify_password("wrong".to_string(), hash).await);
    }

    #[tokio::test]
    async fn test_login_unknown_user_is_uniform() {
        let (state, _dir) = test_state().await;
        let result = login(
            State(state),
            Json(LoginRequest {
                username: "ghost".to_string(),
                password: "whatever123".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Authentication)));
    }

    #[tokio::test]
    async fn test_send_request_notifies_receiver() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "Alice");
        let bob = seed_user(&state, "Bob");

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.registry.register(bob.id, ConnectionId::new(), tx).await;

        send_request(
            State(state.clone()),
            Extension(AuthedUser(alice)),
            Json(SendRequestBody { user_id: bob.id }),
        )
        .await
        .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::NewRequest));
    }

    #[tokio::test]
    async fn test_self_request_rejected() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "Alice");

        let result = send_request(
            State(state),
            Extension(AuthedUser(alice.clone())),
            Json(SendRequestBody { user_id: alice.id }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_accept_creates_direct_chat_and_refetches() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "Alice");
        let bob = seed_user(&state, "Bob");

        let request = state
            .db
            .lock()
            .unwrap()
            .create_request(alice.id, bob.id)
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .registry
            .register(alice.id, ConnectionId::new(), tx)
            .await;

        accept_request(
            State(state.clone()),
            Extension(AuthedUser(bob.clone())),
            Json(AcceptRequestBody {
                request_id: request.id,
                accept: true,
            }),
        )
        .await
        .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::RefetchChats
        ));

        let chats = state
            .db
            .lock()
            .unwrap()
            .direct_chats_for_user(bob.id)
            .unwrap();
        assert_eq!(chats.len(), 1);
        assert!(chats[0].members.contains(&alice.id));
    }

    #[tokio::test]
    async fn test_only_receiver_may_accept() {
        let (state, _dir) = test_state().await;
        let alice = seed_user(&state, "Alice");
        let bob = seed_user(&state, "Bob");

        let request = state
            .db
            .lock()
            .unwrap()
            .create_request(alice.id, bob.id)
            .unwrap();

        let result = accept_request(
            State(state),
            Extension(AuthedUser(alice)),
            Json(AcceptRequestBody {
                request_id: request.id,
                accept: true,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Authorization(_))));
    }
}
