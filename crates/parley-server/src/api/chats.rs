//! Chat CRUD, group membership and message history handlers.

use axum::{
    extract::{Multipart, Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_shared::constants::{
    MAX_ATTACHMENTS, MAX_GROUP_MEMBERS, MESSAGES_PER_PAGE, MIN_GROUP_MEMBERS,
};
use parley_shared::events::ServerEvent;
use parley_shared::types::{ChatId, SenderSummary, UserId};
use parley_store::models::{Attachment, Chat, Message, User};
use parley_store::StoreError;

use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response shaping
// ---------------------------------------------------------------------------

/// Chat as the client lists it.  A direct chat borrows the other member's
/// name and avatar; a group keeps its own name.
#[derive(Debug, Serialize)]
pub struct ChatSummary {
    #[serde(rename = "_id")]
    pub id: ChatId,
    pub name: String,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    pub avatar: Option<String>,
    pub members: Vec<UserId>,
}

fn summarize_chat(
    db: &parley_store::Database,
    viewer: UserId,
    chat: Chat,
) -> Result<ChatSummary, StoreError> {
    if chat.is_group {
        return Ok(ChatSummary {
            id: chat.id,
            name: chat.name,
            is_group: true,
            avatar: None,
            members: chat.members,
        });
    }

    let other = chat
        .members
        .iter()
        .copied()
        .find(|m| *m != viewer)
        .ok_or(StoreError::NotFound)?;
    let other = db.get_user(other)?;
    Ok(ChatSummary {
        id: chat.id,
        name: other.name,
        is_group: false,
        avatar: other.avatar_url,
        members: chat.members,
    })
}

// ---------------------------------------------------------------------------
// Group creation and listing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct NewGroupBody {
    pub name: String,
    pub members: Vec<UserId>,
}

/// `POST /api/v1/chat/new`.  Creates a group with the caller as creator,
/// alerts the invited members and tells everyone to refetch.
pub async fn new_group(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<NewGroupBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".to_string()));
    }

    let mut members = body.members;
    members.retain(|m| *m != user.id);
    members.sort();
    members.dedup();
    members.insert(0, user.id);

    if members.len() < MIN_GROUP_MEMBERS {
        return Err(ApiError::Validation(format!(
            "A group needs at least {MIN_GROUP_MEMBERS} members"
        )));
    }
    if members.len() > MAX_GROUP_MEMBERS {
        return Err(ApiError::Validation(format!(
            "A group cannot exceed {MAX_GROUP_MEMBERS} members"
        )));
    }

    let creator = user.id;
    let chat_name = name.clone();
    let member_list = members.clone();
    let chat_id = state
        .with_db(move |db| {
            if db.group_name_taken(creator, &chat_name)? {
                return Err(StoreError::Conflict);
            }
            for member in &member_list {
                db.get_user(*member)?;
            }
            let now = Utc::now();
            let chat = Chat {
                id: ChatId::new(),
                name: chat_name,
                is_group: true,
                creator: Some(creator),
                members: member_list,
                created_at: now,
                updated_at: now,
            };
            db.create_chat(&chat)?;
            Ok(chat.id)
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => {
                ApiError::Validation("You already created a group with this name".to_string())
            }
            other => other,
        })?;

    let invited: Vec<UserId> = members.iter().copied().filter(|m| *m != user.id).collect();
    state
        .fanout
        .dispatch(
            &invited,
            ServerEvent::Alert {
                message: format!("Welcome to {name}"),
                chat_id: Some(chat_id),
            },
        )
        .await;
    state.fanout.dispatch(&members, ServerEvent::RefetchChats).await;

    info!(chat_id = %chat_id, creator = %user.id, members = members.len(), "Group created");
    Ok(Json(serde_json::json!({ "success": true, "chatId": chat_id })))
}

/// `GET /api/v1/chat/my`.
pub async fn my_chats(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = user.id;
    let chats = state
        .with_db(move |db| {
            db.chats_for_user(user_id)?
                .into_iter()
                .map(|c| summarize_chat(db, user_id, c))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
    Ok(Json(chats))
}

/// `GET /api/v1/chat/my/groups`.  Groups the caller created.
pub async fn my_groups(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = user.id;
    let chats = state
        .with_db(move |db| {
            db.groups_created_by(user_id)?
                .into_iter()
                .map(|c| summarize_chat(db, user_id, c))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
    Ok(Json(chats))
}

// ---------------------------------------------------------------------------
// Membership mutations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddMembersBody {
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    pub members: Vec<UserId>,
}

/// `PUT /api/v1/chat/addmembers`.  Creator-only.
pub async fn add_members(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<AddMembersBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.members.is_empty() {
        return Err(ApiError::Validation("No members to add".to_string()));
    }

    let user_id = user.id;
    let chat_id = body.chat_id;
    let additions = body.members;

    let (old_members, new_members) = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            require_group_creator(&chat, user_id)?;

            let mut members = chat.members.clone();
            for member in additions {
                db.get_user(member)?;
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            if members.len() > MAX_GROUP_MEMBERS {
                return Err(StoreError::Conflict);
            }
            db.set_chat_members(chat_id, &members)?;
            Ok((chat.members, members))
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => ApiError::Validation(format!(
                "A group cannot exceed {MAX_GROUP_MEMBERS} members"
            )),
            other => other,
        })?;

    state
        .fanout
        .dispatch(
            &old_members,
            ServerEvent::Alert {
                message: "New members joined the group".to_string(),
                chat_id: Some(chat_id),
            },
        )
        .await;
    state
        .fanout
        .dispatch(&new_members, ServerEvent::RefetchChats)
        .await;

    Ok(Json(serde_json::json!({ "success": true, "message": "Members added" })))
}

#[derive(Deserialize)]
pub struct RemoveMemberBody {
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

/// `PUT /api/v1/chat/removemember`.  Creator-only; the group must keep its
/// minimum size.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<RemoveMemberBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = user.id;
    let chat_id = body.chat_id;
    let target = body.user_id;

    if target == actor {
        return Err(ApiError::Validation(
            "Use leave to exit your own group".to_string(),
        ));
    }

    let remaining = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            require_group_creator(&chat, actor)?;
            if !chat.members.contains(&target) {
                return Err(StoreError::NotFound);
            }
            if chat.members.len() - 1 < MIN_GROUP_MEMBERS {
                return Err(StoreError::Conflict);
            }

            let members: Vec<UserId> =
                chat.members.into_iter().filter(|m| *m != target).collect();
            db.set_chat_members(chat_id, &members)?;
            Ok(members)
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => ApiError::Validation(format!(
                "A group needs at least {MIN_GROUP_MEMBERS} members"
            )),
            other => other,
        })?;

    state
        .fanout
        .dispatch(
            &remaining,
            ServerEvent::Alert {
                message: "A member was removed from the group".to_string(),
                chat_id: Some(chat_id),
            },
        )
        .await;
    state.fanout.dispatch_to(target, ServerEvent::RefetchChats).await;

    info!(chat_id = %chat_id, removed = %target, "Member removed");
    Ok(Json(serde_json::json!({ "success": true, "message": "Member removed" })))
}

/// `DELETE /api/v1/chat/leave/:id`.  When the creator leaves, a remaining
/// member is promoted at random.
pub async fn leave_group(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = user.id;

    let remaining = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            if !chat.is_group {
                return Err(StoreError::NotFound);
            }
            if !chat.members.contains(&actor) {
                return Err(StoreError::NotFound);
            }
            if chat.members.len() - 1 < MIN_GROUP_MEMBERS {
                return Err(StoreError::Conflict);
            }

            let remaining: Vec<UserId> =
                chat.members.into_iter().filter(|m| *m != actor).collect();
            db.set_chat_members(chat_id, &remaining)?;

            if chat.creator == Some(actor) {
                let next = remaining[rand::thread_rng().gen_range(0..remaining.len())];
                db.set_chat_creator(chat_id, next)?;
            }
            Ok(remaining)
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => ApiError::Validation(format!(
                "A group needs at least {MIN_GROUP_MEMBERS} members"
            )),
            other => other,
        })?;

    state
        .fanout
        .dispatch(
            &remaining,
            ServerEvent::Alert {
                message: format!("{} left the group", user.name),
                chat_id: Some(chat_id),
            },
        )
        .await;
    state
        .fanout
        .dispatch(&remaining, ServerEvent::RefetchChats)
        .await;

    info!(chat_id = %chat_id, user = %actor, "Left group");
    Ok(Json(serde_json::json!({ "success": true, "message": "Left the group" })))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// `POST /api/v1/chat/message`.  Multipart upload: a `chatId` field plus
/// 1..=5 `files`.  Blobs land on disk first; the pipeline persists and
/// then delivers.
pub async fn send_attachments(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut chat_id: Option<ChatId> = None;
    let mut attachments: Vec<Attachment> = Vec::new();

    // Any failure while reading parts must remove the blobs already stored.
    if let Err(e) = read_attachment_parts(&state, multipart, &mut chat_id, &mut attachments).await {
        cleanup_blobs(&state, &attachments).await;
        return Err(e);
    }

    let Some(chat_id) = chat_id else {
        cleanup_blobs(&state, &attachments).await;
        return Err(ApiError::Validation("Missing chatId field".to_string()));
    };
    if attachments.is_empty() {
        return Err(ApiError::Validation("No files attached".to_string()));
    }

    let refs: Vec<String> = attachments.iter().map(|a| a.blob_ref.clone()).collect();
    if let Err(e) = state
        .ingest
        .send_attachment_message(&user, chat_id, attachments)
        .await
    {
        let _ = state.blob_store.delete_blobs(&refs).await;
        return Err(e);
    }

    Ok(Json(serde_json::json!({ "success": true, "message": "Files sent" })))
}

async fn read_attachment_parts(
    state: &AppState,
    mut multipart: Multipart,
    chat_id: &mut Option<ChatId>,
    attachments: &mut Vec<Attachment>,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "chatId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read field: {e}")))?;
                *chat_id = Some(
                    ChatId::parse(&text)
                        .map_err(|_| ApiError::Validation("Invalid chat id".to_string()))?,
                );
            }
            "files" => {
                if attachments.len() >= MAX_ATTACHMENTS {
                    return Err(ApiError::Validation(format!(
                        "At most {MAX_ATTACHMENTS} files per message"
                    )));
                }
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read file: {e}")))?;
                let stored = state.blob_store.store_blob(&data, &mime).await?;
                attachments.push(Attachment {
                    blob_ref: stored.id.to_string(),
                    url: stored.public_url,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

async fn cleanup_blobs(state: &AppState, attachments: &[Attachment]) {
    let refs: Vec<String> = attachments.iter().map(|a| a.blob_ref.clone()).collect();
    let _ = state.blob_store.delete_blobs(&refs).await;
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

/// `GET /api/v1/chat/messages/:id?page=N`.  Newest first, 20 per page.
pub async fn chat_messages(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = user.id;
    let page = query.page.max(1);

    let (messages, total) = state
        .with_db(move |db| {
            if !db.is_member(chat_id, user_id)? {
                return Err(StoreError::NotFound);
            }
            let offset = (page - 1).saturating_mul(MESSAGES_PER_PAGE);
            let messages = db.messages_for_chat(chat_id, MESSAGES_PER_PAGE, offset)?;
            let total = db.count_messages_for_chat(chat_id)?;
            Ok((messages, total))
        })
        .await?;

    let per_page = u64::from(MESSAGES_PER_PAGE);
    Ok(Json(HistoryResponse {
        messages,
        total_pages: total.div_ceil(per_page),
    }))
}

// ---------------------------------------------------------------------------
// Chat details / rename / delete
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ChatDetails {
    #[serde(rename = "_id")]
    pub id: ChatId,
    pub name: String,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    pub creator: Option<UserId>,
    pub members: Vec<SenderSummary>,
}

/// `GET /api/v1/chat/:id`.  Members-only, with member profiles attached.
pub async fn chat_details(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<ChatDetails>, ApiError> {
    let user_id = user.id;

    let (chat, members) = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            if !chat.members.contains(&user_id) {
                return Err(StoreError::NotFound);
            }
            let mut members = Vec::new();
            for member in &chat.members {
                members.push(db.get_user(*member)?);
            }
            Ok((chat, members))
        })
        .await?;

    Ok(Json(ChatDetails {
        id: chat.id,
        name: chat.name,
        is_group: chat.is_group,
        creator: chat.creator,
        members: members
            .into_iter()
            .map(|u| SenderSummary {
                id: u.id,
                name: u.name,
                avatar: u.avatar_url,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub name: String,
}

/// `PUT /api/v1/chat/:id`.  Creator-only group rename.
pub async fn rename_group(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<RenameBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".to_string()));
    }

    let actor = user.id;
    let rename_to = name.clone();
    let members = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            require_group_creator(&chat, actor)?;
            if db.group_name_taken(actor, &rename_to)? {
                return Err(StoreError::Conflict);
            }
            db.rename_chat(chat_id, &rename_to)?;
            Ok(chat.members)
        })
        .await
        .map_err(|e| match e {
            ApiError::Validation(_) => {
                ApiError::Validation("You already created a group with this name".to_string())
            }
            other => other,
        })?;

    state.fanout.dispatch(&members, ServerEvent::RefetchChats).await;

    info!(chat_id = %chat_id, name = %name, "Group renamed");
    Ok(Json(serde_json::json!({ "success": true, "message": "Group renamed" })))
}

/// `DELETE /api/v1/chat/:id`.  Groups are creator-only; either member can
/// delete a direct chat.  Attachment blobs are removed after the rows.
pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = user.id;

    let (members, blob_refs) = state
        .with_db(move |db| {
            let chat = db.get_chat(chat_id)?;
            if chat.is_group {
                require_group_creator(&chat, actor)?;
            } else if !chat.members.contains(&actor) {
                return Err(StoreError::NotFound);
            }

            let blob_refs: Vec<String> = db
                .attachments_for_chat(chat_id)?
                .into_iter()
                .map(|a| a.blob_ref)
                .collect();
            db.delete_chat(chat_id)?;
            Ok((chat.members, blob_refs))
        })
        .await?;

    let deleted = state.blob_store.delete_blobs(&blob_refs).await?;
    state.fanout.dispatch(&members, ServerEvent::RefetchChats).await;

    info!(chat_id = %chat_id, blobs = deleted, "Chat deleted");
    Ok(Json(serde_json::json!({ "success": true, "message": "Chat deleted" })))
}

/// Group mutations require the acting user to be the group's creator.
fn require_group_creator(chat: &Chat, actor: UserId) -> Result<(), StoreError> {
    if !chat.is_group {
        return Err(StoreError::NotFound);
    }
    if chat.creator != Some(actor) {
        return Err(StoreError::NotFound);
    }
    Ok(())
}
