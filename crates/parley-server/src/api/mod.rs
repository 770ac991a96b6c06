//! HTTP surface: router assembly plus the blob and health endpoints.
//!
//! Signup, login and blob downloads are public; everything else under
//! `/api/v1` sits behind the session middleware.  The WebSocket route
//! authenticates inside its own handler so it stays outside the layer.

pub mod chats;
pub mod users;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::auth_middleware;
use crate::error::ApiError;
use crate::rate_limit::rate_limit_middleware;
use crate::socket::ws_handler;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let user_routes = Router::new()
        .route("/new", post(users::signup))
        .route("/login", post(users::login))
        .merge(
            Router::new()
                .route("/logout", get(users::logout))
                .route("/me", get(users::me))
                .route("/search", get(users::search))
                .route("/sendrequest", put(users::send_request))
                .route("/acceptrequest", put(users::accept_request))
                .route("/notifications", get(users::notifications))
                .route("/friends", get(users::friends))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        );

    let chat_routes = Router::new()
        .route("/new", post(chats::new_group))
        .route("/my", get(chats::my_chats))
        .route("/my/groups", get(chats::my_groups))
        .route("/addmembers", put(chats::add_members))
        .route("/removemember", put(chats::remove_member))
        .route("/leave/:id", delete(chats::leave_group))
        .route("/message", post(chats::send_attachments))
        .route("/messages/:id", get(chats::chat_messages))
        .route(
            "/:id",
            get(chats::chat_details)
                .put(chats::rename_group)
                .delete(chats::delete_chat),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/v1/blob/:id", get(blob_download))
        .nest("/api/v1/user", user_routes)
        .nest("/api/v1/chat", chat_routes)
        .layer(DefaultBodyLimit::max(state.config.max_blob_size))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: String,
    version: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn blob_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (data, mime_type) = state.blob_store.get_blob(id).await?;
    Ok(([(header::CONTENT_TYPE, mime_type)], data).into_response())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}
