//! Session authentication shared by the REST surface and the WebSocket
//! handshake.
//!
//! Credentials arrive either as the `parley-session` cookie or as an
//! `Authorization: Bearer` header.  Both paths funnel through the same
//! verification routine, and every failure collapses to one uniform
//! rejection so callers learn nothing about which check tripped.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use tracing::debug;

use parley_shared::constants::SESSION_COOKIE;
use parley_shared::token::{create_session_token, verify_session_token, SessionToken};
use parley_shared::types::UserId;
use parley_store::models::User;

use crate::error::ApiError;
use crate::state::AppState;

/// The verified caller, stashed in request extensions by the middleware.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub User);

/// Pull the encoded session token out of the request headers.  Cookie
/// first, Bearer header as the fallback for non-browser clients.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookies) = cookie_header.to_str() {
            for pair in cookies.split(';') {
                let pair = pair.trim();
                if let Some(value) = pair.strip_prefix(SESSION_COOKIE) {
                    if let Some(value) = value.strip_prefix('=') {
                        if !value.is_empty() {
                            return Some(value.to_string());
                        }
                    }
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Verify the presented credential and load the account it vouches for.
///
/// Used by the HTTP middleware and directly by the WebSocket handshake,
/// which must reject before upgrading.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let encoded = extract_token(headers).ok_or(ApiError::Authentication)?;

    let token = SessionToken::decode(&encoded).map_err(|e| {
        debug!(error = %e, "session token rejected");
        ApiError::Authentication
    })?;

    let user_id = verify_session_token(&token, &state.verifying_key()).map_err(|e| {
        debug!(error = %e, "session token rejected");
        ApiError::Authentication
    })?;

    // Token may outlive the account.
    state
        .with_db(move |db| db.get_user(user_id))
        .await
        .map_err(|_| ApiError::Authentication)
}

/// Issue a fresh session token and the Set-Cookie value carrying it.
pub fn issue_session(state: &AppState, user_id: UserId) -> (String, String) {
    let expires_at = Utc::now() + Duration::days(state.config.session_ttl_days);
    let token = create_session_token(user_id, expires_at, &state.signing_key);
    let encoded = token.encode();
    let cookie = format!(
        "{SESSION_COOKIE}={encoded}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        state.config.session_ttl_days * 86_400
    );
    (encoded, cookie)
}

/// Set-Cookie value that clears the session on logout.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Middleware guarding every route behind `/api/v1` except signup, login
/// and blob fetches.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(AuthedUser(user));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; parley-session=abc123; lang=en"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_extract_token_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer xyz789"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz789"));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("parley-session=from-cookie"),
        );
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_missing_token() {
        let headers = HeaderMap::new();
        assert!(extract_token(&headers).is_none());
    }

    #[test]
    fn test_empty_cookie_value_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("parley-session="));
        assert!(extract_token(&headers).is_none());
    }
}
