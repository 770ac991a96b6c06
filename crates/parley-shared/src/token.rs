//! Signed session tokens.
//!
//! A token is issued at login, carried back in the `parley-session` cookie
//! (or an `Authorization: Bearer` header), and verified by one routine
//! shared between the HTTP middleware and the WebSocket handshake.  The
//! payload is `user_id bytes || expires_at (RFC 3339)`, signed with the
//! server's Ed25519 key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

/// A session credential presented by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl SessionToken {
    /// Encode for cookie/header transport (URL-safe base64 of the JSON body).
    pub fn encode(&self) -> String {
        // Serialization of a plain struct cannot fail.
        let json = serde_json::to_vec(self).expect("token serialization");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token from its transport form.
    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)
    }
}

fn signing_payload(user_id: &UserId, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Issue a session token for a user.
pub fn create_session_token(
    user_id: UserId,
    expires_at: DateTime<Utc>,
    signing_key: &SigningKey,
) -> SessionToken {
    let signature = signing_key.sign(&signing_payload(&user_id, &expires_at));

    SessionToken {
        user_id,
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Verify signature and expiry; returns the user id the token vouches for.
pub fn verify_session_token(
    token: &SessionToken,
    server_key: &VerifyingKey,
) -> Result<UserId, TokenError> {
    if Utc::now() > token.expires_at {
        return Err(TokenError::Expired);
    }

    let signature =
        Signature::from_slice(&token.signature).map_err(|_| TokenError::Malformed)?;

    server_key
        .verify(&signing_payload(&token.user_id, &token.expires_at), &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    Ok(token.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::OsRng;

    #[test]
    fn test_token_valid() {
        let key = SigningKey::generate(&mut OsRng);
        let user = UserId::new();

        let token = create_session_token(user, Utc::now() + Duration::days(15), &key);

        let verified = verify_session_token(&token, &key.verifying_key()).unwrap();
        assert_eq!(verified, user);
    }

    #[test]
    fn test_token_expired() {
        let key = SigningKey::generate(&mut OsRng);
        let token = create_session_token(UserId::new(), Utc::now() - Duration::hours(1), &key);

        assert!(matches!(
            verify_session_token(&token, &key.verifying_key()),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_token_wrong_server_key() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let token = create_session_token(UserId::new(), Utc::now() + Duration::days(1), &key);

        assert!(matches!(
            verify_session_token(&token, &other.verifying_key()),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_token_tampered_user_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let mut token = create_session_token(UserId::new(), Utc::now() + Duration::days(1), &key);
        token.user_id = UserId::new();

        assert!(verify_session_token(&token, &key.verifying_key()).is_err());
    }

    #[test]
    fn test_token_encode_decode() {
        let key = SigningKey::generate(&mut OsRng);
        let token = create_session_token(UserId::new(), Utc::now() + Duration::days(1), &key);

        let decoded = SessionToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded.user_id, token.user_id);
        assert_eq!(decoded.signature, token.signature);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(SessionToken::decode("not-a-token").is_err());
    }
}
