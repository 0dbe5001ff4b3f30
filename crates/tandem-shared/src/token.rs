//! Compact access tokens.
//!
//! The auth service signs `{user_id, username, expires_at}` with its Ed25519
//! key; the chat server only needs the matching public key to resolve a
//! token back to an [`Identity`]. On the wire a token is the URL-safe base64
//! (unpadded) encoding of its JSON form, so it fits in a query string.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::{Identity, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: UserId,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    /// Hex-encoded Ed25519 signature over [`signing_payload`].
    pub signature: String,
}

impl AccessToken {
    pub fn encode(&self) -> String {
        // Serializing a struct of plain strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

// payload = user_id (big-endian i64) || len(username) (big-endian u32)
//           || username || expires_at (rfc3339)
fn signing_payload(user_id: UserId, username: &str, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12 + username.len() + 32);
    payload.extend_from_slice(&user_id.0.to_be_bytes());
    payload.extend_from_slice(&(username.len() as u32).to_be_bytes());
    payload.extend_from_slice(username.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Check expiry and signature, returning the identity the token vouches for.
pub fn verify_access_token(
    token: &AccessToken,
    auth_server_pubkey: &[u8; 32],
) -> Result<Identity, TokenError> {
    if Utc::now() > token.expires_at {
        return Err(TokenError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(auth_server_pubkey).map_err(|_| TokenError::InvalidKey)?;

    let sig_bytes =
        hex::decode(&token.signature).map_err(|e| TokenError::Malformed(e.to_string()))?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| TokenError::BadSignature)?;

    let payload = signing_payload(token.user_id, &token.username, &token.expires_at);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(Identity {
        user_id: token.user_id,
        username: token.username.clone(),
    })
}

/// Decode and verify a raw token string in one step.
pub fn resolve_token(raw: &str, auth_server_pubkey: &[u8; 32]) -> Result<Identity, TokenError> {
    if raw.trim().is_empty() {
        return Err(TokenError::Missing);
    }
    let token = AccessToken::decode(raw)?;
    verify_access_token(&token, auth_server_pubkey)
}

pub fn issue_access_token(
    identity: &Identity,
    expires_at: DateTime<Utc>,
    auth_server_signing_key: &ed25519_dalek::SigningKey,
) -> AccessToken {
    use ed25519_dalek::Signer;

    let payload = signing_payload(identity.user_id, &identity.username, &expires_at);
    let signature = auth_server_signing_key.sign(&payload);

    AccessToken {
        user_id: identity.user_id,
        username: identity.username.clone(),
        expires_at,
        signature: hex::encode(signature.to_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn ada() -> Identity {
        Identity {
            user_id: UserId(42),
            username: "ada".into(),
        }
    }

    #[test]
    fn test_token_valid() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();

        let token = issue_access_token(&ada(), Utc::now() + Duration::hours(1), &server_key);
        let identity = resolve_token(&token.encode(), &server_pubkey).unwrap();

        assert_eq!(identity, ada());
    }

    #[test]
    fn test_token_expired() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();

        let token = issue_access_token(&ada(), Utc::now() - Duration::minutes(1), &server_key);

        assert!(matches!(
            verify_access_token(&token, &server_pubkey),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_token_wrong_server_key() {
        let server_key = SigningKey::generate(&mut OsRng);
        let wrong_key = SigningKey::generate(&mut OsRng);
        let wrong_pubkey = wrong_key.verifying_key().to_bytes();

        let token = issue_access_token(&ada(), Utc::now() + Duration::hours(1), &server_key);

        assert!(matches!(
            verify_access_token(&token, &wrong_pubkey),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_token_tampered_identity() {
        let server_key = SigningKey::generate(&mut OsRng);
        let server_pubkey = server_key.verifying_key().to_bytes();

        let mut token = issue_access_token(&ada(), Utc::now() + Duration::hours(1), &server_key);
        token.user_id = UserId(1);

        assert!(verify_access_token(&token, &server_pubkey).is_err());
    }

    #[test]
    fn test_token_garbage_and_missing() {
        let pubkey = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();

        assert!(matches!(resolve_token("", &pubkey), Err(TokenError::Missing)));
        assert!(matches!(
            resolve_token("%%%not-base64%%%", &pubkey),
            Err(TokenError::Malformed(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            resolve_token(&not_json, &pubkey),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_username_is_length_prefixed() {
        let at = Utc::now();
        let payload = signing_payload(UserId(7), "ada", &at);
        assert_eq!(&payload[8..12], &3u32.to_be_bytes());
        assert_eq!(&payload[12..15], b"ada");
        assert_eq!(&payload[15..], at.to_rfc3339().as_bytes());

        let shorter = signing_payload(UserId(7), "ad", &at);
        assert_eq!(&shorter[8..12], &2u32.to_be_bytes());
    }
}
