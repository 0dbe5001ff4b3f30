//! Credential resolution for inbound connections and API calls.

use axum::http::HeaderMap;

use tandem_shared::error::TokenError;
use tandem_shared::token::resolve_token;
use tandem_shared::types::Identity;

/// Resolves a raw bearer credential to the user it belongs to.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, raw: &str) -> Result<Identity, TokenError>;
}

/// Verifies access tokens signed by the auth service's Ed25519 key.
#[derive(Debug, Clone)]
pub struct Ed25519TokenVerifier {
    auth_server_pubkey: [u8; 32],
}

impl Ed25519TokenVerifier {
    pub fn new(auth_server_pubkey: [u8; 32]) -> Self {
        Self { auth_server_pubkey }
    }
}

impl TokenVerifier for Ed25519TokenVerifier {
    fn verify(&self, raw: &str) -> Result<Identity, TokenError> {
        resolve_token(raw, &self.auth_server_pubkey)
    }
}

/// Pull the credential out of an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, TokenError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(TokenError::Missing)?;

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
    if token.is_empty() {
        return Err(TokenError::Missing);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tandem_shared::token::issue_access_token;
    use tandem_shared::types::UserId;

    #[test]
    fn test_verifier_accepts_signed_token() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = Ed25519TokenVerifier::new(key.verifying_key().to_bytes());
        let identity = Identity {
            user_id: UserId(9),
            username: "grace".into(),
        };

        let token = issue_access_token(&identity, Utc::now() + Duration::hours(1), &key);
        assert_eq!(verifier.verify(&token.encode()).unwrap(), identity);
    }

    #[test]
    fn test_dev_key_rejects_everything() {
        let key = SigningKey::generate(&mut OsRng);
        let verifier = Ed25519TokenVerifier::new([0u8; 32]);
        let identity = Identity {
            user_id: UserId(9),
            username: "grace".into(),
        };

        let token = issue_access_token(&identity, Utc::now() + Duration::hours(1), &key);
        assert!(verifier.verify(&token.encode()).is_err());
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(TokenError::Missing)));

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");

        headers.insert("authorization", "Bearer   ".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(TokenError::Missing)));
    }
}
