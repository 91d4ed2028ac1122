//! CSRF token issuance and verification
//!
//! Tokens are 32 bytes from the operating system RNG, hex encoded (64
//! characters). The global token lives under `csrf_token`; namespaced tokens
//! such as `edit_user_42` live under `csrf_token_edit_user_42` and never
//! satisfy a check for another namespace.

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::session::Session;

/// Form field carrying the token
pub const CSRF_FORM_FIELD: &str = "csrf_token";
/// Headers accepted for the token, in order of preference
pub const CSRF_HEADERS: [&str; 2] = ["x-csrf-token", "x-xsrf-token"];

const TOKEN_BYTES: usize = 32;

/// 32 random bytes as 64 lowercase hex characters
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session key for a namespace; `None` is the global token
pub fn token_key(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}_{}", CSRF_FORM_FIELD, ns),
        _ => CSRF_FORM_FIELD.to_string(),
    }
}

/// Constant-time string comparison
pub fn tokens_match(candidate: &str, expected: &str) -> bool {
    bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
}

/// Per-session token operations
pub struct TokenManager;

impl TokenManager {
    /// Current token for the namespace, issuing one on first use
    pub async fn token(session: &Session, namespace: Option<&str>) -> String {
        let key = token_key(namespace);
        if let Some(existing) = session.read(|data| data.csrf_tokens.get(&key).cloned()).await {
            return existing;
        }

        session
            .update(|data| {
                data.csrf_tokens
                    .entry(key)
                    .or_insert_with(random_token)
                    .clone()
            })
            .await
    }

    /// Replace the namespace's token with a fresh one
    pub async fn regenerate(session: &Session, namespace: Option<&str>) -> String {
        let key = token_key(namespace);
        let token = random_token();
        session
            .update(|data| data.csrf_tokens.insert(key, token.clone()))
            .await;
        token
    }

    /// Check a submitted token against the session.
    ///
    /// A session without a token for the namespace never verifies.
    pub async fn verify(session: &Session, namespace: Option<&str>, candidate: &str) -> bool {
        let key = token_key(namespace);
        let expected = session.read(|data| data.csrf_tokens.get(&key).cloned()).await;
        match expected {
            Some(expected) if !expected.is_empty() => tokens_match(candidate, &expected),
            _ => false,
        }
    }

    /// Verify a namespaced token, rotating it when the check fails
    pub async fn verify_or_rotate(session: &Session, namespace: &str, candidate: &str) -> bool {
        if Self::verify(session, Some(namespace), candidate).await {
            return true;
        }
        Self::regenerate(session, Some(namespace)).await;
        false
    }
}
