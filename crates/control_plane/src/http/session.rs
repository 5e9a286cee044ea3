//! Cookie-backed operator sessions.
//!
//! Credentials are verified against a SHA-256 digest supplied through the
//! environment; the plaintext secret never lives in memory longer than the
//! login request. Session cookies carry `<sid>.<sig>` where the signature
//! binds the random session id to the server's signing secret, so a cookie
//! fabricated without the secret never validates even if the id leaks.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Cookie name carrying the session token.
pub const SESSION_COOKIE: &str = "warden_session";

/// One authenticated operator session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory session registry plus credential verification.
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    signing_secret: String,
    admin_hash: String,
}

impl SessionStore {
    /// `admin_hash` is the hex SHA-256 digest of the operator credential;
    /// `signing_secret` signs cookie tokens.
    pub fn new(signing_secret: String, admin_hash: String) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            signing_secret,
            admin_hash,
        }
    }

    /// Checks a submitted credential against the stored digest. Comparison
    /// runs over the full digest regardless of where a mismatch occurs.
    pub fn verify_credential(&self, candidate: &str) -> bool {
        let digest = hex_sha256(candidate.as_bytes());
        constant_time_eq(digest.as_bytes(), self.admin_hash.as_bytes())
    }

    /// Creates a session and returns its signed cookie token.
    pub async fn create_session(&self) -> String {
        let sid = Uuid::new_v4().to_string();
        let token = format!("{sid}.{}", self.sign(&sid));
        self.sessions.write().await.insert(
            sid.clone(),
            Session {
                id: sid,
                created_at: chrono::Utc::now(),
            },
        );
        token
    }

    /// Validates a cookie token: signature first, then registry membership.
    pub async fn validate_token(&self, token: &str) -> bool {
        let Some((sid, sig)) = token.split_once('.') else {
            return false;
        };
        if !constant_time_eq(self.sign(sid).as_bytes(), sig.as_bytes()) {
            return false;
        }
        self.sessions.read().await.contains_key(sid)
    }

    /// Drops a session so its token stops validating.
    pub async fn revoke(&self, token: &str) {
        if let Some((sid, _)) = token.split_once('.') {
            self.sessions.write().await.remove(sid);
        }
    }

    fn sign(&self, sid: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(sid.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn hex_sha256(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Length-safe comparison without early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        // sha256("hunter2")
        SessionStore::new(
            "signing-secret".to_string(),
            hex_sha256(b"hunter2"),
        )
    }

    #[test]
    fn test_verify_credential() {
        let store = store();
        assert!(store.verify_credential("hunter2"));
        assert!(!store.verify_credential("hunter3"));
        assert!(!store.verify_credential(""));
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store();
        let token = store.create_session().await;
        assert!(store.validate_token(&token).await);

        store.revoke(&token).await;
        assert!(!store.validate_token(&token).await);
    }

    #[tokio::test]
    async fn test_forged_tokens_rejected() {
        let store = store();
        let token = store.create_session().await;
        let (sid, _sig) = token.split_once('.').unwrap();

        // Right id, wrong signature
        assert!(!store.validate_token(&format!("{sid}.deadbeef")).await);
        // Unknown id signed by nobody
        assert!(!store.validate_token("other-sid.deadbeef").await);
        // Structurally invalid
        assert!(!store.validate_token("garbage").await);
        assert!(!store.validate_token("").await);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
