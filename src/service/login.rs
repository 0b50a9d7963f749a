//! Login and session collaborators consumed by the handshake coordinator.
//!
//! The coordinator never talks to storage or a user database directly: each
//! authentication method delegates to one of the async traits here. The
//! in-memory implementations at the bottom are suitable for tests and
//! single-process deployments; production backends implement the same
//! traits over their own storage.
//!
//! Every mutating session operation must be atomic in the backing store:
//! concurrent resumption or close of the same session across connections
//! must not both succeed.

use crate::error::{constants, Result, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use x25519_dalek::StaticSecret;

/// An authenticated principal bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub agent: Option<String>,
}

/// Server-side SRP enrollment record for one user.
#[derive(Debug, Clone)]
pub struct SrpUserRecord {
    pub salt: Vec<u8>,
    /// Password verifier `v`, big-endian
    pub verifier: Vec<u8>,
}

/// A server-side session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user: String,
    pub agent: Option<String>,
    /// Public key the session was bound to at login; resumption proofs are
    /// verified against it.
    pub bound_public_key: Option<Vec<u8>>,
    /// Opaque step-up payload (e.g. a pending 2FA challenge). The caller
    /// must not treat the session as fully privileged until it clears.
    pub additional_login_step: Option<Vec<u8>>,
}

/// Identity binding for the anonymous and signed ECDH flows.
#[async_trait]
pub trait EcdheLogin: Send + Sync {
    /// Bind an identity to a fresh ephemeral public key.
    async fn bind(&self, public_key: &[u8], agent: Option<&str>) -> Result<Identity>;
}

/// Signature verification for the signed handshake proofs (`ecdhex`,
/// `session`, `key_exchange`). The message is domain-separated by the
/// coordinator; implementations only check the signature against the key.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()>;
}

/// SRP user lookup and login confirmation.
#[async_trait]
pub trait SrpLogin: Send + Sync {
    /// Fetch the salt and verifier for an identity on a given host.
    async fn lookup(&self, identity: &str, host: &str) -> Result<SrpUserRecord>;

    /// Called once the password proof has been verified. May return an
    /// opaque additional-login-step payload (e.g. 2FA).
    async fn confirmed(&self, identity: &str, session_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Key-possession login: the server encrypts a chosen secret to the
/// client's known public key; decrypting it proves possession.
#[async_trait]
pub trait KeyLogin: Send + Sync {
    /// Encrypt `value` so that only the holder of `public_key` can recover
    /// it.
    async fn encrypt_to(&self, public_key: &[u8], value: &[u8]) -> Result<Vec<u8>>;

    /// Called once possession has been proven.
    async fn confirmed(&self, public_key: &[u8], session_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Transactional session storage shared across connections.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session row, generating an id when `record.id` is empty.
    /// Creating with an existing id replaces that row (the SRP flow uses
    /// this to bind the session key once the password proof has passed).
    async fn create(&self, record: SessionRecord) -> Result<String>;
    async fn restore(&self, id: &str) -> Result<Option<SessionRecord>>;
    async fn close(&self, id: &str) -> Result<()>;
    /// Remove a session and everything bound to it (failed login path).
    async fn destroy(&self, id: &str) -> Result<()>;
}

/// Injected predicate re-validating a session at ticket redemption.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, session_id: &str) -> bool;
}

/// Named long-lived server ECDH keys for the `ecdhef` flow.
pub trait StaticKeystore: Send + Sync {
    fn lookup(&self, key_id: &str) -> Option<StaticSecret>;
}

/// In-memory session store. Operations are atomic under one mutex, which
/// satisfies the single-document atomicity the coordinator requires.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, mut record: SessionRecord) -> Result<String> {
        let mut sessions = self.sessions.lock().await;
        if record.id.is_empty() {
            let id = u64::from_be_bytes(crate::core::crypto::random_bytes::<8>());
            record.id = format!("{id:016x}");
        }
        let id = record.id.clone();
        sessions.insert(id.clone(), record);
        Ok(id)
    }

    async fn restore(&self, id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(id).cloned())
    }

    async fn close(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| TransportError::Authentication(constants::ERR_UNKNOWN_SESSION.into()))
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(id);
        Ok(())
    }
}

/// In-memory keystore mapping key ids to static secrets.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: HashMap<String, StaticSecret>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, key_id: S, secret: StaticSecret) {
        self.keys.insert(key_id.into(), secret);
    }
}

impl StaticKeystore for MemoryKeystore {
    fn lookup(&self, key_id: &str) -> Option<StaticSecret> {
        self.keys.get(key_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            user: "alice".into(),
            agent: None,
            bound_public_key: None,
            additional_login_step: None,
        }
    }

    #[tokio::test]
    async fn create_restore_close() {
        let store = MemorySessionStore::new();
        let id = store.create(record("s-1")).await.unwrap();
        assert_eq!(id, "s-1");

        let restored = store.restore("s-1").await.unwrap().unwrap();
        assert_eq!(restored.user, "alice");

        store.close("s-1").await.unwrap();
        assert!(store.restore("s-1").await.unwrap().is_none());
        assert!(store.close("s-1").await.is_err());
    }

    #[tokio::test]
    async fn empty_id_gets_generated() {
        let store = MemorySessionStore::new();
        let id = store.create(record("")).await.unwrap();
        assert_eq!(id.len(), 16);
        assert!(store.restore(&id).await.unwrap().is_some());
    }
}
