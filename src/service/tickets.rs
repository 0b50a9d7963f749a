//! Ticket-based session resumption.
//!
//! A ticket is a 32-byte opaque value: a random 16-byte IV followed by the
//! single-block AES-256-CBC encryption of a 16-byte `ticket_data_id` under
//! the long-lived server-wide ticket key. Many tickets from one issuance
//! batch point at the same persisted row; each is independently unlinkable
//! because its IV differs.
//!
//! Redemption is single-use: the row is atomically taken from the store, so
//! two connections racing on the same ticket resolve to at most one
//! success. Every failure mode (wrong length, bad decrypt, missing row,
//! expired row) reports the same "invalid ticket" error so redemption
//! cannot be used as an oracle.

use crate::core::crypto::{cbc_decrypt_block, cbc_encrypt_block, random_bytes};
use crate::error::{constants, Result, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Hard cap on tickets issued per batch (requests above it are clamped).
pub const TICKET_BATCH_LIMIT: usize = 50;

/// Encoded ticket length: IV ‖ encrypted ticket_data_id.
pub const TICKET_LEN: usize = 32;

/// State restored when a ticket is redeemed.
#[derive(Clone)]
pub struct TicketData {
    pub session_id: String,
    pub agent: Option<String>,
    pub master_secret: Zeroizing<Vec<u8>>,
    pub created: SystemTime,
}

impl std::fmt::Debug for TicketData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketData")
            .field("session_id", &self.session_id)
            .field("agent", &self.agent)
            .field("created", &self.created)
            .finish()
    }
}

/// Storage behind the ticket service, shared across connections.
///
/// `take` must be atomic (delete-and-return): racing redemptions of the
/// same id must yield the row to at most one caller.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn put(&self, id: [u8; 16], data: TicketData) -> Result<()>;
    async fn take(&self, id: &[u8; 16]) -> Result<Option<TicketData>>;
    /// Remove rows older than `ttl`; returns how many were removed.
    async fn sweep(&self, ttl: Duration) -> Result<usize>;
}

/// In-memory ticket store. One mutex makes `take` atomic.
#[derive(Default)]
pub struct MemoryTicketStore {
    rows: Mutex<HashMap<[u8; 16], TicketData>>,
}

impl MemoryTicketStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live rows (for tests and stats).
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn put(&self, id: [u8; 16], data: TicketData) -> Result<()> {
        self.rows.lock().await.insert(id, data);
        Ok(())
    }

    async fn take(&self, id: &[u8; 16]) -> Result<Option<TicketData>> {
        Ok(self.rows.lock().await.remove(id))
    }

    async fn sweep(&self, ttl: Duration) -> Result<usize> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, data| match data.created.elapsed() {
            Ok(age) => age <= ttl,
            // Clock went backwards: treat as expired
            Err(_) => false,
        });
        Ok(before - rows.len())
    }
}

/// Issues and redeems opaque single-use resumption tickets.
#[derive(Clone)]
pub struct TicketService {
    ticket_key: [u8; 32],
    ttl: Duration,
    store: Arc<dyn TicketStore>,
}

impl TicketService {
    pub fn new(ticket_key: [u8; 32], ttl: Duration, store: Arc<dyn TicketStore>) -> Self {
        Self {
            ticket_key,
            ttl,
            store,
        }
    }

    /// Ticket lifetime in whole seconds, as advertised to clients.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Issue up to `count` tickets (clamped to [`TICKET_BATCH_LIMIT`]) all
    /// pointing at one persisted copy of `data`.
    pub async fn issue(&self, count: usize, data: TicketData) -> Result<Vec<Vec<u8>>> {
        let count = count.min(TICKET_BATCH_LIMIT);
        if count == 0 {
            return Ok(Vec::new());
        }

        let data_id = random_bytes::<16>();
        self.store.put(data_id, data).await?;

        let tickets = (0..count)
            .map(|_| {
                let iv = random_bytes::<16>();
                let ciphertext = cbc_encrypt_block(&self.ticket_key, &iv, &data_id);
                let mut ticket = Vec::with_capacity(TICKET_LEN);
                ticket.extend_from_slice(&iv);
                ticket.extend_from_slice(&ciphertext);
                ticket
            })
            .collect();

        debug!(count, "tickets issued");
        Ok(tickets)
    }

    /// Redeem a ticket exactly once, returning the restored data.
    ///
    /// # Errors
    /// Uniform "invalid ticket" authentication error for every failure
    /// cause; the caller learns nothing about which check failed.
    pub async fn redeem(&self, ticket_id: &[u8]) -> Result<TicketData> {
        if ticket_id.len() != TICKET_LEN {
            return Err(invalid_ticket());
        }

        let mut iv = [0u8; 16];
        let mut ciphertext = [0u8; 16];
        iv.copy_from_slice(&ticket_id[..16]);
        ciphertext.copy_from_slice(&ticket_id[16..]);
        let data_id = cbc_decrypt_block(&self.ticket_key, &iv, &ciphertext);

        // A bad decrypt yields a random id that simply is not found.
        let data = self.store.take(&data_id).await?.ok_or_else(invalid_ticket)?;

        if data.created.elapsed().map(|age| age > self.ttl).unwrap_or(true) {
            trace!("expired ticket presented");
            return Err(invalid_ticket());
        }

        // Opportunistic cleanup while we are here
        let _ = self.store.sweep(self.ttl).await;

        Ok(data)
    }

    /// Explicit TTL sweep, for callers running it periodically.
    pub async fn sweep(&self) -> Result<usize> {
        self.store.sweep(self.ttl).await
    }
}

fn invalid_ticket() -> TransportError {
    TransportError::Authentication(constants::ERR_INVALID_TICKET.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(ttl: Duration) -> (TicketService, Arc<MemoryTicketStore>) {
        let store = MemoryTicketStore::new();
        (
            TicketService::new([9u8; 32], ttl, store.clone()),
            store,
        )
    }

    fn data() -> TicketData {
        TicketData {
            session_id: "session-1".into(),
            agent: Some("client/1.0".into()),
            master_secret: Zeroizing::new(vec![0x55; 48]),
            created: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn batch_shares_one_row_but_tickets_differ() {
        let (service, store) = service(Duration::from_secs(60));
        let tickets = service.issue(10, data()).await.unwrap();

        assert_eq!(tickets.len(), 10);
        assert_eq!(store.len().await, 1);
        for ticket in &tickets {
            assert_eq!(ticket.len(), TICKET_LEN);
        }
        let mut unique = tickets.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test]
    async fn redeem_is_single_use() {
        let (service, _) = service(Duration::from_secs(60));
        let tickets = service.issue(2, data()).await.unwrap();

        let restored = service.redeem(&tickets[0]).await.unwrap();
        assert_eq!(restored.session_id, "session-1");

        // Same ticket again fails; the sibling fails too because the batch
        // row has been burned.
        assert!(service.redeem(&tickets[0]).await.is_err());
        assert!(service.redeem(&tickets[1]).await.is_err());
    }

    #[tokio::test]
    async fn count_is_clamped() {
        let (service, _) = service(Duration::from_secs(60));
        let tickets = service.issue(1000, data()).await.unwrap();
        assert_eq!(tickets.len(), TICKET_BATCH_LIMIT);
    }

    #[tokio::test]
    async fn zero_count_persists_nothing() {
        let (service, store) = service(Duration::from_secs(60));
        let tickets = service.issue(0, data()).await.unwrap();
        assert!(tickets.is_empty());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn wrong_length_rejected() {
        let (service, _) = service(Duration::from_secs(60));
        assert!(service.redeem(&[0u8; 31]).await.is_err());
        assert!(service.redeem(&[0u8; 33]).await.is_err());
        assert!(service.redeem(&[]).await.is_err());
    }

    #[tokio::test]
    async fn expired_ticket_rejected_and_swept() {
        let (service, store) = service(Duration::from_millis(10));
        let tickets = service.issue(1, data()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(service.redeem(&tickets[0]).await.is_err());
        service.sweep().await.unwrap();
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn concurrent_redemption_single_winner() {
        let (service, _) = service(Duration::from_secs(60));
        let tickets = service.issue(1, data()).await.unwrap();
        let ticket = tickets[0].clone();

        let a = {
            let service = service.clone();
            let ticket = ticket.clone();
            tokio::spawn(async move { service.redeem(&ticket).await })
        };
        let b = tokio::spawn(async move { service.redeem(&ticket).await });

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
    }
}
