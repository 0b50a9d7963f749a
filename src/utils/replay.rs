//! Nonce service: replay-checked freshness for signed handshake proofs.
//!
//! Signed handshake packets (`ecdhex`, `session`, `key_exchange`) carry a
//! nonce and timestamp. The timestamp must fall inside a bounded window and
//! the nonce is single-use: seeing the same nonce from the same peer again
//! inside the tracking TTL is a replay, full stop. The cache bounds its own
//! growth with TTL expiry plus FIFO eviction.

use crate::error::{constants, Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Current time in milliseconds since the epoch.
///
/// # Errors
/// Fails if the system clock is before the epoch.
pub fn current_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| TransportError::Authentication(constants::ERR_SYSTEM_TIME.into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NonceKey {
    peer: Vec<u8>,
    nonce: Vec<u8>,
}

#[derive(Debug)]
struct NonceEntry {
    added_at: Instant,
}

/// Single-use nonce tracker with TTL expiry and bounded size.
#[derive(Debug)]
pub struct ReplayCache {
    entries: HashMap<NonceKey, NonceEntry>,
    insertion_order: VecDeque<NonceKey>,
    ttl: Duration,
    max_entries: usize,
}

impl ReplayCache {
    /// Default: 5-minute tracking TTL, 10,000 entries.
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(300), 10_000)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries,
        }
    }

    /// Record a nonce; returns `true` if it was already seen (replay).
    pub fn check_and_insert(&mut self, peer: &[u8], nonce: &[u8]) -> bool {
        self.cleanup_expired();

        let key = NonceKey {
            peer: peer.to_vec(),
            nonce: nonce.to_vec(),
        };

        if self.entries.contains_key(&key) {
            warn!(?peer, "nonce reuse detected");
            return true;
        }

        if self.entries.len() >= self.max_entries {
            let excess = self.entries.len() - self.max_entries + 1;
            self.remove_oldest(excess);
        }

        self.entries.insert(
            key.clone(),
            NonceEntry {
                added_at: Instant::now(),
            },
        );
        self.insertion_order.push_back(key);
        false
    }

    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.added_at) < self.ttl);

        while let Some(key) = self.insertion_order.front() {
            if !self.entries.contains_key(key) {
                self.insertion_order.pop_front();
            } else {
                break;
            }
        }

        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "expired nonce entries evicted");
        }
    }

    /// FIFO eviction when the cache is full: O(1) per removal.
    fn remove_oldest(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }
    }

    /// Current number of tracked nonces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all tracked nonces.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        debug!("replay cache cleared");
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared freshness checker handed to handshake coordinators.
///
/// Wraps the replay cache behind an async mutex (it is shared across every
/// connection of a server) together with the configured timestamp window.
#[derive(Debug)]
pub struct NonceService {
    cache: tokio::sync::Mutex<ReplayCache>,
    window: Duration,
    future_skew: Duration,
}

impl NonceService {
    pub fn new(window: Duration, future_skew: Duration) -> Self {
        Self {
            cache: tokio::sync::Mutex::new(ReplayCache::new()),
            window,
            future_skew,
        }
    }

    /// Verify a nonce/timestamp pair: the timestamp must be inside the
    /// freshness window (with bounded future skew) and the nonce unused.
    ///
    /// # Errors
    /// Authentication error on a stale or future timestamp, or a reused
    /// nonce.
    pub async fn verify(&self, peer: &[u8], nonce: &[u8], timestamp: u64) -> Result<()> {
        let now = current_timestamp()?;

        if timestamp > now + self.future_skew.as_millis() as u64 {
            return Err(TransportError::Authentication(
                constants::ERR_INVALID_TIMESTAMP.into(),
            ));
        }
        if now > timestamp && now - timestamp > self.window.as_millis() as u64 {
            return Err(TransportError::Authentication(
                constants::ERR_INVALID_TIMESTAMP.into(),
            ));
        }

        let mut cache = self.cache.lock().await;
        if cache.check_and_insert(peer, nonce) {
            return Err(TransportError::Authentication(
                constants::ERR_NONCE_REUSED.into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_passes_second_is_replay() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 100);
        assert!(!cache.check_and_insert(b"peer", &[1u8; 16]));
        assert!(cache.check_and_insert(b"peer", &[1u8; 16]));
    }

    #[test]
    fn nonces_are_scoped_per_peer() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 100);
        assert!(!cache.check_and_insert(b"peer-a", &[1u8; 16]));
        assert!(!cache.check_and_insert(b"peer-b", &[1u8; 16]));
    }

    #[test]
    fn expired_nonces_are_forgotten() {
        let mut cache = ReplayCache::with_settings(Duration::from_millis(10), 100);
        assert!(!cache.check_and_insert(b"peer", &[2u8; 16]));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.check_and_insert(b"peer", &[2u8; 16]));
    }

    #[test]
    fn size_bound_is_enforced() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 5);
        for i in 0..10u8 {
            assert!(!cache.check_and_insert(b"peer", &[i; 16]));
        }
        assert!(cache.len() <= 5);
    }

    #[tokio::test]
    async fn stale_timestamp_rejected() {
        let service = NonceService::new(Duration::from_secs(30), Duration::from_secs(2));
        let now = current_timestamp().unwrap();

        assert!(service.verify(b"peer", &[3u8; 16], now).await.is_ok());
        assert!(service.verify(b"peer", &[4u8; 16], now - 31_000).await.is_err());
        assert!(service.verify(b"peer", &[5u8; 16], now + 5_000).await.is_err());
        // within future skew
        assert!(service.verify(b"peer", &[6u8; 16], now + 1_000).await.is_ok());
    }

    #[tokio::test]
    async fn service_detects_reuse() {
        let service = NonceService::new(Duration::from_secs(30), Duration::from_secs(2));
        let now = current_timestamp().unwrap();
        assert!(service.verify(b"peer", &[7u8; 16], now).await.is_ok());
        let err = service.verify(b"peer", &[7u8; 16], now).await.unwrap_err();
        assert!(matches!(err, TransportError::Authentication(_)));
    }
}
