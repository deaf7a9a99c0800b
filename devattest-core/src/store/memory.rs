//! In-memory stores
//!
//! Suitable for development and tests. Nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{Challenge, ChallengeStore, ConsumedChallenge, DeviceKeyStore, StoreError};

struct ChallengeEntry {
    raw_bytes: Vec<u8>,
    platform: String,
    expires_at: DateTime<Utc>,
}

/// DashMap-backed challenge store.
#[derive(Default)]
pub struct MemoryChallengeStore {
    challenges: DashMap<Uuid, ChallengeEntry>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored challenges, expired ones included.
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn create(&self, challenge: Challenge) -> Result<(), StoreError> {
        self.challenges.insert(
            challenge.token,
            ChallengeEntry {
                raw_bytes: challenge.raw_bytes,
                platform: challenge.platform.as_str().to_string(),
                expires_at: challenge.expires_at,
            },
        );
        Ok(())
    }

    async fn consume(&self, token: Uuid) -> Result<Option<ConsumedChallenge>, StoreError> {
        // remove() is the atomic take; an expired entry is dropped either way
        let Some((_, entry)) = self.challenges.remove(&token) else {
            return Ok(None);
        };
        if entry.expires_at > Utc::now() {
            Ok(Some(ConsumedChallenge {
                raw_bytes: entry.raw_bytes,
                platform: entry.platform,
            }))
        } else {
            Ok(None)
        }
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let before = self.challenges.len();
        self.challenges.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.challenges.len()) as u64)
    }
}

impl std::fmt::Debug for MemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChallengeStore")
            .field("challenges", &self.challenges.len())
            .finish()
    }
}

/// Stored key with its last verified use.
#[derive(Debug, Clone)]
pub struct DeviceKeyEntry {
    pub public_key_der: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// DashMap-backed device key store.
#[derive(Debug, Default)]
pub struct MemoryDeviceKeyStore {
    keys: DashMap<Vec<u8>, DeviceKeyEntry>,
}

impl MemoryDeviceKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key_id: &[u8]) -> Option<DeviceKeyEntry> {
        self.keys.get(key_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl DeviceKeyStore for MemoryDeviceKeyStore {
    async fn lookup(&self, key_id: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.keys.get(key_id).map(|entry| entry.public_key_der.clone()))
    }

    async fn save(&self, key_id: &[u8], public_key_der: &[u8]) -> Result<(), StoreError> {
        let now = Utc::now();
        self.keys
            .entry(key_id.to_vec())
            .and_modify(|entry| {
                entry.public_key_der = public_key_der.to_vec();
                entry.last_seen = now;
            })
            .or_insert_with(|| DeviceKeyEntry {
                public_key_der: public_key_der.to_vec(),
                created_at: now,
                last_seen: now,
            });
        Ok(())
    }
}
