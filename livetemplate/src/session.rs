//! Session identifiers and the per-tenant session registry.
//!
//! Registry keys embed the tenant id, so a session id leaked from one
//! tenant is inert in another tenant's registry: the random string alone
//! never resolves.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use dashmap::DashMap;
use rand::RngCore;
use std::time::{Duration, Instant};

/// Generate an opaque session identifier: 32 bytes of cryptographic
/// randomness, URL-safe base64 with padding (44 characters).
pub(crate) fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub tenant: String,
    pub page_id: String,
    #[allow(dead_code)]
    pub created_at: Instant,
    pub last_access: Instant,
}

/// Session id -> record table for one application.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    entries: DashMap<String, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant: &str, session_id: &str) -> String {
        format!("{tenant}:{session_id}")
    }

    /// Register a new session for a page and return its id.
    pub fn create(&self, tenant: &str, page_id: &str) -> String {
        let session_id = generate_session_id();
        let now = Instant::now();
        self.entries.insert(
            Self::key(tenant, &session_id),
            SessionRecord {
                tenant: tenant.to_string(),
                page_id: page_id.to_string(),
                created_at: now,
                last_access: now,
            },
        );
        session_id
    }

    /// Resolve a session to its page id, refreshing last access.
    pub fn resolve(&self, tenant: &str, session_id: &str) -> Option<String> {
        self.entries
            .get_mut(&Self::key(tenant, session_id))
            .map(|mut record| {
                record.last_access = Instant::now();
                record.page_id.clone()
            })
    }

    /// Remove one session.
    pub fn remove(&self, tenant: &str, session_id: &str) -> Option<SessionRecord> {
        self.entries
            .remove(&Self::key(tenant, session_id))
            .map(|(_, record)| record)
    }

    /// Remove and return every session idle longer than `ttl`.
    pub fn take_expired(&self, ttl: Duration) -> Vec<SessionRecord> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.last_access) >= ttl)
            .map(|entry| entry.key().clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, record)| record))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
