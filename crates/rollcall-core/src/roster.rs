//! TTL-refreshed cache of recognition-eligible identities.
//!
//! The matcher reads whole snapshots; only refresh replaces them, and it
//! replaces wholesale so readers never see a half-updated roster. A
//! failed fetch keeps the previous snapshot in effect — matching against
//! a slightly stale roster beats stalling the pipeline.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::types::{Embedding, KnownIdentity};

/// One row from the external roster store, embedding still serialized.
#[derive(Debug, Clone)]
pub struct RosterRecord {
    pub identity_id: String,
    pub display_name: String,
    pub embedding_json: String,
}

/// External roster-fetch capability, implemented by the backend client.
pub trait RosterProvider {
    fn fetch_roster(
        &self,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<RosterRecord>>> + Send;
}

/// Immutable roster snapshot handed out to the matcher.
#[derive(Debug)]
pub struct RosterSnapshot {
    pub identities: Vec<KnownIdentity>,
    pub refreshed_at: DateTime<Utc>,
}

struct CacheState {
    snapshot: Arc<RosterSnapshot>,
    last_attempt: Option<DateTime<Utc>>,
}

pub struct RosterCache {
    ttl: Duration,
    /// Minimum spacing between refresh attempts, so a failing backend is
    /// not hammered on every frame once the TTL has elapsed.
    min_retry_interval: Duration,
    state: RwLock<CacheState>,
}

impl RosterCache {
    pub fn new(ttl: Duration, min_retry_interval: Duration) -> Self {
        Self {
            ttl,
            min_retry_interval,
            state: RwLock::new(CacheState {
                snapshot: Arc::new(RosterSnapshot {
                    identities: Vec::new(),
                    refreshed_at: DateTime::<Utc>::MIN_UTC,
                }),
                last_attempt: None,
            }),
        }
    }

    /// Current snapshot, refreshing first when the TTL has elapsed and a
    /// refresh was not attempted too recently.
    pub async fn get<P: RosterProvider>(&self, provider: &P) -> Arc<RosterSnapshot> {
        let now = Utc::now();
        {
            let state = self.state.read().await;
            if now - state.snapshot.refreshed_at <= self.ttl {
                return state.snapshot.clone();
            }
            if let Some(last_attempt) = state.last_attempt {
                if now - last_attempt < self.min_retry_interval {
                    return state.snapshot.clone();
                }
            }
        }
        self.force_refresh(provider).await
    }

    /// Fetch the full roster and swap the snapshot atomically.
    ///
    /// On fetch failure the previous snapshot stays in effect and the
    /// failure is logged, never raised to the caller.
    pub async fn force_refresh<P: RosterProvider>(&self, provider: &P) -> Arc<RosterSnapshot> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.last_attempt = Some(now);

        match provider.fetch_roster().await {
            Ok(records) => {
                let total = records.len();
                let identities = parse_records(records);
                tracing::info!(
                    identities = identities.len(),
                    skipped = total - identities.len(),
                    "roster refreshed"
                );
                state.snapshot = Arc::new(RosterSnapshot {
                    identities,
                    refreshed_at: now,
                });
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    stale_since = %state.snapshot.refreshed_at,
                    "roster fetch failed, keeping previous snapshot"
                );
            }
        }

        state.snapshot.clone()
    }
}

/// Parse fetched rows, skipping malformed ones individually — one bad
/// embedding must not halt the whole refresh.
fn parse_records(records: Vec<RosterRecord>) -> Vec<KnownIdentity> {
    records
        .into_iter()
        .filter_map(|record| match Embedding::from_json(&record.embedding_json) {
            Ok(embedding) => Some(KnownIdentity {
                identity_id: record.identity_id,
                display_name: record.display_name,
                embedding,
            }),
            Err(error) => {
                tracing::warn!(
                    identity = %record.identity_id,
                    %error,
                    "skipping roster record with malformed embedding"
                );
                None
            }
        })
        .collect()
}
