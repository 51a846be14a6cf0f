use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::codec::FeatureCodec;
use crate::error::{CodecError, ForecastError};
use crate::types::{FeatureVector, Fix, Sample, Window, SEQUENCE_LENGTH};

/// Raw fixes kept per entity for speed and baseline estimation.
pub const RECENT_FIX_SLOTS: usize = 2;

/// Returned by [`SlidingWindowStore::window_for`] until an entity has a full window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReady {
    pub available: usize,
}

impl From<NotReady> for ForecastError {
    fn from(e: NotReady) -> Self {
        ForecastError::InsufficientHistory {
            required: SEQUENCE_LENGTH,
            available: e.available,
        }
    }
}

/// Bounded recent history of a single entity.
#[derive(Debug, Clone, Default)]
pub struct EntityHistory {
    /// Normalized feature vectors, oldest first, at most `SEQUENCE_LENGTH`.
    features: VecDeque<FeatureVector>,
    /// Raw positions, oldest first, at most `RECENT_FIX_SLOTS`.
    fixes: VecDeque<Fix>,
    ingested: usize,
}

impl EntityHistory {
    fn push(&mut self, normalized: FeatureVector, fix: Fix) {
        if self.features.len() >= SEQUENCE_LENGTH {
            self.features.pop_front();
        }
        self.features.push_back(normalized);

        if self.fixes.len() >= RECENT_FIX_SLOTS {
            self.fixes.pop_front();
        }
        self.fixes.push_back(fix);
        self.ingested += 1;
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn ingested(&self) -> usize {
        self.ingested
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.fixes.back().map(|f| f.timestamp)
    }

    pub fn fixes(&self) -> Vec<Fix> {
        self.fixes.iter().copied().collect()
    }

    fn window(&self) -> Result<Window, NotReady> {
        let rows: Vec<FeatureVector> = self.features.iter().copied().collect();
        Window::from_latest(&rows).map_err(|_| NotReady {
            available: rows.len(),
        })
    }
}

/// Decides which entities `SlidingWindowStore::prune` drops.
pub trait EvictionPolicy: Send + Sync {
    fn should_evict(&self, entity_id: &str, history: &EntityHistory, now: DateTime<Utc>) -> bool;
}

/// Keeps every entity for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn should_evict(&self, _: &str, _: &EntityHistory, _: DateTime<Utc>) -> bool {
        false
    }
}

/// Drops entities whose newest sample is older than the given age.
#[derive(Debug, Clone, Copy)]
pub struct IdleExpiry(pub Duration);

impl EvictionPolicy for IdleExpiry {
    fn should_evict(&self, _: &str, history: &EntityHistory, now: DateTime<Utc>) -> bool {
        history
            .last_seen()
            .map_or(true, |seen| now.signed_duration_since(seen) > self.0)
    }
}

/// Per-entity sliding windows of normalized samples.
///
/// Not synchronized on its own: callers that serve concurrent requests wrap
/// it in a mutex and hold the lock across each ingest or snapshot.
pub struct SlidingWindowStore {
    codec: Arc<FeatureCodec>,
    entities: HashMap<String, EntityHistory>,
    policy: Box<dyn EvictionPolicy>,
}

impl SlidingWindowStore {
    pub fn new(codec: Arc<FeatureCodec>) -> Self {
        Self::with_policy(codec, Box::new(NeverEvict))
    }

    pub fn with_policy(codec: Arc<FeatureCodec>, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            codec,
            entities: HashMap::new(),
            policy,
        }
    }

    /// Normalizes `sample` and appends it to the entity's window.
    ///
    /// On a codec failure the entity's history is left as it was.
    pub fn ingest(&mut self, entity_id: &str, sample: &Sample) -> Result<(), CodecError> {
        let normalized = self.codec.normalize_one(&sample.features())?;
        let history = self.entities.entry(entity_id.to_string()).or_default();

        if let Some(last) = history.last_seen() {
            if sample.timestamp < last {
                tracing::warn!(
                    "out-of-order sample for {}: {} arrived after {}",
                    entity_id,
                    sample.timestamp,
                    last
                );
            }
        }
        history.push(normalized, sample.fix());
        tracing::debug!(
            "ingested {} sample #{} (window {}/{})",
            entity_id,
            history.ingested(),
            history.len(),
            SEQUENCE_LENGTH
        );
        Ok(())
    }

    /// Snapshot of the entity's most recent window.
    pub fn window_for(&self, entity_id: &str) -> Result<Window, NotReady> {
        match self.entities.get(entity_id) {
            Some(history) => history.window(),
            None => Err(NotReady { available: 0 }),
        }
    }

    pub fn recent_fixes(&self, entity_id: &str) -> Vec<Fix> {
        self.entities
            .get(entity_id)
            .map(EntityHistory::fixes)
            .unwrap_or_default()
    }

    /// Window and raw fixes taken together, so both reflect the same ingests.
    pub fn snapshot(&self, entity_id: &str) -> Result<(Window, Vec<Fix>), NotReady> {
        let window = self.window_for(entity_id)?;
        Ok((window, self.recent_fixes(entity_id)))
    }

    pub fn ingested_count(&self, entity_id: &str) -> usize {
        self.entities.get(entity_id).map_or(0, EntityHistory::ingested)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Applies the eviction policy, returning how many entities were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entities.len();
        let policy = &self.policy;
        self.entities
            .retain(|id, history| !policy.should_evict(id, history, now));
        let evicted = before - self.entities.len();
        if evicted > 0 {
            tracing::info!("pruned {} idle entities", evicted);
        }
        evicted
    }
}
