//! Per-identity movement tracking with cooldown debouncing.
//!
//! Each camera pipeline owns its own [`TrackDebouncer`]; direction
//! semantics are camera-specific, so tracks are never shared between
//! cameras even for the same identity.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BoundingBox;

/// Coarse horizontal movement direction across the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Centroid history capacity per track; oldest evicted first.
    pub history_capacity: usize,
    /// Minimum centroids before a direction is computed at all.
    pub min_history: usize,
    /// Net horizontal displacement (pixels) below which movement is
    /// treated as jitter, not a crossing.
    pub movement_threshold: f32,
    /// Minimum time between two emitted directional signals per identity.
    pub cooldown: Duration,
    /// Tracks unseen for longer than this are evicted by `cleanup`.
    pub stale_after: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            history_capacity: 5,
            min_history: 3,
            movement_threshold: 20.0,
            cooldown: Duration::seconds(60),
            stale_after: Duration::seconds(300),
        }
    }
}

#[derive(Debug)]
struct Track {
    centroids: VecDeque<f32>,
    last_seen: DateTime<Utc>,
    last_event: Option<DateTime<Utc>>,
}

/// Converts per-frame sightings of an identity into at most one
/// directional signal per cooldown window.
#[derive(Debug)]
pub struct TrackDebouncer {
    config: DebounceConfig,
    tracks: HashMap<String, Track>,
}

impl TrackDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    /// Record a sighting and return the movement direction, if any.
    ///
    /// Direction is the net displacement between the oldest and newest
    /// buffered centroid — intermediate jitter is deliberately ignored,
    /// a known limitation of the heuristic (a brief reversal inside the
    /// window can read as directional movement).
    ///
    /// A computable direction is still suppressed while the identity's
    /// cooldown is active. The cooldown is only consumed by
    /// [`mark_event`](Self::mark_event), never by observation alone, so
    /// a direction that fails to resolve downstream can retry on the
    /// next qualifying frame.
    pub fn observe(
        &mut self,
        identity_id: &str,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Option<Direction> {
        let track = self
            .tracks
            .entry(identity_id.to_string())
            .or_insert_with(|| Track {
                centroids: VecDeque::with_capacity(self.config.history_capacity),
                last_seen: now,
                last_event: None,
            });

        if track.centroids.len() >= self.config.history_capacity {
            track.centroids.pop_front();
        }
        track.centroids.push_back(bbox.centroid_x());
        track.last_seen = now;

        if track.centroids.len() < self.config.min_history {
            return None;
        }

        let oldest = *track.centroids.front()?;
        let newest = *track.centroids.back()?;
        let diff = newest - oldest;

        let direction = if diff > self.config.movement_threshold {
            Direction::Right
        } else if diff < -self.config.movement_threshold {
            Direction::Left
        } else {
            return None;
        };

        if let Some(last_event) = track.last_event {
            if now - last_event < self.config.cooldown {
                tracing::debug!(
                    identity = identity_id,
                    direction = direction.as_str(),
                    "direction suppressed, cooldown active"
                );
                return None;
            }
        }

        Some(direction)
    }

    /// Consume the identity's cooldown window.
    ///
    /// Called by the event resolver only after the backend confirmed the
    /// attendance mark, so a failed downstream call leaves the crossing
    /// retryable.
    pub fn mark_event(&mut self, identity_id: &str, now: DateTime<Utc>) {
        if let Some(track) = self.tracks.get_mut(identity_id) {
            track.last_event = Some(now);
        }
    }

    /// Evict tracks not seen within the staleness horizon.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let stale_after = self.config.stale_after;
        let before = self.tracks.len();
        self.tracks.retain(|_, t| now - t.last_seen <= stale_after);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.tracks.len(), "evicted stale tracks");
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
