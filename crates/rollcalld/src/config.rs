use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use rollcall_core::{AttendanceAction, DebounceConfig, Direction, PolicyTable};

/// One monitored camera: where to pull frames from and what a crossing
/// in each direction means at that installation point.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub url: String,
    /// Direction-to-action mapping for this camera. Directions absent
    /// from the map record nothing.
    #[serde(default)]
    pub actions: HashMap<Direction, AttendanceAction>,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Base URL of the attendance backend.
    pub backend_url: String,
    /// Base URL of the face detection/embedding service.
    pub detector_url: String,
    /// Monitored cameras, parsed from `ROLLCALL_CAMERAS` JSON.
    pub cameras: Vec<CameraConfig>,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Net centroid displacement (pixels) below which movement is jitter.
    pub movement_threshold: f32,
    /// Per-identity cooldown between recorded events, in seconds.
    pub cooldown_secs: u64,
    /// Tracks unseen for this long are evicted during maintenance.
    pub track_stale_secs: u64,
    /// Roster snapshot time-to-live, in seconds.
    pub roster_ttl_secs: u64,
    /// Minimum spacing between roster refresh attempts, in seconds.
    pub roster_retry_secs: u64,
    /// Analyze every Nth polled frame; the rest only keep the slot warm.
    pub process_every: u64,
    /// Run maintenance (roster refresh check, track eviction) every Nth cycle.
    pub maintenance_every: u64,
    /// Frame poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// JPEG quality for detector submissions and snapshots.
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults. `ROLLCALL_CAMERAS` is required.
    pub fn from_env() -> Result<Self> {
        let cameras_json = std::env::var("ROLLCALL_CAMERAS")
            .context("ROLLCALL_CAMERAS is not set; expected a JSON camera list")?;
        let cameras = parse_cameras(&cameras_json)?;

        Ok(Self {
            backend_url: std::env::var("ROLLCALL_BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string()),
            detector_url: std::env::var("ROLLCALL_DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8001".to_string()),
            cameras,
            similarity_threshold: env_f32("ROLLCALL_SIMILARITY_THRESHOLD", 0.60),
            movement_threshold: env_f32("ROLLCALL_MOVEMENT_THRESHOLD", 20.0),
            cooldown_secs: env_u64("ROLLCALL_COOLDOWN_SECS", 60),
            track_stale_secs: env_u64("ROLLCALL_TRACK_STALE_SECS", 300),
            roster_ttl_secs: env_u64("ROLLCALL_ROSTER_TTL_SECS", 300),
            roster_retry_secs: env_u64("ROLLCALL_ROSTER_RETRY_SECS", 10),
            process_every: env_u64("ROLLCALL_PROCESS_EVERY", 3),
            maintenance_every: env_u64("ROLLCALL_MAINTENANCE_EVERY", 300),
            poll_interval_ms: env_u64("ROLLCALL_POLL_INTERVAL_MS", 30),
            jpeg_quality: env_u64("ROLLCALL_JPEG_QUALITY", 80).min(100) as u8,
        })
    }

    /// Direction-to-action policy across all configured cameras.
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::new();
        for camera in &self.cameras {
            for (&direction, &action) in &camera.actions {
                table.insert(&camera.id, direction, action);
            }
        }
        table
    }

    pub fn debounce_config(&self) -> DebounceConfig {
        DebounceConfig {
            movement_threshold: self.movement_threshold,
            cooldown: chrono::Duration::seconds(self.cooldown_secs as i64),
            stale_after: chrono::Duration::seconds(self.track_stale_secs as i64),
            ..DebounceConfig::default()
        }
    }
}

fn parse_cameras(raw: &str) -> Result<Vec<CameraConfig>> {
    let cameras: Vec<CameraConfig> =
        serde_json::from_str(raw).context("malformed ROLLCALL_CAMERAS JSON")?;
    if cameras.is_empty() {
        anyhow::bail!("ROLLCALL_CAMERAS is empty; nothing to monitor");
    }
    Ok(cameras)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cameras() {
        let raw = r#"[
            {"id": "camera-1", "url": "rtsp://10.0.0.11/stream",
             "actions": {"LEFT": "ENTRY", "RIGHT": "EXIT"}},
            {"id": "camera-2", "url": "rtsp://10.0.0.12/stream",
             "actions": {"RIGHT": "EXIT"}}
        ]"#;
        let cameras = parse_cameras(raw).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id, "camera-1");
        assert_eq!(
            cameras[0].actions.get(&Direction::Left),
            Some(&AttendanceAction::Entry)
        );
        assert_eq!(cameras[1].actions.get(&Direction::Left), None);
    }

    #[test]
    fn test_parse_cameras_rejects_empty_list() {
        assert!(parse_cameras("[]").is_err());
        assert!(parse_cameras("not json").is_err());
    }

    #[test]
    fn test_camera_without_actions_parses() {
        let cameras = parse_cameras(r#"[{"id": "c", "url": "rtsp://x"}]"#).unwrap();
        assert!(cameras[0].actions.is_empty());
    }
}
