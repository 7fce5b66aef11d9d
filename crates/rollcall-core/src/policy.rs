//! Camera-to-action policy table.
//!
//! Cameras are installed with a known orientation, so a movement
//! direction only means something on the camera that saw it. The mapping
//! is configuration, not code: adding a camera must not need a rebuild.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::Direction;

/// Semantic attendance action derived from (camera, direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceAction {
    Entry,
    Exit,
}

impl AttendanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Exit => "EXIT",
        }
    }
}

/// Per-camera `direction → action` lookup.
///
/// Combinations absent from the table are not meaningful and resolve to
/// none — not every direction on every camera records anything.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    cameras: HashMap<String, HashMap<Direction, AttendanceAction>>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, camera_id: &str, direction: Direction, action: AttendanceAction) {
        self.cameras
            .entry(camera_id.to_string())
            .or_default()
            .insert(direction, action);
    }

    pub fn resolve(&self, camera_id: &str, direction: Direction) -> Option<AttendanceAction> {
        self.cameras.get(camera_id)?.get(&direction).copied()
    }
}

impl FromIterator<(String, HashMap<Direction, AttendanceAction>)> for PolicyTable {
    fn from_iter<I: IntoIterator<Item = (String, HashMap<Direction, AttendanceAction>)>>(
        iter: I,
    ) -> Self {
        Self {
            cameras: iter.into_iter().collect(),
        }
    }
}

/// A confirmed attendance event, as dispatched to the backend.
///
/// Fire-and-forget from the pipeline's perspective: once the mark call
/// succeeded the pipeline moves on, it never retries a dispatched event.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub identity_id: String,
    pub camera_id: String,
    pub action: AttendanceAction,
    pub session_id: String,
    pub snapshot_ref: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PolicyTable {
        let mut table = PolicyTable::new();
        table.insert("camera-1", Direction::Left, AttendanceAction::Entry);
        table.insert("camera-2", Direction::Right, AttendanceAction::Exit);
        table
    }

    #[test]
    fn test_mapped_combinations_resolve() {
        let table = table();
        assert_eq!(
            table.resolve("camera-1", Direction::Left),
            Some(AttendanceAction::Entry)
        );
        assert_eq!(
            table.resolve("camera-2", Direction::Right),
            Some(AttendanceAction::Exit)
        );
    }

    #[test]
    fn test_unmapped_direction_resolves_to_none() {
        assert_eq!(table().resolve("camera-1", Direction::Right), None);
    }

    #[test]
    fn test_unknown_camera_resolves_to_none() {
        assert_eq!(table().resolve("camera-9", Direction::Left), None);
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(AttendanceAction::Entry.as_str(), "ENTRY");
        assert_eq!(AttendanceAction::Exit.as_str(), "EXIT");
        assert_eq!(
            serde_json::to_string(&AttendanceAction::Exit).unwrap(),
            "\"EXIT\""
        );
    }

    #[test]
    fn test_direction_deserializes_uppercase() {
        let d: Direction = serde_json::from_str("\"LEFT\"").unwrap();
        assert_eq!(d, Direction::Left);
    }
}
