//! rollcall-core — Identity matching and attendance-event inference.
//!
//! Pure domain logic for the attendance pipeline: embedding comparison
//! against a cached roster, per-identity movement tracking with cooldown
//! debouncing, and the per-camera direction-to-action policy table.
//! Frame acquisition and backend I/O live in the sibling crates.

pub mod matcher;
pub mod policy;
pub mod roster;
pub mod track;
pub mod types;

pub use matcher::{match_faces, MatchResult};
pub use policy::{AttendanceAction, AttendanceEvent, PolicyTable};
pub use roster::{RosterCache, RosterProvider, RosterRecord, RosterSnapshot};
pub use track::{DebounceConfig, Direction, TrackDebouncer};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceAnalyzer, KnownIdentity};
