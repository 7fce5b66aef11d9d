//! Turns a debounced directional signal into a dispatched attendance event.
//!
//! Resolution can fail at several points (no policy mapping, no active
//! session, identity outside a batch allow-list, degenerate crop, backend
//! rejection). Every failure short-circuits to `None`; crucially, the
//! identity's cooldown is consumed only after the backend confirmed the
//! mark, so a failed dispatch stays retryable on later frames.

use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceEvent, BoundingBox, Direction, KnownIdentity, PolicyTable, TrackDebouncer,
};
use rollcall_stream::Frame;

use crate::backend::Backend;

pub struct EventResolver {
    policy: PolicyTable,
    jpeg_quality: u8,
}

impl EventResolver {
    pub fn new(policy: PolicyTable, jpeg_quality: u8) -> Self {
        Self {
            policy,
            jpeg_quality,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn resolve<B: Backend>(
        &self,
        backend: &B,
        debouncer: &mut TrackDebouncer,
        camera_id: &str,
        identity: &KnownIdentity,
        direction: Direction,
        frame: &Frame,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Option<AttendanceEvent> {
        let Some(action) = self.policy.resolve(camera_id, direction) else {
            tracing::debug!(
                camera = camera_id,
                direction = direction.as_str(),
                "no action mapped for direction on this camera"
            );
            return None;
        };

        let session = match backend.active_session(&identity.identity_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!(
                    camera = camera_id,
                    identity = %identity.identity_id,
                    action = action.as_str(),
                    "no active session, crossing ignored"
                );
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    camera = camera_id,
                    identity = %identity.identity_id,
                    action = action.as_str(),
                    %error,
                    "active session lookup failed"
                );
                return None;
            }
        };
        if !session.admits(&identity.identity_id) {
            tracing::debug!(
                camera = camera_id,
                identity = %identity.identity_id,
                action = action.as_str(),
                session = %session.session_id,
                "identity not in batch session allow-list"
            );
            return None;
        }

        let Some(crop) = frame.crop(bbox.x, bbox.y, bbox.width, bbox.height) else {
            tracing::warn!(
                camera = camera_id,
                identity = %identity.identity_id,
                action = action.as_str(),
                "face crop fell outside the frame, dropping event"
            );
            return None;
        };
        let jpeg = match crop.to_jpeg(self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(error) => {
                tracing::warn!(
                    camera = camera_id,
                    identity = %identity.identity_id,
                    action = action.as_str(),
                    %error,
                    "snapshot encode failed"
                );
                return None;
            }
        };

        let snapshot_ref = match backend
            .store_snapshot(&session.session_id, &identity.identity_id, &jpeg)
            .await
        {
            Ok(reference) => reference,
            Err(error) => {
                tracing::warn!(
                    camera = camera_id,
                    identity = %identity.identity_id,
                    action = action.as_str(),
                    %error,
                    "snapshot upload failed, crossing stays retryable"
                );
                return None;
            }
        };

        let event = AttendanceEvent {
            identity_id: identity.identity_id.clone(),
            camera_id: camera_id.to_string(),
            action,
            session_id: session.session_id.clone(),
            snapshot_ref,
            occurred_at: now,
        };

        if let Err(error) = backend.mark_attendance(&event).await {
            tracing::warn!(
                camera = camera_id,
                identity = %identity.identity_id,
                action = action.as_str(),
                %error,
                "attendance mark failed, crossing stays retryable"
            );
            return None;
        }

        debouncer.mark_event(&identity.identity_id, now);
        tracing::info!(
            camera = camera_id,
            identity = %identity.identity_id,
            name = %identity.display_name,
            action = action.as_str(),
            session = %event.session_id,
            "attendance recorded"
        );
        Some(event)
    }
}
