//! HTTP client for the attendance backend and the face analysis service.
//!
//! One [`BackendClient`] serves three capabilities the pipeline consumes
//! through traits: roster fetch, face analysis, and event dispatch. The
//! wire shapes follow the backend's camelCase JSON conventions.

use anyhow::{Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use rollcall_core::{
    AttendanceEvent, BoundingBox, DetectedFace, Embedding, FaceAnalyzer, RosterProvider,
    RosterRecord,
};

/// Session currently accepting marks for a camera's room.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: String,
    /// Batch sessions carry an allow-list; only listed identities may be
    /// marked. Non-batch sessions accept any rostered identity.
    pub is_batch: bool,
    pub batch_members: Vec<String>,
}

impl ActiveSession {
    pub fn admits(&self, identity_id: &str) -> bool {
        !self.is_batch || self.batch_members.iter().any(|m| m == identity_id)
    }
}

/// Attendance backend surface used by the event resolver.
pub trait Backend {
    /// Session the identity is currently enrolled in with no recorded
    /// end time, or `None`.
    fn active_session(
        &self,
        identity_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ActiveSession>>> + Send;

    /// Persist a face crop and return a reference usable in a mark call.
    fn store_snapshot(
        &self,
        session_id: &str,
        identity_id: &str,
        jpeg: &[u8],
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    fn mark_attendance(
        &self,
        event: &AttendanceEvent,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub struct BackendClient {
    http: reqwest::Client,
    backend_url: String,
    detector_url: String,
}

impl BackendClient {
    pub fn new(backend_url: &str, detector_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            backend_url: backend_url.trim_end_matches('/').to_string(),
            detector_url: detector_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionWire {
    session_id: String,
    #[serde(default)]
    is_batch: bool,
    #[serde(default)]
    batch_student_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterRowWire {
    student_id: String,
    name: String,
    face_embedding: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkWire<'a> {
    session_id: &'a str,
    student_id: &'a str,
    direction: &'a str,
    snapshot_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotWire<'a> {
    session_id: &'a str,
    student_id: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct SnapshotReplyWire {
    url: String,
}

#[derive(Serialize)]
struct AnalyzeWire {
    image: String,
}

#[derive(Deserialize)]
struct AnalyzeReplyWire {
    faces: Vec<FaceWire>,
}

#[derive(Deserialize)]
struct FaceWire {
    bbox: BoundingBox,
    embedding: Vec<f32>,
}

impl Backend for BackendClient {
    async fn active_session(&self, identity_id: &str) -> Result<Option<ActiveSession>> {
        let response = self
            .http
            .get(format!("{}/api/sessions/active", self.backend_url))
            .query(&[("studentId", identity_id)])
            .send()
            .await
            .context("active session request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("active session request rejected")?;

        let wire: Option<SessionWire> = response
            .json()
            .await
            .context("malformed active session response")?;
        Ok(wire.map(|w| ActiveSession {
            session_id: w.session_id,
            is_batch: w.is_batch,
            batch_members: w.batch_student_ids,
        }))
    }

    async fn store_snapshot(
        &self,
        session_id: &str,
        identity_id: &str,
        jpeg: &[u8],
    ) -> Result<String> {
        let body = SnapshotWire {
            session_id,
            student_id: identity_id,
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };
        let reply: SnapshotReplyWire = self
            .http
            .post(format!("{}/api/attendance/snapshot", self.backend_url))
            .json(&body)
            .send()
            .await
            .context("snapshot upload failed")?
            .error_for_status()
            .context("snapshot upload rejected")?
            .json()
            .await
            .context("malformed snapshot response")?;
        Ok(reply.url)
    }

    async fn mark_attendance(&self, event: &AttendanceEvent) -> Result<()> {
        let body = MarkWire {
            session_id: &event.session_id,
            student_id: &event.identity_id,
            direction: event.action.as_str(),
            snapshot_url: &event.snapshot_ref,
        };
        self.http
            .post(format!("{}/api/attendance/mark", self.backend_url))
            .json(&body)
            .send()
            .await
            .context("attendance mark failed")?
            .error_for_status()
            .context("attendance mark rejected")?;
        Ok(())
    }
}

impl RosterProvider for BackendClient {
    async fn fetch_roster(&self) -> Result<Vec<RosterRecord>> {
        let rows: Vec<RosterRowWire> = self
            .http
            .get(format!("{}/api/students/embeddings", self.backend_url))
            .send()
            .await
            .context("roster fetch failed")?
            .error_for_status()
            .context("roster fetch rejected")?
            .json()
            .await
            .context("malformed roster response")?;

        Ok(rows
            .into_iter()
            .map(|row| RosterRecord {
                identity_id: row.student_id,
                display_name: row.name,
                embedding_json: row.face_embedding,
            })
            .collect())
    }
}

impl FaceAnalyzer for BackendClient {
    async fn analyze(&self, jpeg: &[u8]) -> Result<Vec<DetectedFace>> {
        let body = AnalyzeWire {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };
        let reply: AnalyzeReplyWire = self
            .http
            .post(format!("{}/analyze", self.detector_url))
            .json(&body)
            .send()
            .await
            .context("face analysis request failed")?
            .error_for_status()
            .context("face analysis rejected")?
            .json()
            .await
            .context("malformed face analysis response")?;

        Ok(reply
            .faces
            .into_iter()
            .map(|face| DetectedFace {
                bbox: face.bbox,
                embedding: Embedding::new(face.embedding),
            })
            .collect())
    }
}
