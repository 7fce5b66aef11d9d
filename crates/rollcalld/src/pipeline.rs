//! Per-camera processing loop.
//!
//! Each camera gets one pipeline task: poll the capture slot on a fixed
//! tick, analyze every Nth new frame, match faces against the roster
//! snapshot, feed sightings through the track debouncer, and hand any
//! directional signal to the event resolver. Analysis failures are
//! contained per frame; the loop itself only exits on cancellation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rollcall_core::{match_faces, FaceAnalyzer, RosterCache, RosterProvider, TrackDebouncer};
use rollcall_stream::{Frame, StreamSource};

use crate::backend::Backend;
use crate::resolver::EventResolver;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Analyze every Nth tick; intermediate ticks skip straight past.
    pub process_every: u64,
    /// Run roster refresh check and track eviction every Nth tick.
    pub maintenance_every: u64,
    pub poll_interval: std::time::Duration,
    pub similarity_threshold: f32,
    pub jpeg_quality: u8,
}

pub struct CameraPipeline<B> {
    camera_id: String,
    stream: StreamSource,
    backend: Arc<B>,
    roster: Arc<RosterCache>,
    resolver: EventResolver,
    debouncer: TrackDebouncer,
    settings: PipelineSettings,
    last_sequence: u64,
}

impl<B> CameraPipeline<B>
where
    B: Backend + RosterProvider + FaceAnalyzer + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: &str,
        stream: StreamSource,
        backend: Arc<B>,
        roster: Arc<RosterCache>,
        resolver: EventResolver,
        debouncer: TrackDebouncer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            stream,
            backend,
            roster,
            resolver,
            debouncer,
            settings,
            last_sequence: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(camera = %self.camera_id, "pipeline started");
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            cycle = cycle.wrapping_add(1);

            if self.settings.maintenance_every > 0 && cycle % self.settings.maintenance_every == 0
            {
                self.roster.get(&*self.backend).await;
                self.debouncer.cleanup(Utc::now());
            }

            if cycle % self.settings.process_every.max(1) != 0 {
                continue;
            }
            let Some(frame) = self.stream.read_latest() else {
                continue;
            };
            // The capture slot holds the newest frame; re-analyzing the
            // same one while the stream is stalled is wasted work.
            if frame.sequence == self.last_sequence {
                continue;
            }
            self.last_sequence = frame.sequence;

            self.process_frame(&frame, Utc::now()).await;
        }

        self.stream.stop();
        tracing::info!(camera = %self.camera_id, "pipeline stopped");
    }

    /// Analyze one frame end to end. Returns the number of attendance
    /// events dispatched.
    async fn process_frame(&mut self, frame: &Frame, now: DateTime<Utc>) -> usize {
        let jpeg = match frame.to_jpeg(self.settings.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(error) => {
                tracing::warn!(camera = %self.camera_id, %error, "frame encode failed");
                return 0;
            }
        };
        let faces = match self.backend.analyze(&jpeg).await {
            Ok(faces) => faces,
            Err(error) => {
                tracing::warn!(camera = %self.camera_id, %error, "face analysis failed");
                return 0;
            }
        };
        if faces.is_empty() {
            return 0;
        }

        let snapshot = self.roster.get(&*self.backend).await;
        if snapshot.identities.is_empty() {
            tracing::debug!(camera = %self.camera_id, "roster is empty, skipping frame");
            return 0;
        }

        let mut dispatched = 0;
        for result in match_faces(
            faces,
            &snapshot.identities,
            self.settings.similarity_threshold,
        ) {
            let Some(identity) = result.identity else {
                continue;
            };
            let Some(direction) =
                self.debouncer
                    .observe(&identity.identity_id, &result.face.bbox, now)
            else {
                continue;
            };
            tracing::debug!(
                camera = %self.camera_id,
                identity = %identity.identity_id,
                direction = direction.as_str(),
                similarity = result.similarity,
                "directional crossing detected"
            );
            if self
                .resolver
                .resolve(
                    &*self.backend,
                    &mut self.debouncer,
                    &self.camera_id,
                    &identity,
                    direction,
                    frame,
                    &result.face.bbox,
                    now,
                )
                .await
                .is_some()
            {
                dispatched += 1;
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ActiveSession;
    use anyhow::Result;
    use chrono::TimeZone;
    use rollcall_core::{
        AttendanceAction, AttendanceEvent, BoundingBox, DebounceConfig, DetectedFace, Direction,
        Embedding, PolicyTable, RosterRecord,
    };
    use rollcall_stream::{CaptureOptions, VideoSource};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend double for pipeline tests: a fixed roster, a permanently
    /// open session, and a scripted sequence of analysis results.
    struct ScriptedBackend {
        roster: Vec<RosterRecord>,
        analyses: Mutex<VecDeque<Vec<DetectedFace>>>,
        marked: Mutex<Vec<AttendanceEvent>>,
    }

    impl ScriptedBackend {
        fn new(analyses: Vec<Vec<DetectedFace>>) -> Self {
            Self {
                roster: vec![RosterRecord {
                    identity_id: "s1".to_string(),
                    display_name: "Student s1".to_string(),
                    embedding_json: "[1.0, 0.0]".to_string(),
                }],
                analyses: Mutex::new(analyses.into()),
                marked: Mutex::new(Vec::new()),
            }
        }
    }

    impl Backend for ScriptedBackend {
        async fn active_session(&self, _identity_id: &str) -> Result<Option<ActiveSession>> {
            Ok(Some(ActiveSession {
                session_id: "sess-1".to_string(),
                is_batch: false,
                batch_members: vec![],
            }))
        }

        async fn store_snapshot(
            &self,
            _session_id: &str,
            identity_id: &str,
            _jpeg: &[u8],
        ) -> Result<String> {
            Ok(format!("/snapshots/{identity_id}.jpg"))
        }

        async fn mark_attendance(&self, event: &AttendanceEvent) -> Result<()> {
            self.marked.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    impl RosterProvider for ScriptedBackend {
        async fn fetch_roster(&self) -> Result<Vec<RosterRecord>> {
            Ok(self.roster.clone())
        }
    }

    impl FaceAnalyzer for ScriptedBackend {
        async fn analyze(&self, _jpeg: &[u8]) -> Result<Vec<DetectedFace>> {
            Ok(self
                .analyses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    /// Capture source that never produces a frame; pipeline tests feed
    /// frames to `process_frame` directly.
    struct IdleSource;

    impl VideoSource for IdleSource {
        fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn read_frame(&mut self) -> anyhow::Result<Frame> {
            anyhow::bail!("idle")
        }
        fn disconnect(&mut self) {}
    }

    fn face_at(centroid: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: centroid - 32.0,
                y: 60.0,
                width: 64.0,
                height: 80.0,
            },
            embedding: Embedding::new(vec![1.0, 0.0]),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![128; 320 * 240 * 3], 320, 240, sequence).unwrap()
    }

    fn pipeline(backend: Arc<ScriptedBackend>) -> CameraPipeline<ScriptedBackend> {
        let mut policy = PolicyTable::new();
        policy.insert("camera-1", Direction::Left, AttendanceAction::Entry);

        let stream = StreamSource::spawn(
            "camera-1",
            IdleSource,
            CaptureOptions {
                reconnect_backoff: std::time::Duration::from_millis(10),
                ..Default::default()
            },
        );
        let roster = Arc::new(RosterCache::new(
            chrono::Duration::seconds(300),
            chrono::Duration::seconds(0),
        ));
        CameraPipeline::new(
            "camera-1",
            stream,
            backend,
            roster,
            EventResolver::new(policy, 80),
            TrackDebouncer::new(DebounceConfig::default()),
            PipelineSettings {
                process_every: 3,
                maintenance_every: 300,
                poll_interval: std::time::Duration::from_millis(30),
                similarity_threshold: 0.6,
                jpeg_quality: 80,
            },
        )
    }

    #[tokio::test]
    async fn test_drifting_sightings_dispatch_one_event() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![face_at(135.0)],
            vec![face_at(120.0)],
            vec![face_at(100.0)],
            vec![face_at(95.0)],
        ]));
        let mut pipeline = pipeline(backend.clone());

        let mut dispatched = 0;
        for tick in 0..4 {
            dispatched += pipeline.process_frame(&frame(tick + 1), at(tick as i64)).await;
        }

        // One ENTRY from the third sighting; the fourth is inside the
        // cooldown window.
        assert_eq!(dispatched, 1);
        let marked = backend.marked.lock().unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].identity_id, "s1");
        assert_eq!(marked[0].action, AttendanceAction::Entry);
        assert_eq!(marked[0].camera_id, "camera-1");
    }

    #[tokio::test]
    async fn test_unknown_face_is_ignored() {
        let stranger = DetectedFace {
            bbox: BoundingBox {
                x: 100.0,
                y: 60.0,
                width: 64.0,
                height: 80.0,
            },
            embedding: Embedding::new(vec![0.0, 1.0]),
        };
        let backend = Arc::new(ScriptedBackend::new(vec![vec![stranger.clone()]; 5]));
        let mut pipeline = pipeline(backend.clone());

        for tick in 0..5 {
            let dispatched = pipeline.process_frame(&frame(tick + 1), at(tick as i64)).await;
            assert_eq!(dispatched, 0);
        }
        assert!(backend.marked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analysis_failure_is_contained() {
        struct FailingAnalyzer(ScriptedBackend);

        impl Backend for FailingAnalyzer {
            async fn active_session(&self, identity_id: &str) -> Result<Option<ActiveSession>> {
                self.0.active_session(identity_id).await
            }
            async fn store_snapshot(
                &self,
                session_id: &str,
                identity_id: &str,
                jpeg: &[u8],
            ) -> Result<String> {
                self.0.store_snapshot(session_id, identity_id, jpeg).await
            }
            async fn mark_attendance(&self, event: &AttendanceEvent) -> Result<()> {
                self.0.mark_attendance(event).await
            }
        }
        impl RosterProvider for FailingAnalyzer {
            async fn fetch_roster(&self) -> Result<Vec<RosterRecord>> {
                self.0.fetch_roster().await
            }
        }
        impl FaceAnalyzer for FailingAnalyzer {
            async fn analyze(&self, _jpeg: &[u8]) -> Result<Vec<DetectedFace>> {
                anyhow::bail!("detector offline")
            }
        }

        let backend = Arc::new(FailingAnalyzer(ScriptedBackend::new(vec![])));
        let mut policy = PolicyTable::new();
        policy.insert("camera-1", Direction::Left, AttendanceAction::Entry);
        let stream = StreamSource::spawn(
            "camera-1",
            IdleSource,
            CaptureOptions {
                reconnect_backoff: std::time::Duration::from_millis(10),
                ..Default::default()
            },
        );
        let roster = Arc::new(RosterCache::new(
            chrono::Duration::seconds(300),
            chrono::Duration::seconds(0),
        ));
        let mut pipeline = CameraPipeline::new(
            "camera-1",
            stream,
            backend,
            roster,
            EventResolver::new(policy, 80),
            TrackDebouncer::new(DebounceConfig::default()),
            PipelineSettings {
                process_every: 3,
                maintenance_every: 300,
                poll_interval: std::time::Duration::from_millis(30),
                similarity_threshold: 0.6,
                jpeg_quality: 80,
            },
        );

        assert_eq!(pipeline.process_frame(&frame(1), at(0)).await, 0);
    }

    #[tokio::test]
    async fn test_run_exits_on_cancellation() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let pipeline = pipeline(backend);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pipeline.run(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("pipeline should stop promptly")
            .unwrap();
    }
}
