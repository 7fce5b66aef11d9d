use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rollcall_core::RosterCache;
use rollcall_stream::LatestFrame;

mod backend;
mod config;
mod pipeline;
mod resolver;

use backend::BackendClient;
use config::Config;

/// Per-camera read handle onto the newest decoded frame, independent of
/// the attendance logic. External viewers pull encoded frames through
/// this; the daemon itself uses it for liveness reporting.
pub struct CameraFeed {
    pub camera_id: String,
    pub frames: LatestFrame,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    let backend = Arc::new(BackendClient::new(
        &config.backend_url,
        &config.detector_url,
    ));
    let roster = Arc::new(RosterCache::new(
        chrono::Duration::seconds(config.roster_ttl_secs as i64),
        chrono::Duration::seconds(config.roster_retry_secs as i64),
    ));

    // Prime the roster before any camera starts analyzing; a failure here
    // is logged and retried from the pipelines.
    roster.force_refresh(&*backend).await;

    let cancel = CancellationToken::new();
    let (mut handles, feeds) = spawn_pipelines(&config, backend, roster, &cancel)?;
    tracing::info!(cameras = feeds.len(), "rollcalld ready");

    handles.push(tokio::spawn(report_feed_liveness(feeds, cancel.clone())));

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

/// Periodically report per-camera capture liveness from the shared
/// frame slots. A camera that has stopped decoding shows up here long
/// before the absence of attendance events would.
async fn report_feed_liveness(feeds: Vec<CameraFeed>, cancel: CancellationToken) {
    let period = std::time::Duration::from_secs(60);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for feed in &feeds {
            match feed.frames.latest() {
                Some(frame) => tracing::debug!(
                    camera = %feed.camera_id,
                    sequence = frame.sequence,
                    "feed live"
                ),
                None => tracing::warn!(camera = %feed.camera_id, "feed has no decoded frame"),
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn spawn_pipelines(
    config: &Config,
    backend: Arc<BackendClient>,
    roster: Arc<RosterCache>,
    cancel: &CancellationToken,
) -> Result<(Vec<tokio::task::JoinHandle<()>>, Vec<CameraFeed>)> {
    use crate::pipeline::{CameraPipeline, PipelineSettings};
    use crate::resolver::EventResolver;
    use rollcall_core::TrackDebouncer;
    use rollcall_stream::{CaptureOptions, RtspSource, StreamSource};

    let policy = config.policy_table();
    let settings = PipelineSettings {
        process_every: config.process_every,
        maintenance_every: config.maintenance_every,
        poll_interval: std::time::Duration::from_millis(config.poll_interval_ms),
        similarity_threshold: config.similarity_threshold,
        jpeg_quality: config.jpeg_quality,
    };

    let mut handles = Vec::with_capacity(config.cameras.len());
    let mut feeds = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        tracing::info!(camera = %camera.id, url = %camera.url, "starting camera pipeline");
        let stream = StreamSource::spawn(
            &camera.id,
            RtspSource::new(&camera.url),
            CaptureOptions::default(),
        );
        feeds.push(CameraFeed {
            camera_id: camera.id.clone(),
            frames: stream.handle(),
        });
        let pipeline = CameraPipeline::new(
            &camera.id,
            stream,
            backend.clone(),
            roster.clone(),
            EventResolver::new(policy.clone(), config.jpeg_quality),
            TrackDebouncer::new(config.debounce_config()),
            settings.clone(),
        );
        handles.push(tokio::spawn(pipeline.run(cancel.clone())));
    }
    Ok((handles, feeds))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn spawn_pipelines(
    _config: &Config,
    _backend: Arc<BackendClient>,
    _roster: Arc<RosterCache>,
    _cancel: &CancellationToken,
) -> Result<(Vec<tokio::task::JoinHandle<()>>, Vec<CameraFeed>)> {
    anyhow::bail!("no RTSP backend compiled in; rebuild with --features rtsp-gstreamer")
}
