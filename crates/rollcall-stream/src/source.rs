//! Capture supervision: one thread per camera, retry-forever reconnect,
//! and the shared latest-frame slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::Frame;

/// A blocking video decode backend for one camera.
///
/// Implementations are driven from the capture thread only; they do not
/// need to be re-entrant. Errors from `connect` and `read_frame` are
/// expected and trigger reconnection, never shutdown.
pub trait VideoSource: Send + 'static {
    fn connect(&mut self) -> anyhow::Result<()>;
    fn read_frame(&mut self) -> anyhow::Result<Frame>;
    fn disconnect(&mut self);
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Wait after a failed connect or read before retrying. Cameras are
    /// expected to be intermittently unreachable; retries are unbounded.
    pub reconnect_backoff: Duration,
    /// Sleep after each successful capture to cap the capture rate.
    pub frame_interval: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            frame_interval: Duration::from_millis(30),
        }
    }
}

/// Cloneable read handle onto a camera's latest decoded frame.
///
/// `latest()` is a snapshot read: latest-or-none, never blocking on a
/// capture in progress, never a torn frame.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    pub fn latest(&self) -> Option<Arc<Frame>> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Latest frame encoded as JPEG, for external viewers. Best-effort:
    /// returns `None` both before the first frame and on encode failure.
    pub fn latest_jpeg(&self, quality: u8) -> Option<Vec<u8>> {
        let frame = self.latest()?;
        match frame.to_jpeg(quality) {
            Ok(jpeg) => Some(jpeg),
            Err(error) => {
                tracing::warn!(%error, "failed to encode latest frame");
                None
            }
        }
    }

    fn store(&self, frame: Frame) {
        let frame = Arc::new(frame);
        match self.slot.lock() {
            Ok(mut guard) => *guard = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
    }
}

/// Owns one camera connection and its capture thread.
pub struct StreamSource {
    camera_id: String,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StreamSource {
    /// Start the capture loop on a dedicated OS thread.
    ///
    /// The loop reads one frame per iteration and stores it into the
    /// shared slot, replacing the previous frame. Connect and read
    /// failures log, release the connection, back off, and retry
    /// indefinitely — loss of attendance signal is worse than
    /// busy-waiting at low cost, so they never propagate to callers.
    pub fn spawn<S: VideoSource>(camera_id: &str, source: S, options: CaptureOptions) -> Self {
        let latest = LatestFrame::default();
        let running = Arc::new(AtomicBool::new(true));

        let thread = std::thread::Builder::new()
            .name(format!("capture-{camera_id}"))
            .spawn({
                let camera_id = camera_id.to_string();
                let latest = latest.clone();
                let running = running.clone();
                move || capture_loop(&camera_id, source, &latest, &running, &options)
            })
            .expect("failed to spawn capture thread");

        Self {
            camera_id: camera_id.to_string(),
            latest,
            running,
            thread: Some(thread),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Most recent decoded frame, or `None` before the first decode.
    pub fn read_latest(&self) -> Option<Arc<Frame>> {
        self.latest.latest()
    }

    /// Handle for external streaming/display, independent of the
    /// attendance logic.
    pub fn handle(&self) -> LatestFrame {
        self.latest.clone()
    }

    /// Stop the capture loop and release the connection. Idempotent; the
    /// in-flight blocking read is allowed to finish, so this can take a
    /// short bounded time rather than returning instantly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(camera = %self.camera_id, "capture thread panicked");
            }
        }
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: VideoSource>(
    camera_id: &str,
    mut source: S,
    latest: &LatestFrame,
    running: &AtomicBool,
    options: &CaptureOptions,
) {
    tracing::info!(camera = camera_id, "capture loop started");
    let mut connected = false;

    while running.load(Ordering::SeqCst) {
        if !connected {
            match source.connect() {
                Ok(()) => {
                    tracing::info!(camera = camera_id, "camera connected");
                    connected = true;
                }
                Err(error) => {
                    tracing::warn!(
                        camera = camera_id,
                        %error,
                        backoff_secs = options.reconnect_backoff.as_secs_f32(),
                        "camera connect failed, retrying"
                    );
                    interruptible_sleep(options.reconnect_backoff, running);
                    continue;
                }
            }
        }

        match source.read_frame() {
            Ok(frame) => {
                latest.store(frame);
                interruptible_sleep(options.frame_interval, running);
            }
            Err(error) => {
                tracing::warn!(camera = camera_id, %error, "frame read failed, reconnecting");
                source.disconnect();
                connected = false;
                interruptible_sleep(options.reconnect_backoff, running);
            }
        }
    }

    source.disconnect();
    tracing::info!(camera = camera_id, "capture loop stopped");
}

/// Sleep in short slices so a stop signal is honored at the next
/// iteration boundary instead of after a full backoff.
fn interruptible_sleep(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(50);
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}
