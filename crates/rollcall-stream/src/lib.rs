//! rollcall-stream — Frame acquisition for CCTV attendance pipelines.
//!
//! One camera connection per [`StreamSource`], a dedicated capture thread
//! that reconnects forever, and a single latest-frame slot: processing
//! only ever wants "now", never a backlog, so replacing (not queuing) is
//! the intended behavior.

pub mod frame;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod source;

pub use frame::{Frame, FrameError};
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use source::{CaptureOptions, LatestFrame, StreamSource, VideoSource};
