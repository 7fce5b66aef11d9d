//! RTSP decode backend via GStreamer (`rtsp-gstreamer` feature).
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! RGB appsink` with a
//! single dropped buffer, so the appsink itself already holds only the
//! newest sample. Reconnection policy lives in the capture supervisor;
//! this type just reports failures.

use anyhow::{Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use crate::frame::Frame;
use crate::source::VideoSource;

pub struct RtspSource {
    url: String,
    read_timeout: Duration,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<gstreamer_app::AppSink>,
    sequence: u64,
}

impl RtspSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            read_timeout: Duration::from_secs(5),
            pipeline: None,
            appsink: None,
            sequence: 0,
        }
    }
}

impl VideoSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let appsink = self
            .appsink
            .as_ref()
            .context("RTSP source is not connected")?;

        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                self.read_timeout.as_millis() as u64,
            ))
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (data, width, height) = sample_to_rgb(&sample)?;
        self.sequence += 1;
        Frame::new(data, width, height, self.sequence).map_err(Into::into)
    }

    fn disconnect(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(error) = pipeline.set_state(gstreamer::State::Null) {
                tracing::warn!(url = %self.url, %error, "failed to tear down RTSP pipeline");
            }
        }
        self.appsink = None;
    }
}

fn sample_to_rgb(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    // Strided layout: copy row by row.
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
