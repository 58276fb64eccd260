//! RTSP frame source.
//!
//! `RtspSource` ingests BGR frames from IP cameras via RTSP.
//!
//! - `stub://<name>` URLs produce a synthetic scene. Query parameters script
//!   faults for soak runs: `open_failures=N` fails the first N opens and
//!   `fail_every=N` fails every Nth read.
//! - Any other URL requires the `rtsp-gstreamer` feature.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use std::time::Duration;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Instant;

use url::Url;

use super::source::FrameSource;
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://127.0.0.1:8554/stream")
    pub url: String,
    /// Longest wait for one frame before the read counts as failed.
    pub read_timeout: Duration,
    /// Frame width for synthetic streams.
    pub width: u32,
    /// Frame height for synthetic streams.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://127.0.0.1:8554".to_string(),
            read_timeout: Duration::from_secs(5),
            width: 640,
            height: 480,
        }
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)?),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP requires the rtsp-gstreamer feature")
            }
        }
    }

    /// Frames handed out since construction.
    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.frame_count,
        }
    }
}

impl FrameSource for RtspSource {
    fn describe(&self) -> String {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.config.url.clone(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.config.url.clone(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.open(),
        }
    }

    fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.read(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.release(),
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.open,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.pipeline.is_some(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    open: bool,
    frame_count: u64,
    reads: u64,
    opens_attempted: u64,
    open_failures: u64,
    fail_every: Option<u64>,
    /// Simulated scene state, shifts every 50 frames.
    scene_state: u8,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| anyhow!("invalid stub url {}: {}", config.url, e))?;
        let mut open_failures = 0;
        let mut fail_every = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "open_failures" => {
                    open_failures = value
                        .parse()
                        .map_err(|_| anyhow!("open_failures must be an integer"))?;
                }
                "fail_every" => {
                    let n: u64 = value
                        .parse()
                        .map_err(|_| anyhow!("fail_every must be an integer"))?;
                    fail_every = (n > 0).then_some(n);
                }
                other => return Err(anyhow!("unknown stub stream parameter '{}'", other)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic stream needs non-zero frame size"));
        }
        Ok(Self {
            config,
            open: false,
            frame_count: 0,
            reads: 0,
            opens_attempted: 0,
            open_failures,
            fail_every,
            scene_state: 0,
        })
    }

    fn open(&mut self) -> Result<()> {
        self.opens_attempted += 1;
        if self.opens_attempted <= self.open_failures {
            return Err(anyhow!(
                "synthetic open failure {} of {}",
                self.opens_attempted,
                self.open_failures
            ));
        }
        self.open = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("synthetic stream is not open"));
        }
        self.reads += 1;
        if let Some(n) = self.fail_every {
            if self.reads.is_multiple_of(n) {
                return Err(anyhow!("synthetic read failure at read {}", self.reads));
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::new(pixels, self.config.width, self.config.height)
    }

    fn release(&mut self) {
        self.open = false;
    }

    /// Static background with a scene change every 50 frames.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        pixels
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    frame_count: u64,
    connected_at: Option<Instant>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            config,
            pipeline: None,
            frame_count: 0,
            connected_at: None,
        })
    }

    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` with BGR output and
    /// set it playing. A fresh pipeline is built on every open.
    fn open(&mut self) -> Result<()> {
        self.release();

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=BGR ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.pipeline = Some((pipeline, appsink));
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let (pipeline, appsink) = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow!("RTSP source not open"))?;
        poll_bus(pipeline)?;

        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                self.config.read_timeout.as_millis() as u64,
            ))
            .ok_or_else(|| anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::new(pixels, width, height)
    }

    fn release(&mut self) {
        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                log::debug!("RtspSource: failed to stop pipeline: {}", e);
            }
            if let Some(at) = self.connected_at.take() {
                log::debug!(
                    "RtspSource: released {} after {}s",
                    self.config.url,
                    at.elapsed().as_secs()
                );
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn poll_bus(pipeline: &gstreamer::Pipeline) -> Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    while let Some(message) = bus.pop() {
        use gstreamer::MessageView;
        match message.view() {
            MessageView::Error(err) => {
                return Err(anyhow!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
            MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
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

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
