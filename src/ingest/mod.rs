//! Frame ingestion sources.
//!
//! - RTSP streams (IP cameras), via GStreamer (feature: rtsp-gstreamer)
//! - Synthetic `stub://` streams (testing and soak runs)
//!
//! Sources hand out one decoded BGR `Frame` per `read`. Reconnect policy is
//! not their concern; see `stream::StreamController`.

pub mod rtsp;
mod source;

pub use rtsp::{RtspConfig, RtspSource};
pub use source::FrameSource;
