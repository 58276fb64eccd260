//! Edge Sentinel
//!
//! Sampled object detection on a live camera stream, with best-effort
//! alerting to a remote HTTP collector.
//!
//! # Architecture
//!
//! One capture thread drives the loop:
//!
//! 1. **Stream**: `StreamController` keeps the connection up; faults never
//!    escape it.
//! 2. **Sampling**: `FrameSampler` keeps every Nth frame read.
//! 3. **Detection**: `preprocess` -> `InferenceEngine` -> `postprocess`
//!    (threshold, decode, greedy suppression).
//! 4. **Alerting**: an `AlertDispatcher` gates on alert classes and posts a
//!    JSON payload plus JPEG thumbnail. Delivery is at-most-once.
//!
//! # Module Structure
//!
//! - `frame`: BGR frame type
//! - `ingest`: frame sources (RTSP, synthetic)
//! - `stream`: connection state machine and reconnect policy
//! - `sampler`: stride sampling
//! - `detect`: tensors, preprocessing, inference backends, decode and NMS
//! - `alert`: payload, policy, thumbnail, sinks and dispatchers
//! - `pipeline`: the orchestrating loop
//! - `config`: file, environment and command-line configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod sampler;
pub mod stream;

pub use alert::{
    AlertDispatcher, AlertPayload, AlertPolicy, AlertSettings, AlertSink, DispatchOutcome,
    HttpAlertSink, InlineDispatcher, QueuedDispatcher,
};
pub use config::{ConfigOverrides, DispatchMode, SentinelConfig};
pub use detect::{
    postprocess, preprocess, CornerBox, DecodeParams, Detection, InferenceEngine, StubEngine,
    SuppressionMode, Tensor,
};
pub use frame::Frame;
pub use ingest::{FrameSource, RtspConfig, RtspSource};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats, StepOutcome};
pub use sampler::FrameSampler;
pub use stream::{ReconnectPolicy, StreamController, StreamState};
