//! Alert gating, packaging and best-effort delivery.
//!
//! - `policy`: which classes are alert-worthy
//! - `payload`: wire payload (`deviceId`, `ts`, `detections`)
//! - `thumbnail`: JPEG snapshot of the triggering frame
//! - `sink`: delivery seam and the HTTP multipart sink
//! - `dispatcher`: inline and queue-backed dispatchers
//!
//! There is no retry and no persistent outbox: an alert is attempted at most
//! once.

mod dispatcher;
mod payload;
mod policy;
mod sink;
mod thumbnail;

pub use dispatcher::{
    AlertDispatcher, AlertSettings, AlertStats, DispatchOutcome, InlineDispatcher,
    QueuedDispatcher,
};
pub use payload::{AlertDetection, AlertPayload};
pub use policy::AlertPolicy;
pub use sink::{AlertSink, HttpAlertSink, MultipartBody, DEFAULT_ALERT_TIMEOUT};
pub use thumbnail::{encode_jpeg, DEFAULT_THUMBNAIL_QUALITY};
