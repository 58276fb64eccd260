//! Alert delivery.
//!
//! The HTTP sink posts `multipart/form-data` with a `payload` JSON field and,
//! when present, a `thumb` JPEG file part.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::payload::AlertPayload;
use crate::frame::epoch_millis;

/// Bounded wait for one delivery unless configured otherwise.
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest response body echoed into a delivery error.
const MAX_ERROR_BODY: usize = 512;

/// Delivery seam for alerts.
///
/// One call is one delivery attempt. Callers treat `Err` as non-fatal.
pub trait AlertSink: Send {
    fn deliver(&mut self, payload: &AlertPayload) -> Result<()>;
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn deliver(&mut self, payload: &AlertPayload) -> Result<()> {
        (**self).deliver(payload)
    }
}

/// HTTP POST sink.
pub struct HttpAlertSink {
    endpoint: Url,
    agent: ureq::Agent,
}

impl HttpAlertSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid alert endpoint {}", endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "alert endpoint must be http(s), got '{}'",
                endpoint.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .build();
        Ok(Self { endpoint, agent })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl AlertSink for HttpAlertSink {
    fn deliver(&mut self, payload: &AlertPayload) -> Result<()> {
        let body = MultipartBody::from_payload(payload)?;
        let result = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", &body.content_type())
            .send_bytes(&body.bytes);

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return Err(status_error(code, response));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(anyhow!("alert post error: {}", transport));
            }
        };
        if response.status() >= 300 {
            let code = response.status();
            return Err(status_error(code, response));
        }
        Ok(())
    }
}

fn status_error(code: u16, response: ureq::Response) -> anyhow::Error {
    let mut text = response.into_string().unwrap_or_default();
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    anyhow!("alert post failed: {} {}", code, text.trim())
}

/// Encoded `multipart/form-data` request body.
pub struct MultipartBody {
    pub boundary: String,
    pub bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn from_payload(payload: &AlertPayload) -> Result<Self> {
        let json = payload.to_json().context("serialize alert payload")?;
        let boundary = next_boundary();
        let mut bytes = Vec::with_capacity(
            json.len() + payload.thumbnail.as_ref().map_or(0, Vec::len) + 512,
        );

        bytes.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        bytes.extend_from_slice(b"Content-Disposition: form-data; name=\"payload\"\r\n\r\n");
        bytes.extend_from_slice(json.as_bytes());
        bytes.extend_from_slice(b"\r\n");

        if let Some(thumb) = payload.thumbnail.as_deref().filter(|t| !t.is_empty()) {
            bytes.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            bytes.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"thumb\"; filename=\"thumb-{}.jpg\"\r\n",
                    payload.ts
                )
                .as_bytes(),
            );
            bytes.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            bytes.extend_from_slice(thumb);
            bytes.extend_from_slice(b"\r\n");
        }

        bytes.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        Ok(Self { boundary, bytes })
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

fn next_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("edge-sentinel-{:x}-{:x}", epoch_millis(), n)
}
