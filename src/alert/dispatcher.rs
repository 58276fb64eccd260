//! Alert gating and dispatch.
//!
//! Both dispatchers share the same gating: no alert class in the detection
//! set means no thumbnail, no payload and no delivery. Delivery is
//! best-effort and at-most-once; failures are logged and dropped.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use super::payload::AlertPayload;
use super::policy::AlertPolicy;
use super::sink::AlertSink;
use super::thumbnail::encode_jpeg;
use crate::detect::Detection;
use crate::frame::{epoch_millis, Frame};

/// Result of handing one detection set to a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing alert-worthy; no work done.
    NotTriggered,
    /// Delivered synchronously.
    Delivered,
    /// Delivery attempted and failed; discarded.
    Failed,
    /// Accepted by the background queue.
    Queued,
    /// Background queue full; discarded.
    Dropped,
}

/// Alert counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub triggered: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Dispatch seam between the detection pipeline and alert delivery.
pub trait AlertDispatcher {
    fn dispatch(&mut self, detections: &[Detection], frame: &Frame) -> DispatchOutcome;

    fn stats(&self) -> AlertStats;
}

impl<D: AlertDispatcher + ?Sized> AlertDispatcher for Box<D> {
    fn dispatch(&mut self, detections: &[Detection], frame: &Frame) -> DispatchOutcome {
        (**self).dispatch(detections, frame)
    }

    fn stats(&self) -> AlertStats {
        (**self).stats()
    }
}

/// Settings shared by both dispatchers.
#[derive(Clone, Debug)]
pub struct AlertSettings {
    pub device_id: String,
    pub policy: AlertPolicy,
    pub thumbnail_quality: u8,
}

impl AlertSettings {
    /// Gate and package. `None` when no detection is alert-worthy.
    fn build_payload(&self, detections: &[Detection], frame: &Frame) -> Option<AlertPayload> {
        let matching = self.policy.matching(detections);
        if matching.is_empty() {
            return None;
        }
        let thumbnail = match encode_jpeg(frame, self.thumbnail_quality) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!("thumbnail encoding failed, alerting without it: {:#}", e);
                None
            }
        };
        Some(AlertPayload::new(
            &self.device_id,
            epoch_millis(),
            &matching,
            self.policy.class_names(),
            thumbnail,
        ))
    }
}

fn deliver_and_log<S: AlertSink + ?Sized>(
    sink: &mut S,
    payload: &AlertPayload,
    stats: &mut AlertStats,
) -> bool {
    match sink.deliver(payload) {
        Ok(()) => {
            stats.delivered += 1;
            log::info!(
                "alert delivered: {} boxes, top score {:.2}",
                payload.detections.len(),
                payload.top_score()
            );
            true
        }
        Err(e) => {
            stats.failed += 1;
            log::warn!("alert delivery failed, discarding: {:#}", e);
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Inline dispatcher
// ----------------------------------------------------------------------------

/// Delivers on the caller's thread. A slow sink stalls the caller for at most
/// the sink's timeout.
pub struct InlineDispatcher<S: AlertSink> {
    settings: AlertSettings,
    sink: S,
    stats: AlertStats,
}

impl<S: AlertSink> InlineDispatcher<S> {
    pub fn new(settings: AlertSettings, sink: S) -> Self {
        Self {
            settings,
            sink,
            stats: AlertStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: AlertSink> AlertDispatcher for InlineDispatcher<S> {
    fn dispatch(&mut self, detections: &[Detection], frame: &Frame) -> DispatchOutcome {
        let Some(payload) = self.settings.build_payload(detections, frame) else {
            return DispatchOutcome::NotTriggered;
        };
        self.stats.triggered += 1;
        log::info!(
            "alert triggered: {} boxes, top score {:.2}",
            payload.detections.len(),
            payload.top_score()
        );
        if deliver_and_log(&mut self.sink, &payload, &mut self.stats) {
            DispatchOutcome::Delivered
        } else {
            DispatchOutcome::Failed
        }
    }

    fn stats(&self) -> AlertStats {
        self.stats
    }
}

// ----------------------------------------------------------------------------
// Queued dispatcher
// ----------------------------------------------------------------------------

/// Hands payloads to one worker thread through a bounded queue.
///
/// Gating and thumbnail encoding stay on the caller's thread; only delivery
/// moves. A full queue drops the alert instead of blocking capture.
///
/// Dropping the dispatcher closes the queue, lets the worker drain what is
/// already queued and joins it. Field order matters: `sender` must drop
/// before `worker`.
pub struct QueuedDispatcher {
    settings: AlertSettings,
    sender: SyncSender<AlertPayload>,
    stats: Arc<Mutex<AlertStats>>,
    worker: WorkerHandle,
}

/// Joins the worker thread when dropped.
struct WorkerHandle(Option<JoinHandle<()>>);

impl WorkerHandle {
    fn join(mut self) -> Result<()> {
        match self.0.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("alert worker thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if handle.join().is_err() {
                log::error!("alert worker thread panicked");
            }
        }
    }
}

impl QueuedDispatcher {
    pub fn spawn<S: AlertSink + 'static>(
        settings: AlertSettings,
        sink: S,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("alert queue capacity must be at least 1"));
        }
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let stats = Arc::new(Mutex::new(AlertStats::default()));
        let worker_stats = Arc::clone(&stats);
        let worker = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || drain(receiver, sink, worker_stats))
            .map_err(|e| anyhow!("failed to spawn alert worker: {}", e))?;
        Ok(Self {
            settings,
            sender,
            stats,
            worker: WorkerHandle(Some(worker)),
        })
    }

    fn with_stats(&self, f: impl FnOnce(&mut AlertStats)) {
        match self.stats.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Stop accepting alerts, wait for the queue to drain and join the worker.
    pub fn shutdown(self) -> Result<()> {
        let Self { sender, worker, .. } = self;
        drop(sender);
        worker.join()
    }
}

fn drain<S: AlertSink>(
    receiver: Receiver<AlertPayload>,
    mut sink: S,
    stats: Arc<Mutex<AlertStats>>,
) {
    for payload in receiver {
        let mut local = AlertStats::default();
        deliver_and_log(&mut sink, &payload, &mut local);
        let mut guard = match stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.delivered += local.delivered;
        guard.failed += local.failed;
    }
    log::debug!("alert worker exiting");
}

impl AlertDispatcher for QueuedDispatcher {
    fn dispatch(&mut self, detections: &[Detection], frame: &Frame) -> DispatchOutcome {
        let Some(payload) = self.settings.build_payload(detections, frame) else {
            return DispatchOutcome::NotTriggered;
        };
        self.with_stats(|s| s.triggered += 1);
        log::info!(
            "alert triggered: {} boxes, top score {:.2}",
            payload.detections.len(),
            payload.top_score()
        );
        match self.sender.try_send(payload) {
            Ok(()) => DispatchOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                log::warn!("alert queue full, dropping alert");
                self.with_stats(|s| s.dropped += 1);
                DispatchOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("alert worker gone, dropping alert");
                self.with_stats(|s| s.dropped += 1);
                DispatchOutcome::Dropped
            }
        }
    }

    fn stats(&self) -> AlertStats {
        match self.stats.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::CornerBox;
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Vec<AlertPayload>,
        fail: bool,
    }

    impl AlertSink for RecordingSink {
        fn deliver(&mut self, payload: &AlertPayload) -> Result<()> {
            self.delivered.push(payload.clone());
            if self.fail {
                Err(anyhow!("503 unavailable"))
            } else {
                Ok(())
            }
        }
    }

    /// Forwards to a channel and optionally waits on a gate first.
    struct ChannelSink {
        out: Sender<AlertPayload>,
        gate: Option<Receiver<()>>,
    }

    impl AlertSink for ChannelSink {
        fn deliver(&mut self, payload: &AlertPayload) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.recv().map_err(|_| anyhow!("gate closed"))?;
            }
            self.out
                .send(payload.clone())
                .map_err(|_| anyhow!("test receiver gone"))
        }
    }

    fn settings() -> AlertSettings {
        AlertSettings {
            device_id: "cam-test".to_string(),
            policy: AlertPolicy::new([1], vec!["fresh".to_string(), "moldy".to_string()]),
            thumbnail_quality: 80,
        }
    }

    fn det(class_id: usize, score: f32) -> Detection {
        Detection {
            bbox: CornerBox::new(0.0, 0.0, 4.0, 4.0),
            score,
            class_id,
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![90u8; 8 * 8 * 3], 8, 8).expect("frame")
    }

    #[test]
    fn inline_without_alert_class_makes_no_delivery() {
        let mut dispatcher = InlineDispatcher::new(settings(), RecordingSink::default());
        let outcome = dispatcher.dispatch(&[det(0, 0.9), det(0, 0.4)], &frame());
        assert_eq!(outcome, DispatchOutcome::NotTriggered);
        assert!(dispatcher.sink().delivered.is_empty());
        assert_eq!(dispatcher.stats(), AlertStats::default());
    }

    #[test]
    fn inline_delivers_only_matching_detections() {
        let mut dispatcher = InlineDispatcher::new(settings(), RecordingSink::default());
        let outcome = dispatcher.dispatch(&[det(0, 0.9), det(1, 0.6), det(1, 0.3)], &frame());
        assert_eq!(outcome, DispatchOutcome::Delivered);

        let delivered = &dispatcher.sink().delivered;
        assert_eq!(delivered.len(), 1);
        let payload = &delivered[0];
        assert_eq!(payload.device_id, "cam-test");
        assert_eq!(payload.detections.len(), 2);
        assert!(payload.detections.iter().all(|d| d.class_id == 1));
        assert!(payload.detections.iter().all(|d| d.label == "moldy"));
        assert!(payload.thumbnail.as_ref().is_some_and(|t| t.starts_with(&[0xFF, 0xD8])));
        assert!(payload.ts > 0);
    }

    #[test]
    fn inline_failure_is_counted_not_retried() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut dispatcher = InlineDispatcher::new(settings(), sink);
        assert_eq!(dispatcher.dispatch(&[det(1, 0.9)], &frame()), DispatchOutcome::Failed);
        assert_eq!(dispatcher.sink().delivered.len(), 1);
        let stats = dispatcher.stats();
        assert_eq!(stats.triggered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn queued_dispatcher_delivers_in_background() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink { out: tx, gate: None };
        let mut dispatcher = QueuedDispatcher::spawn(settings(), sink, 4)?;

        assert_eq!(
            dispatcher.dispatch(&[det(0, 0.9)], &frame()),
            DispatchOutcome::NotTriggered
        );
        assert_eq!(dispatcher.dispatch(&[det(1, 0.9)], &frame()), DispatchOutcome::Queued);

        let payload = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(payload.detections.len(), 1);
        dispatcher.shutdown()?;
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn queued_dispatcher_drops_when_full() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let sink = ChannelSink {
            out: tx,
            gate: Some(gate_rx),
        };
        let mut dispatcher = QueuedDispatcher::spawn(settings(), sink, 1)?;

        // First payload is taken by the worker, which then blocks on the gate.
        assert_eq!(dispatcher.dispatch(&[det(1, 0.9)], &frame()), DispatchOutcome::Queued);
        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(dispatcher.dispatch(&[det(1, 0.8)], &frame()));
        }
        assert!(outcomes.contains(&DispatchOutcome::Dropped));

        drop(gate_tx);
        dispatcher.shutdown()?;
        let delivered: Vec<AlertPayload> = rx.try_iter().collect();
        assert!(delivered.len() <= 1);
        Ok(())
    }

    #[test]
    fn dropping_dispatcher_drains_queue() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink { out: tx, gate: None };
        let mut dispatcher = QueuedDispatcher::spawn(settings(), sink, 4)?;
        for _ in 0..3 {
            assert_eq!(dispatcher.dispatch(&[det(1, 0.9)], &frame()), DispatchOutcome::Queued);
        }
        drop(dispatcher);
        assert_eq!(rx.try_iter().count(), 3);
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(QueuedDispatcher::spawn(settings(), RecordingSink::default(), 0).is_err());
    }
}
