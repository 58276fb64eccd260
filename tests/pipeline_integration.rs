use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use edge_sentinel::{
    AlertDispatcher, AlertPayload, AlertPolicy, AlertSettings, AlertSink, DispatchOutcome,
    InlineDispatcher, Pipeline, PipelineConfig, QueuedDispatcher, ReconnectPolicy, RtspConfig,
    RtspSource, StepOutcome, StreamController, StreamState, StubEngine, Tensor,
};

#[derive(Clone, Default)]
struct SharedSink {
    delivered: Arc<Mutex<Vec<AlertPayload>>>,
    fail: bool,
}

impl AlertSink for SharedSink {
    fn deliver(&mut self, payload: &AlertPayload) -> Result<()> {
        if self.fail {
            return Err(anyhow!("collector offline"));
        }
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

fn source(url: &str) -> Result<RtspSource> {
    RtspSource::new(RtspConfig {
        url: url.to_string(),
        read_timeout: Duration::from_millis(100),
        width: 32,
        height: 24,
    })
}

fn instant() -> ReconnectPolicy {
    ReconnectPolicy {
        open_backoff: Duration::ZERO,
        read_failure_pause: Duration::ZERO,
    }
}

fn config(stride: u64) -> PipelineConfig {
    PipelineConfig {
        input_height: 16,
        input_width: 16,
        sample_stride: stride,
        loop_yield: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

fn settings() -> AlertSettings {
    AlertSettings {
        device_id: "edge-cam-1".to_string(),
        policy: AlertPolicy::new([1], vec!["fresh".to_string(), "moldy".to_string()]),
        thumbnail_quality: 70,
    }
}

/// Three candidates: a moldy box, a heavily overlapping weaker fresh box and a
/// separate fresh box.
fn model_output() -> Result<Tensor> {
    #[rustfmt::skip]
    let data = vec![
        // cx
        8.0, 8.5, 2.0,
        // cy
        8.0, 8.0, 2.0,
        // w
        4.0, 4.0, 2.0,
        // h
        4.0, 4.0, 2.0,
        // fresh
        0.1, 0.7, 0.6,
        // moldy
        0.9, 0.2, 0.1,
    ];
    Tensor::new(vec![1, 6, 3], data)
}

#[test]
fn sampled_frames_reach_the_collector() -> Result<()> {
    let sink = SharedSink::default();
    let delivered = Arc::clone(&sink.delivered);
    let mut pipeline = Pipeline::new(
        StreamController::new(source("stub://shelf")?, instant()),
        StubEngine::with_output(model_output()?),
        InlineDispatcher::new(settings(), sink),
        config(5),
    );

    let outcomes: Vec<StepOutcome> = (0..20).map(|_| pipeline.step()).collect();
    let alerted: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| {
            matches!(
                o,
                StepOutcome::Processed {
                    alert: DispatchOutcome::Delivered,
                    ..
                }
            )
        })
        .map(|(i, _)| i + 1)
        .collect();
    assert_eq!(alerted, vec![5, 10, 15, 20]);
    assert_eq!(pipeline.engine().calls(), 4);

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 4);
    let payload = &delivered[0];
    assert_eq!(payload.device_id, "edge-cam-1");
    // Suppression is class-agnostic: the overlapping fresh box is gone, and
    // only the alert class is carried.
    assert_eq!(payload.detections.len(), 1);
    assert_eq!(payload.detections[0].label, "moldy");
    assert_eq!(payload.detections[0].bbox, edge_sentinel::CornerBox::new(6.0, 6.0, 10.0, 10.0));
    assert!(payload
        .thumbnail
        .as_ref()
        .is_some_and(|t| t.starts_with(&[0xFF, 0xD8])));
    Ok(())
}

#[test]
fn stream_faults_do_not_stop_the_loop() -> Result<()> {
    let mut pipeline = Pipeline::new(
        StreamController::new(source("stub://flaky?open_failures=2&fail_every=3")?, instant()),
        StubEngine::empty(2),
        InlineDispatcher::new(settings(), SharedSink::default()),
        config(1),
    );

    assert_eq!(pipeline.step(), StepOutcome::NoFrame);
    assert_eq!(pipeline.step(), StepOutcome::NoFrame);
    assert_eq!(pipeline.stream().state(), StreamState::Disconnected);

    let mut processed = 0;
    for _ in 0..30 {
        if matches!(pipeline.step(), StepOutcome::Processed { .. }) {
            processed += 1;
        }
    }
    assert!(processed >= 15, "processed only {}", processed);

    let stats = pipeline.stream().stats();
    assert_eq!(stats.open_failures, 2);
    assert!(stats.read_failures >= 5);
    assert!(stats.opens == stats.read_failures || stats.opens == stats.read_failures + 1);
    Ok(())
}

#[test]
fn inference_and_delivery_failures_are_absorbed() -> Result<()> {
    let engine = StubEngine::with_output(model_output()?)
        .then_fail("accelerator reset")
        .then_output(model_output()?);
    let sink = SharedSink {
        fail: true,
        ..SharedSink::default()
    };
    let mut pipeline = Pipeline::new(
        StreamController::new(source("stub://shelf")?, instant()),
        engine,
        InlineDispatcher::new(settings(), sink),
        config(1),
    );

    assert_eq!(pipeline.step(), StepOutcome::InferenceFailed);
    assert_eq!(
        pipeline.step(),
        StepOutcome::Processed {
            detections: 2,
            alert: DispatchOutcome::Failed,
        }
    );
    assert_eq!(
        pipeline.step(),
        StepOutcome::Processed {
            detections: 2,
            alert: DispatchOutcome::Failed,
        }
    );
    assert_eq!(pipeline.stats().inference_failures, 1);
    assert_eq!(pipeline.dispatcher().stats().failed, 2);
    Ok(())
}

#[test]
fn queued_dispatch_delivers_off_thread() -> Result<()> {
    let sink = SharedSink::default();
    let delivered = Arc::clone(&sink.delivered);
    let dispatcher = QueuedDispatcher::spawn(settings(), sink, 4)?;
    let mut pipeline = Pipeline::new(
        StreamController::new(source("stub://shelf")?, instant()),
        StubEngine::with_output(model_output()?),
        dispatcher,
        config(2),
    );

    let mut queued = 0;
    for _ in 0..4 {
        if let StepOutcome::Processed { alert, .. } = pipeline.step() {
            assert!(matches!(alert, DispatchOutcome::Queued | DispatchOutcome::Dropped));
            queued += 1;
        }
    }
    assert_eq!(queued, 2);
    drop(pipeline);

    let delivered = delivered.lock().unwrap();
    assert!(!delivered.is_empty());
    assert!(delivered
        .iter()
        .all(|p| p.detections.iter().all(|d| d.class_id == 1)));
    Ok(())
}
