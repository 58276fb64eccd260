//! Capture, sample, infer, alert.
//!
//! The loop is single-threaded and runs until the process is terminated.
//! No per-frame fault escapes `step`: stream faults are absorbed by the
//! controller, inference faults skip the frame and alert faults are counted
//! by the dispatcher.

use std::time::{Duration, Instant};

use crate::alert::{AlertDispatcher, DispatchOutcome};
use crate::detect::{postprocess, preprocess, DecodeParams, InferenceEngine};
use crate::ingest::FrameSource;
use crate::sampler::FrameSampler;
use crate::stream::StreamController;

/// Loop tuning.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub input_height: u32,
    pub input_width: u32,
    pub decode: DecodeParams,
    pub sample_stride: u64,
    /// Sleep between iterations.
    pub loop_yield: Duration,
    /// Interval between health log lines.
    pub health_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_height: 640,
            input_width: 640,
            decode: DecodeParams::default(),
            sample_stride: 5,
            loop_yield: Duration::from_millis(10),
            health_interval: Duration::from_secs(30),
        }
    }
}

/// What one iteration did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The stream produced no frame this iteration.
    NoFrame,
    /// The frame was counted and discarded by the sampler.
    Skipped,
    /// Inference failed; the frame was dropped.
    InferenceFailed,
    /// The frame went through detection and alert gating.
    Processed {
        detections: usize,
        alert: DispatchOutcome,
    },
}

/// Loop counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub iterations: u64,
    pub frames_sampled: u64,
    pub inference_failures: u64,
    pub detections: u64,
}

pub struct Pipeline<S: FrameSource, E: InferenceEngine, D: AlertDispatcher> {
    stream: StreamController<S>,
    sampler: FrameSampler,
    engine: E,
    dispatcher: D,
    config: PipelineConfig,
    stats: PipelineStats,
    last_health_log: Instant,
}

impl<S: FrameSource, E: InferenceEngine, D: AlertDispatcher> Pipeline<S, E, D> {
    pub fn new(
        stream: StreamController<S>,
        engine: E,
        dispatcher: D,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stream,
            sampler: FrameSampler::new(config.sample_stride),
            engine,
            dispatcher,
            config,
            stats: PipelineStats::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn stream(&self) -> &StreamController<S> {
        &self.stream
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// One iteration: at most one frame read and one inference.
    pub fn step(&mut self) -> StepOutcome {
        self.stats.iterations += 1;

        let Some(frame) = self.stream.next_frame() else {
            return StepOutcome::NoFrame;
        };
        if !self.sampler.tick() {
            return StepOutcome::Skipped;
        }
        self.stats.frames_sampled += 1;

        let output = match preprocess(&frame, self.config.input_height, self.config.input_width)
            .and_then(|input| self.engine.infer(&input))
        {
            Ok(output) => output,
            Err(e) => {
                self.stats.inference_failures += 1;
                log::warn!(
                    "inference failed on frame {} (captured {} ms ago), skipping: {:#}",
                    self.sampler.frame_index(),
                    frame.age_ms(),
                    e
                );
                return StepOutcome::InferenceFailed;
            }
        };

        let detections = postprocess(&output, &self.config.decode);
        self.stats.detections += detections.len() as u64;
        if !detections.is_empty() {
            log::debug!(
                "frame {}: {} detections",
                self.sampler.frame_index(),
                detections.len()
            );
        }
        let alert = self.dispatcher.dispatch(&detections, &frame);
        StepOutcome::Processed {
            detections: detections.len(),
            alert,
        }
    }

    /// Run forever.
    pub fn run(&mut self) -> ! {
        log::info!(
            "pipeline running: stream={} engine={} stride={} input={}x{}",
            self.stream.source().describe(),
            self.engine.name(),
            self.sampler.stride(),
            self.config.input_width,
            self.config.input_height
        );
        loop {
            self.step();
            self.log_health_if_due();
            if !self.config.loop_yield.is_zero() {
                std::thread::sleep(self.config.loop_yield);
            }
        }
    }

    fn log_health_if_due(&mut self) {
        if self.last_health_log.elapsed() < self.config.health_interval {
            return;
        }
        let stream = self.stream.stats();
        let alerts = self.dispatcher.stats();
        log::info!(
            "health state={:?} frames={} sampled={} infer_failures={} detections={} alerts={} delivered={} failed={} dropped={} reconnects={}",
            self.stream.state(),
            stream.frames_read,
            self.stats.frames_sampled,
            self.stats.inference_failures,
            self.stats.detections,
            alerts.triggered,
            alerts.delivered,
            alerts.failed,
            alerts.dropped,
            stream.opens.saturating_sub(1)
        );
        self.last_health_log = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStats;
    use crate::detect::{Detection, StubEngine, Tensor};
    use crate::frame::Frame;
    use crate::stream::ReconnectPolicy;
    use anyhow::{anyhow, Result};

    struct CountingSource {
        reads: u64,
        fail_on: Option<u64>,
        open: bool,
    }

    impl FrameSource for CountingSource {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn read(&mut self) -> Result<Frame> {
            self.reads += 1;
            if self.fail_on == Some(self.reads) {
                return Err(anyhow!("dropped packet"));
            }
            Frame::new(vec![128u8; 8 * 8 * 3], 8, 8)
        }

        fn release(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[derive(Default)]
    struct CountingDispatcher {
        calls: Vec<usize>,
    }

    impl AlertDispatcher for CountingDispatcher {
        fn dispatch(&mut self, detections: &[Detection], _frame: &Frame) -> DispatchOutcome {
            self.calls.push(detections.len());
            DispatchOutcome::NotTriggered
        }

        fn stats(&self) -> AlertStats {
            AlertStats::default()
        }
    }

    fn controller(fail_on: Option<u64>) -> StreamController<CountingSource> {
        StreamController::new(
            CountingSource {
                reads: 0,
                fail_on,
                open: false,
            },
            ReconnectPolicy {
                open_backoff: Duration::ZERO,
                read_failure_pause: Duration::ZERO,
            },
        )
    }

    fn config(stride: u64) -> PipelineConfig {
        PipelineConfig {
            input_height: 4,
            input_width: 4,
            sample_stride: stride,
            loop_yield: Duration::ZERO,
            ..PipelineConfig::default()
        }
    }

    fn one_box_output() -> Result<Tensor> {
        // One column: box (10, 10, 4, 4), class 1 at 0.9.
        Tensor::new(vec![1, 6, 1], vec![10.0, 10.0, 4.0, 4.0, 0.1, 0.9])
    }

    #[test]
    fn only_every_nth_frame_is_inferred() -> Result<()> {
        let mut pipeline = Pipeline::new(
            controller(None),
            StubEngine::empty(2),
            CountingDispatcher::default(),
            config(5),
        );
        let outcomes: Vec<StepOutcome> = (0..20).map(|_| pipeline.step()).collect();
        let processed = outcomes
            .iter()
            .filter(|o| matches!(o, StepOutcome::Processed { .. }))
            .count();
        assert_eq!(processed, 4);
        assert_eq!(pipeline.engine().calls(), 4);
        assert_eq!(outcomes[4], StepOutcome::Processed {
            detections: 0,
            alert: DispatchOutcome::NotTriggered,
        });
        assert_eq!(outcomes[0], StepOutcome::Skipped);
        Ok(())
    }

    #[test]
    fn empty_detection_set_still_reaches_dispatcher() {
        let mut pipeline = Pipeline::new(
            controller(None),
            StubEngine::empty(2),
            CountingDispatcher::default(),
            config(1),
        );
        pipeline.step();
        assert_eq!(pipeline.dispatcher().calls, vec![0]);
    }

    #[test]
    fn inference_failure_skips_frame_and_continues() -> Result<()> {
        let engine = StubEngine::with_output(one_box_output()?).then_fail("npu busy");
        let mut pipeline =
            Pipeline::new(controller(None), engine, CountingDispatcher::default(), config(1));

        assert_eq!(pipeline.step(), StepOutcome::InferenceFailed);
        assert_eq!(
            pipeline.step(),
            StepOutcome::Processed {
                detections: 1,
                alert: DispatchOutcome::NotTriggered,
            }
        );
        assert_eq!(pipeline.stats().inference_failures, 1);
        assert_eq!(pipeline.dispatcher().calls, vec![1]);
        Ok(())
    }

    #[test]
    fn malformed_output_is_an_empty_detection_set() -> Result<()> {
        let engine = StubEngine::with_output(Tensor::new(vec![0, 6, 3], Vec::new())?)
            .then_output(Tensor::new(vec![6, 3], vec![0.9; 18])?);
        let mut pipeline =
            Pipeline::new(controller(None), engine, CountingDispatcher::default(), config(1));
        let empty = StepOutcome::Processed {
            detections: 0,
            alert: DispatchOutcome::NotTriggered,
        };
        assert_eq!(pipeline.step(), empty);
        assert_eq!(pipeline.step(), empty);
        assert_eq!(pipeline.stats().inference_failures, 0);
        Ok(())
    }

    #[test]
    fn read_failure_yields_no_frame_then_recovers() {
        let mut pipeline = Pipeline::new(
            controller(Some(2)),
            StubEngine::empty(2),
            CountingDispatcher::default(),
            config(1),
        );
        assert!(matches!(pipeline.step(), StepOutcome::Processed { .. }));
        assert_eq!(pipeline.step(), StepOutcome::NoFrame);
        assert!(matches!(pipeline.step(), StepOutcome::Processed { .. }));
        assert_eq!(pipeline.stream().stats().opens, 2);
        assert_eq!(pipeline.stats().frames_sampled, 2);
    }
}
