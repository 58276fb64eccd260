//! sentineld - edge detection and alerting daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured camera stream, reconnecting forever
//! 2. Runs the detector on every Nth frame
//! 3. Posts an alert with a thumbnail when an alert class is detected
//!
//! Configuration errors and model load failures are fatal at startup. Nothing
//! after startup stops the loop.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use edge_sentinel::{
    AlertDispatcher, AlertPolicy, AlertSettings, ConfigOverrides, DispatchMode, HttpAlertSink,
    InferenceEngine, InlineDispatcher, Pipeline, PipelineConfig, QueuedDispatcher, RtspConfig,
    RtspSource, SentinelConfig, StreamController, StubEngine,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Sample a camera stream, detect objects and post alerts"
)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Stream URL (rtsp://... or stub://name).
    #[arg(long)]
    stream_url: Option<String>,

    /// ONNX model path, or stub://name for the scripted engine.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Alert collector URL.
    #[arg(long)]
    alert_url: Option<String>,

    /// Device identifier reported in alerts.
    #[arg(long)]
    device_id: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = ConfigOverrides {
        stream_url: args.stream_url,
        model_path: args.model_path,
        alert_url: args.alert_url,
        device_id: args.device_id,
    };
    let cfg = SentinelConfig::load_with(args.config.as_deref(), &overrides)?;

    let mut engine = build_engine(&cfg)?;
    engine.warm_up()?;

    let source = RtspSource::new(RtspConfig {
        url: cfg.stream.url.clone(),
        read_timeout: cfg.stream.read_timeout,
        width: cfg.stream.synthetic_width,
        height: cfg.stream.synthetic_height,
    })?;
    let stream = StreamController::new(source, cfg.reconnect_policy());

    let dispatcher = build_dispatcher(&cfg)?;

    log::info!(
        "sentineld {} device={} classes={:?} alert_classes={:?} alert_url={}",
        env!("CARGO_PKG_VERSION"),
        cfg.alert.device_id,
        cfg.detection.class_names,
        cfg.alert.alert_classes,
        cfg.alert.endpoint
    );
    log::info!(
        "conf={} iou={} max_boxes={} suppression={:?} dispatch={:?}",
        cfg.detection.confidence_threshold,
        cfg.detection.iou_threshold,
        cfg.detection.max_boxes,
        cfg.detection.suppression,
        cfg.alert.dispatch
    );

    let mut pipeline = Pipeline::new(
        stream,
        engine,
        dispatcher,
        PipelineConfig {
            input_height: cfg.model.input_height,
            input_width: cfg.model.input_width,
            decode: cfg.decode_params(),
            sample_stride: cfg.sample_stride,
            loop_yield: cfg.loop_yield,
            health_interval: cfg.health_interval,
        },
    );
    pipeline.run()
}

fn build_engine(cfg: &SentinelConfig) -> Result<Box<dyn InferenceEngine>> {
    if cfg.is_stub_model() {
        log::warn!(
            "model {} is a stub; no detections will be produced",
            cfg.model.path.display()
        );
        return Ok(Box::new(StubEngine::empty(cfg.detection.class_names.len())));
    }

    #[cfg(feature = "backend-tract")]
    {
        let engine = edge_sentinel::detect::TractEngine::new(
            &cfg.model.path,
            cfg.model.input_width,
            cfg.model.input_height,
        )?;
        log::info!("loaded model {}", cfg.model.path.display());
        Ok(Box::new(engine))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        anyhow::bail!(
            "model {} requires the backend-tract feature",
            cfg.model.path.display()
        )
    }
}

fn build_dispatcher(cfg: &SentinelConfig) -> Result<Box<dyn AlertDispatcher>> {
    let sink = HttpAlertSink::new(&cfg.alert.endpoint, cfg.alert.timeout)?;
    let settings = AlertSettings {
        device_id: cfg.alert.device_id.clone(),
        policy: AlertPolicy::new(
            cfg.alert.alert_classes.iter().copied(),
            cfg.detection.class_names.clone(),
        ),
        thumbnail_quality: cfg.alert.thumbnail_quality,
    };
    Ok(match cfg.alert.dispatch {
        DispatchMode::Inline => Box::new(InlineDispatcher::new(settings, sink)),
        DispatchMode::Queued => Box::new(QueuedDispatcher::spawn(
            settings,
            sink,
            cfg.alert.queue_capacity,
        )?),
    })
}
