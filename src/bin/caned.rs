//! caned - smart cane detection daemon
//!
//! This daemon:
//! 1. Loads `CaneConfig` (file named by `CANE_CONFIG`, then `CANE_*` overrides)
//! 2. Loads the detector backend and warms up the inference engine
//! 3. Runs the frame pipeline against the configured source
//! 4. Logs every published detection set and periodic pipeline stats
//! 5. Stops cleanly on Ctrl-C

use anyhow::{Context, Result};
use std::sync::mpsc;
use std::time::Duration;

use smart_cane::overlay::confidence_label;
use smart_cane::{
    load_backend, open_source, CaneConfig, FramePipeline, InferenceEngine, Subscription,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CaneConfig::load().context("load configuration")?;
    log::info!(
        "caned {} source={} fps={} min_interval={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.source.fps,
        cfg.min_interval
    );

    let backend = load_backend(
        cfg.detector.model_path.as_deref(),
        (cfg.detector.input_width, cfg.detector.input_height),
    )?;
    let engine = InferenceEngine::with_settings(backend, cfg.engine_settings())?;
    let source = open_source(&cfg.source)?;
    let pipeline = FramePipeline::new(source, engine, cfg.limiter())?;

    let subscription = pipeline.subscribe();
    let reporter = std::thread::Builder::new()
        .name("cane-report".to_string())
        .spawn(move || report_detections(subscription))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    pipeline.start()?;
    log::info!("caned running; Ctrl-C to stop");

    loop {
        match rx.recv_timeout(STATS_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let stats = pipeline.stats();
                log::info!(
                    "pipeline state={:?} delivered={} accepted={} throttled={} busy={} failed={} published={} stale={}",
                    pipeline.state(),
                    stats.delivered,
                    stats.accepted,
                    stats.throttled,
                    stats.busy_dropped,
                    stats.failed,
                    stats.published,
                    stats.discarded_stale
                );
            }
        }
    }

    log::info!("shutdown signal received, stopping pipeline...");
    pipeline.stop();
    drop(pipeline);
    if reporter.join().is_err() {
        log::warn!("detection reporter panicked");
    }
    log::info!("caned stopped");
    Ok(())
}

fn report_detections(subscription: Subscription) {
    while let Some(set) = subscription.recv() {
        if set.is_empty() {
            log::debug!("no detections at {:?}", set.timestamp());
            continue;
        }
        let summary: Vec<String> = set
            .iter()
            .map(|d| {
                format!(
                    "{}#{} {} [{:.2},{:.2} {:.2}x{:.2}]",
                    d.label.as_deref().unwrap_or("object"),
                    d.id.get(),
                    confidence_label(d.confidence),
                    d.bbox.x,
                    d.bbox.y,
                    d.bbox.width,
                    d.bbox.height
                )
            })
            .collect();
        log::info!("detections at {:?}: {}", set.timestamp(), summary.join(", "));
    }
}
