//! Capture → throttle → inference → publish.
//!
//! `FramePipeline` owns the frame source, the rate limiter and the inference
//! engine. Frames reach it either from the capture lane (a thread pulling the
//! owned `FrameSource`) or from a platform callback through `handle_frame`.
//! Neither path ever waits for inference: at most one frame is in flight, and
//! everything that arrives meanwhile is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::detect::{DetectionSet, InferenceEngine, InferenceError};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::publish::{DetectionFeed, DetectionPublisher, Subscription};
use crate::throttle::RateLimiter;

/// Consecutive capture errors tolerated before the capture lane gives up.
const MAX_CAPTURE_ERRORS: u32 = 10;
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("cannot {operation} while the pipeline is {state:?}")]
    InvalidState {
        state: PipelineState,
        operation: &'static str,
    },
    #[error("frame source failed: {0:#}")]
    Source(#[source] anyhow::Error),
    #[error("failed to spawn pipeline lane: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What happened to one delivered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Handed to the inference lane.
    Accepted,
    /// Dropped by the rate limiter.
    Throttled,
    /// Dropped because an inference call was outstanding.
    Busy,
    /// Dropped because the pipeline is not running.
    NotRunning,
}

/// Counters since the pipeline was created.
///
/// `delivered == accepted + throttled + busy_dropped`; frames offered while
/// the pipeline is not running are not counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub delivered: u64,
    pub accepted: u64,
    pub throttled: u64,
    pub busy_dropped: u64,
    pub failed: u64,
    pub published: u64,
    pub discarded_stale: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    accepted: AtomicU64,
    throttled: AtomicU64,
    busy_dropped: AtomicU64,
    failed: AtomicU64,
    published: AtomicU64,
    discarded_stale: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivered frame under exactly one admission outcome.
    fn settle(&self, outcome: &AtomicU64) {
        Self::bump(&self.delivered);
        Self::bump(outcome);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            busy_dropped: self.busy_dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            discarded_stale: self.discarded_stale.load(Ordering::Relaxed),
        }
    }
}

/// Session state. Every admission decision and every publish happens under
/// this lock, so a result from an old session can never follow the empty set
/// published by `stop`.
struct Gate {
    state: PipelineState,
    limiter: RateLimiter,
    generation: u64,
    last_published: Option<Duration>,
}

struct Shared {
    gate: Mutex<Gate>,
    busy: AtomicBool,
    idle: Mutex<()>,
    idle_cv: Condvar,
    publisher: DetectionPublisher,
    counters: Counters,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> PipelineState {
        self.gate().state
    }

    fn set_state(&self, state: PipelineState) {
        self.gate().state = state;
    }

    fn mark_idle(&self) {
        self.busy.store(false, Ordering::SeqCst);
        let _guard = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle_cv.notify_all();
    }
}

struct Job {
    frame: Frame,
    generation: u64,
}

/// Admission path shared by `handle_frame` and the capture lane.
#[derive(Clone)]
struct Handoff {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
}

impl Handoff {
    fn deliver(&self, frame: Frame) -> FrameDisposition {
        let shared = &self.shared;
        let mut gate = shared.gate();
        if gate.state != PipelineState::Running {
            return FrameDisposition::NotRunning;
        }

        // `busy` is only raised under the gate, so this check cannot race
        // another admission.
        if shared.busy.load(Ordering::SeqCst) {
            shared.counters.settle(&shared.counters.busy_dropped);
            return FrameDisposition::Busy;
        }
        if !gate.limiter.should_accept(frame.timestamp) {
            shared.counters.settle(&shared.counters.throttled);
            log::debug!("frame at {:?} throttled", frame.timestamp);
            return FrameDisposition::Throttled;
        }

        shared.busy.store(true, Ordering::SeqCst);
        let job = Job {
            frame,
            generation: gate.generation,
        };
        match self.jobs.try_send(job) {
            Ok(()) => {
                shared.counters.settle(&shared.counters.accepted);
                FrameDisposition::Accepted
            }
            Err(TrySendError::Full(_)) => {
                // Unreachable while the busy flag is honoured; treat as busy.
                drop(gate);
                shared.counters.settle(&shared.counters.busy_dropped);
                FrameDisposition::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                // Same as not running: not counted as delivered.
                drop(gate);
                shared.mark_idle();
                log::error!("inference lane is gone; dropping frame");
                Counters::bump(&shared.counters.failed);
                FrameDisposition::NotRunning
            }
        }
    }
}

#[derive(Default)]
struct Lanes {
    source: Option<Box<dyn FrameSource>>,
    capture: Option<JoinHandle<Box<dyn FrameSource>>>,
    capturing: Option<Arc<AtomicBool>>,
}

/// The frame-sampling and detection pipeline.
///
/// `Idle → Running → Stopping → Idle`. The inference lane lives as long as the
/// pipeline; the capture lane lives for one session.
pub struct FramePipeline {
    shared: Arc<Shared>,
    jobs: Option<Sender<Job>>,
    lanes: Mutex<Lanes>,
    inference: Option<JoinHandle<()>>,
}

impl FramePipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        engine: InferenceEngine,
        limiter: RateLimiter,
    ) -> Result<Self, PipelineError> {
        let shared = Arc::new(Shared {
            gate: Mutex::new(Gate {
                state: PipelineState::Idle,
                limiter,
                generation: 0,
                last_published: None,
            }),
            busy: AtomicBool::new(false),
            idle: Mutex::new(()),
            idle_cv: Condvar::new(),
            publisher: DetectionPublisher::new(),
            counters: Counters::default(),
        });

        let (jobs, rx) = bounded(1);
        let lane_shared = shared.clone();
        let inference = std::thread::Builder::new()
            .name("cane-inference".to_string())
            .spawn(move || run_inference(engine, rx, lane_shared))?;

        Ok(Self {
            shared,
            jobs: Some(jobs),
            lanes: Mutex::new(Lanes {
                source: Some(source),
                ..Lanes::default()
            }),
            inference: Some(inference),
        })
    }

    /// Connect the source and begin a new session.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.check_startable()?;
        let mut lanes = self.lanes();
        // Another caller may have started while we waited for the lanes.
        self.check_startable()?;

        let Some(mut source) = lanes.source.take() else {
            return Err(PipelineError::Source(anyhow::anyhow!(
                "frame source was lost by a previous session"
            )));
        };
        if let Err(err) = source.connect() {
            lanes.source = Some(source);
            log::warn!("pipeline start failed: {:#}", err);
            return Err(PipelineError::Source(err));
        }

        {
            let mut gate = self.shared.gate();
            gate.limiter.reset();
            gate.last_published = None;
            gate.state = PipelineState::Running;
        }

        let handoff = self.handoff()?;
        let capturing = Arc::new(AtomicBool::new(true));
        let lane_capturing = capturing.clone();
        let spawned = std::thread::Builder::new()
            .name("cane-capture".to_string())
            .spawn(move || run_capture(source, handoff, lane_capturing));
        match spawned {
            Ok(handle) => {
                lanes.capture = Some(handle);
                lanes.capturing = Some(capturing);
            }
            Err(err) => {
                // The closure (and the source with it) is gone.
                self.shared.set_state(PipelineState::Idle);
                return Err(PipelineError::Spawn(err));
            }
        }

        log::info!("pipeline started");
        Ok(())
    }

    /// End the session: release the source and publish the empty set.
    ///
    /// A no-op when idle. An inference call still running is left alone; its
    /// result is discarded when it completes.
    pub fn stop(&self) {
        {
            let mut gate = self.shared.gate();
            if gate.state != PipelineState::Running {
                return;
            }
            gate.state = PipelineState::Stopping;
            gate.generation = gate.generation.wrapping_add(1);
        }
        log::info!("pipeline stopping");

        {
            let mut lanes = self.lanes();
            if let Some(capturing) = lanes.capturing.take() {
                capturing.store(false, Ordering::SeqCst);
            }
            if let Some(handle) = lanes.capture.take() {
                match handle.join() {
                    Ok(mut source) => {
                        source.disconnect();
                        lanes.source = Some(source);
                    }
                    Err(_) => log::error!("capture lane panicked; frame source lost"),
                }
            }
        }

        let mut gate = self.shared.gate();
        self.shared.publisher.clear();
        gate.last_published = None;
        gate.state = PipelineState::Idle;
        drop(gate);
        log::info!("pipeline stopped");
    }

    /// Offer one frame, e.g. from a platform capture callback.
    ///
    /// Never blocks on inference.
    pub fn handle_frame(&self, frame: Frame) -> FrameDisposition {
        match &self.jobs {
            Some(jobs) => Handoff {
                shared: self.shared.clone(),
                jobs: jobs.clone(),
            }
            .deliver(frame),
            None => FrameDisposition::NotRunning,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Whether an inference call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Arc<DetectionSet> {
        self.shared.publisher.current()
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.publisher.subscribe()
    }

    pub fn feed(&self) -> DetectionFeed {
        self.shared.publisher.feed()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// Wait until no inference call is outstanding. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.shared.busy.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .shared
                .idle_cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn check_startable(&self) -> Result<(), PipelineError> {
        match self.shared.state() {
            PipelineState::Idle => Ok(()),
            PipelineState::Running => Err(PipelineError::AlreadyRunning),
            state @ PipelineState::Stopping => Err(PipelineError::InvalidState {
                state,
                operation: "start",
            }),
        }
    }

    fn handoff(&self) -> Result<Handoff, PipelineError> {
        let jobs = self.jobs.clone().ok_or(PipelineError::InvalidState {
            state: self.shared.state(),
            operation: "hand off frames",
        })?;
        Ok(Handoff {
            shared: self.shared.clone(),
            jobs,
        })
    }

    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
        // Closing the channel ends the inference lane once its current call returns.
        self.jobs.take();
        if let Some(handle) = self.inference.take() {
            if handle.join().is_err() {
                log::error!("inference lane panicked");
            }
        }
    }
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    handoff: Handoff,
    capturing: Arc<AtomicBool>,
) -> Box<dyn FrameSource> {
    let mut consecutive_errors = 0u32;
    while capturing.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                handoff.deliver(frame);
            }
            Ok(None) => {
                log::info!("frame source {} exhausted", source.stats().source);
                break;
            }
            Err(err) => {
                consecutive_errors += 1;
                log::warn!("frame capture failed: {:#}", err);
                if consecutive_errors >= MAX_CAPTURE_ERRORS && !source.is_healthy() {
                    log::error!(
                        "frame source {} unhealthy after {} errors; capture lane exiting",
                        source.stats().source,
                        consecutive_errors
                    );
                    break;
                }
                std::thread::sleep(CAPTURE_RETRY_DELAY);
            }
        }
    }
    source
}

/// Clears the busy flag if the inference lane exits, panics included.
struct LaneExit<'a>(&'a Shared);

impl Drop for LaneExit<'_> {
    fn drop(&mut self) {
        self.0.mark_idle();
    }
}

fn run_inference(mut engine: InferenceEngine, jobs: Receiver<Job>, shared: Arc<Shared>) {
    log::debug!("inference lane up (backend={})", engine.backend_name());
    let _exit = LaneExit(&shared);
    // Declared after `_exit` so the receiver is gone before busy clears.
    let jobs = jobs;
    for job in jobs.iter() {
        let Job { frame, generation } = job;
        let result = engine.detect(&frame);
        let timestamp = frame.timestamp;
        drop(frame);

        match result {
            Ok(set) => publish_result(&shared, set, generation),
            Err(err) => {
                Counters::bump(&shared.counters.failed);
                match &err {
                    InferenceError::InvalidFrame(_) => {
                        log::warn!("frame at {:?} rejected: {}", timestamp, err)
                    }
                    InferenceError::Internal(_) | InferenceError::Timeout { .. } => {
                        log::warn!("inference on frame at {:?} failed: {}", timestamp, err)
                    }
                }
            }
        }
        shared.mark_idle();
    }
    log::debug!("inference lane down");
}

fn publish_result(shared: &Shared, set: DetectionSet, generation: u64) {
    let mut gate = shared.gate();
    if gate.state != PipelineState::Running || gate.generation != generation {
        Counters::bump(&shared.counters.discarded_stale);
        log::debug!(
            "discarding result for frame at {:?} from an ended session",
            set.timestamp()
        );
        return;
    }
    if gate.last_published.is_some_and(|last| set.timestamp() < last) {
        Counters::bump(&shared.counters.discarded_stale);
        log::debug!("discarding out-of-order result at {:?}", set.timestamp());
        return;
    }
    gate.last_published = Some(set.timestamp());
    let count = set.len();
    let timestamp = set.timestamp();
    shared.publisher.publish(set);
    drop(gate);
    Counters::bump(&shared.counters.published);
    log::trace!("published {} detection(s) at {:?}", count, timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectorBackend, RawDetection, StubBackend};
    use crate::frame::{FrameView, PixelFormat};
    use crate::ingest::ReplaySource;

    const WAIT: Duration = Duration::from_secs(5);

    fn frame(ms: u64) -> Frame {
        Frame::new(
            vec![0u8; 2 * 2 * 3],
            2,
            2,
            PixelFormat::Rgb8,
            Duration::from_millis(ms),
        )
    }

    fn pipeline() -> FramePipeline {
        let backend = StubBackend::new(vec![RawDetection::new(
            BoundingBox::new(0.2, 0.2, 0.3, 0.3),
            0.8,
        )]);
        let engine = InferenceEngine::new(backend).unwrap();
        let source = Box::new(ReplaySource::new("push", Vec::new()));
        FramePipeline::new(source, engine, RateLimiter::default()).unwrap()
    }

    #[test]
    fn frames_before_start_are_not_running() {
        let pipeline = pipeline();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.handle_frame(frame(0)), FrameDisposition::NotRunning);
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }

    #[test]
    fn accepted_frame_is_published() {
        let pipeline = pipeline();
        pipeline.start().unwrap();
        assert_eq!(pipeline.handle_frame(frame(70)), FrameDisposition::Accepted);
        assert!(pipeline.wait_idle(WAIT));

        let current = pipeline.current();
        assert_eq!(current.len(), 1);
        assert_eq!(current.timestamp(), Duration::from_millis(70));
        let stats = pipeline.stats();
        assert_eq!((stats.accepted, stats.published), (1, 1));
    }

    #[test]
    fn second_start_is_rejected() {
        let pipeline = pipeline();
        pipeline.start().unwrap();
        assert!(matches!(pipeline.start(), Err(PipelineError::AlreadyRunning)));
    }

    #[test]
    fn stop_publishes_empty_set() {
        let pipeline = pipeline();
        pipeline.start().unwrap();
        pipeline.handle_frame(frame(0));
        assert!(pipeline.wait_idle(WAIT));
        assert!(!pipeline.current().is_empty());

        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.current().is_empty());
    }

    #[test]
    fn replay_source_cannot_restart() {
        let pipeline = pipeline();
        pipeline.start().unwrap();
        pipeline.stop();
        assert!(matches!(pipeline.start(), Err(PipelineError::Source(_))));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    struct Crashing;

    impl DetectorBackend for Crashing {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn supports(&self, _format: PixelFormat) -> bool {
            true
        }

        fn detect(&mut self, _frame: FrameView<'_>) -> anyhow::Result<Vec<RawDetection>> {
            panic!("model crashed");
        }
    }

    #[test]
    fn frames_after_inference_lane_dies_are_not_delivered() {
        let engine = InferenceEngine::new(Crashing).unwrap();
        let source = Box::new(ReplaySource::new("push", Vec::new()));
        let pipeline = FramePipeline::new(source, engine, RateLimiter::default()).unwrap();
        pipeline.start().unwrap();

        assert_eq!(pipeline.handle_frame(frame(0)), FrameDisposition::Accepted);
        assert!(pipeline.wait_idle(WAIT));
        assert!(!pipeline.is_busy());
        assert_eq!(pipeline.handle_frame(frame(200)), FrameDisposition::NotRunning);

        let stats = pipeline.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            stats.delivered,
            stats.accepted + stats.throttled + stats.busy_dropped
        );
        assert_eq!(stats.failed, 1);
    }
}
