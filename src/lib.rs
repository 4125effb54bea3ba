//! Smart cane perception engine
//!
//! This crate implements the on-device side of an assistive cane for
//! visually-impaired users.
//!
//! # Architecture
//!
//! The core is a real-time frame-sampling and detection pipeline:
//!
//! ```text
//! FrameSource ──► RateLimiter ──► InferenceEngine ──► DetectionPublisher ──► consumers
//!   (capture lane)                 (inference lane)      (Arc<DetectionSet>)
//! ```
//!
//! 1. **Never block capture**: at most one inference call is in flight; frames
//!    arriving meanwhile are dropped, never queued.
//! 2. **Bounded rate**: accepted frames are at least `min_interval` apart.
//! 3. **Whole-set publishing**: readers see the previous set or the new one,
//!    never a mix, and never a result from a stopped session.
//! 4. **Borrowed frames**: detectors see a `FrameView<'_>` that cannot outlive
//!    the call; frame buffers are zeroized on drop.
//!
//! # Module Structure
//!
//! - `frame`: Frame buffers, borrowed views, JPEG stills
//! - `ingest`: Frame sources (synthetic, replay, JPEG directory)
//! - `throttle`: Inference rate gate
//! - `detect`: Detector backends and the inference engine
//! - `publish`: Latest-detections feed
//! - `pipeline`: Lanes and the session state machine
//! - `overlay`: Box mapping into view coordinates
//! - `cloud`, `speech`, `scan`: On-demand object scan through a cloud model
//! - `geofence`: Bus-stop arrival alert
//! - `config`: Runtime configuration

pub mod cloud;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geofence;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod publish;
pub mod scan;
pub mod speech;
pub mod throttle;

pub use cloud::{CloudError, GeminiSettings, VisionClient};
pub use config::{CaneConfig, ConfigError};
pub use detect::{
    load_backend, BoundingBox, Detection, DetectionId, DetectionSet, DetectorBackend,
    EngineSettings, InferenceEngine, InferenceError, ModelLoadError, RawDetection,
};
pub use frame::{Frame, FrameDefect, FrameView, Orientation, PixelFormat, StillImage};
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats};
pub use pipeline::{FrameDisposition, FramePipeline, PipelineError, PipelineState, PipelineStats};
pub use publish::{DetectionFeed, DetectionPublisher, Subscription};
pub use scan::{ObjectScanner, ScanError};
pub use speech::{LogVoice, Speaker, Voice};
pub use throttle::RateLimiter;
