mod backend;
pub mod backends;
mod engine;
mod result;

pub use backend::DetectorBackend;
pub use backends::{load_backend, CpuBackend, StubBackend};
pub use engine::{
    EngineSettings, InferenceEngine, InferenceError, ModelLoadError, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use result::{BoundingBox, Detection, DetectionId, DetectionSet, RawDetection};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
