pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use std::path::Path;

pub use cpu::CpuBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use super::backend::DetectorBackend;
use super::engine::ModelLoadError;

/// Load the backend selected by a model path.
///
/// - no path: built-in `CpuBackend`
/// - `*.json`: `StubBackend` fixture
/// - `*.onnx`: `TractBackend` (feature `backend-tract`), sized to `input`
pub fn load_backend(
    model_path: Option<&Path>,
    input: (u32, u32),
) -> Result<Box<dyn DetectorBackend>, ModelLoadError> {
    let Some(path) = model_path else {
        return Ok(Box::new(CpuBackend::new()));
    };
    if !path.exists() {
        return Err(ModelLoadError::Missing {
            path: path.to_path_buf(),
        });
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("json") => Ok(Box::new(StubBackend::from_path(path)?)),
        #[cfg(feature = "backend-tract")]
        Some("onnx") => Ok(Box::new(TractBackend::new(path, input.0, input.1)?)),
        _ => {
            let _ = input;
            Err(ModelLoadError::Unsupported {
                path: path.to_path_buf(),
            })
        }
    }
}
