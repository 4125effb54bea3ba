//! Cloud vision-language client.
//!
//! The on-device pipeline only supplies JPEG stills; everything else about the
//! remote model is opaque to this crate.

#[cfg(feature = "cloud")]
mod gemini;
pub mod request;
pub mod response;

use std::time::Duration;

use crate::frame::StillImage;

#[cfg(feature = "cloud")]
pub use gemini::GeminiClient;
pub use request::GenerateContentRequest;
pub use response::GenerateContentResponse;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("could not encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("could not decode response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("response carried no text")]
    EmptyResponse,
}

/// Something that can describe a still image in words.
pub trait VisionClient: Send + Sync {
    fn analyze(&self, image: &StillImage) -> Result<String, CloudError>;
}

impl<C: VisionClient + ?Sized> VisionClient for Box<C> {
    fn analyze(&self, image: &StillImage) -> Result<String, CloudError> {
        (**self).analyze(image)
    }
}

/// Credentials and prompt for the Gemini endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub prompt: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            prompt: prompt.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// `generateContent` URL; carries the API key, so never log it.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        )
    }
}

impl std::fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiSettings")
            .field("api_key", &"<redacted>")
            .field("prompt", &self.prompt)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Decode a response body and pull out its answer.
pub fn answer_from_body(body: &str) -> Result<String, CloudError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(CloudError::Decode)?;
    if let Some(usage) = &response.usage_metadata {
        log::debug!(
            "gemini usage: prompt={:?} candidates={:?} total={:?}",
            usage.prompt_token_count,
            usage.candidates_token_count,
            usage.total_token_count
        );
    }
    response
        .first_text()
        .map(str::to_string)
        .ok_or(CloudError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_embeds_model_and_key() {
        let settings = GeminiSettings::new("k3y", "describe");
        assert_eq!(
            settings.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=k3y"
        );
    }

    #[test]
    fn debug_redacts_key() {
        let settings = GeminiSettings::new("secret-key", "describe");
        assert!(!format!("{:?}", settings).contains("secret-key"));
    }

    #[test]
    fn answer_extraction() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"a bench"}]}}]}"#;
        assert_eq!(answer_from_body(body).unwrap(), "a bench");
        assert!(matches!(answer_from_body("not json"), Err(CloudError::Decode(_))));
        assert!(matches!(
            answer_from_body(r#"{"candidates":[]}"#),
            Err(CloudError::EmptyResponse)
        ));
    }
}
