use std::time::Duration;

use crate::cloud::request::GenerateContentRequest;
use crate::cloud::{answer_from_body, CloudError, GeminiSettings, VisionClient};
use crate::frame::StillImage;

/// Blocking client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    settings: GeminiSettings,
    agent: ureq::Agent,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .build();
        Self { settings, agent }
    }

    pub fn settings(&self) -> &GeminiSettings {
        &self.settings
    }

    fn post(&self, body: &str) -> Result<String, CloudError> {
        let response = self
            .agent
            .post(&self.settings.endpoint())
            .set("Content-Type", "application/json")
            .send_string(body);
        match response {
            Ok(response) => response
                .into_string()
                .map_err(|e| CloudError::Transport(format!("read response body: {}", e))),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                log::debug!("gemini returned status {}: {}", code, body);
                Err(CloudError::Status { code, body })
            }
            // The transport error may embed the URL, and with it the key.
            Err(ureq::Error::Transport(transport)) => Err(CloudError::Transport(format!(
                "{:?}: {}",
                transport.kind(),
                transport.message().unwrap_or("no detail")
            ))),
        }
    }
}

impl VisionClient for GeminiClient {
    fn analyze(&self, image: &StillImage) -> Result<String, CloudError> {
        log::info!(
            "gemini: analyzing {} byte still with {}",
            image.bytes().len(),
            self.settings.model
        );
        let request = GenerateContentRequest::image_analysis(&self.settings.prompt, image);
        let body = serde_json::to_string(&request).map_err(CloudError::Encode)?;
        let started = std::time::Instant::now();
        let answer = self.post(&body).and_then(|body| answer_from_body(&body));
        log_outcome(started.elapsed(), &answer);
        answer
    }
}

fn log_outcome(elapsed: Duration, answer: &Result<String, CloudError>) {
    match answer {
        Ok(text) => log::info!("gemini: answered in {:?} ({} chars)", elapsed, text.chars().count()),
        Err(err) => log::warn!("gemini: request failed after {:?}: {}", elapsed, err),
    }
}
