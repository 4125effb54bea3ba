//! `generateContent` request document.
//!
//! Keys go out in snake_case; absent optional fields are omitted.

use base64::engine::general_purpose;
use base64::Engine as _;
use serde::Serialize;

use crate::frame::StillImage;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 (standard alphabet, padded).
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThinkingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
}

impl GenerateContentRequest {
    /// One image plus one prompt, deterministic sampling, thinking disabled.
    pub fn image_analysis(prompt: &str, image: &StillImage) -> Self {
        let image_part = Part {
            inline_data: Some(InlineData {
                mime_type: image.mime_type().to_string(),
                data: general_purpose::STANDARD.encode(image.bytes()),
            }),
            ..Part::default()
        };
        let text_part = Part {
            text: Some(prompt.to_string()),
            ..Part::default()
        };
        Self {
            contents: vec![Content {
                parts: vec![image_part, text_part],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.0),
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: Some(0),
                }),
            }),
        }
    }
}
