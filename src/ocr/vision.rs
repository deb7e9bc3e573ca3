//! Multimodal vision OCR backend.
//!
//! Uses an OpenAI-compatible chat completions API with a vision-capable
//! model as an alternate text source. Requires `VISION_API_KEY`.
//!
//! The model reports no confidence, so results carry the configured
//! constant (default 85).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::api_backend::{
    create_http_client, encode_image_base64, ensure_success, VISION_OCR_PROMPT,
};
use super::backend::{OcrBackend, OcrBackendType, OcrError, OcrOutput};
use super::model_utils::endpoint_url;
use crate::config::VisionConfig;

/// Vision OCR backend using an OpenAI-compatible API.
pub struct VisionBackend {
    config: VisionConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: String,
    content: Vec<VisionContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum VisionContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: VisionImageUrl },
}

#[derive(Debug, Serialize)]
struct VisionImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    choices: Option<Vec<VisionChoice>>,
    error: Option<VisionError>,
}

#[derive(Debug, Deserialize)]
struct VisionChoice {
    message: VisionResponseMessage,
}

#[derive(Debug, Deserialize)]
struct VisionResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionError {
    message: String,
}

impl VisionBackend {
    /// Create a new vision backend from its configuration.
    pub fn new(config: VisionConfig) -> Result<Self, OcrError> {
        let client = create_http_client("vision", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, client })
    }

    fn build_request(&self, base64_data: &str, mime_type: &str) -> VisionRequest {
        VisionRequest {
            model: self.config.model.clone(),
            messages: vec![VisionMessage {
                role: "user".to_string(),
                content: vec![
                    VisionContent::Text {
                        text: VISION_OCR_PROMPT.to_string(),
                    },
                    VisionContent::ImageUrl {
                        image_url: VisionImageUrl {
                            url: format!("data:{};base64,{}", mime_type, base64_data),
                        },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
            temperature: 0.1,
        }
    }

    async fn run_vision(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let api_key = self.config.api_key.as_ref().ok_or_else(|| {
            OcrError::BackendNotAvailable("VISION_API_KEY not set".to_string())
        })?;

        let (base64_data, mime_type) = encode_image_base64(image_path).await?;
        let request = self.build_request(&base64_data, mime_type);
        let url = endpoint_url(&self.config.endpoint, "chat/completions")?;

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let parsed: VisionResponse = ensure_success("Vision API", response).await?.json().await?;

        if let Some(error) = parsed.error {
            return Err(OcrError::OcrFailed(format!(
                "Vision API error: {}",
                error.message
            )));
        }

        let text = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(OcrOutput {
            text,
            confidence: self.config.confidence,
            bounding_boxes: Vec::new(),
            method: Some(format!("vision_{}", self.config.model)),
        })
    }
}

#[async_trait]
impl OcrBackend for VisionBackend {
    fn backend_type(&self) -> OcrBackendType {
        OcrBackendType::Vision
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.config.api_key.is_none() {
            "VISION_API_KEY not set".to_string()
        } else {
            format!(
                "Vision model {} at {}",
                self.config.model, self.config.endpoint
            )
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn model_name(&self) -> Option<String> {
        Some(self.config.model.clone())
    }

    async fn run_ocr(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        self.run_vision(image_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> VisionBackend {
        VisionBackend::new(VisionConfig {
            api_key: Some("test-key".to_string()),
            ..VisionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_embeds_data_uri() {
        let request = backend().build_request("QUJD", "image/png");
        let json = serde_json::to_value(&request).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn test_response_text_extraction() {
        let parsed: VisionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "CĂN CƯỚC CÔNG DÂN"}}]}"#,
        )
        .unwrap();
        let text = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);
        assert_eq!(text.as_deref(), Some("CĂN CƯỚC CÔNG DÂN"));
    }

    #[test]
    fn test_unavailable_without_key() {
        let backend = VisionBackend::new(VisionConfig {
            api_key: None,
            ..VisionConfig::default()
        })
        .unwrap();
        assert!(!backend.is_available());
        assert_eq!(backend.availability_hint(), "VISION_API_KEY not set");
    }
}
