// Scene description of a camera frame through Gemini generateContent

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{VISION_ENDPOINT, VISION_MODEL, VISION_PROMPT};

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Gemini returned no text")]
    EmptyResponse,
}

// Request body

#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

// Response body (only the fields we read)

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GenerateRequest {
    /// Prompt followed by the JPEG as inline base64 data
    pub fn describe_jpeg(prompt: &str, jpeg: &[u8]) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        ..Default::default()
                    },
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(jpeg),
                        }),
                        ..Default::default()
                    },
                ],
            }],
        }
    }
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

/// Gemini client bound to one API key and model
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    prompt: String,
}

impl VisionClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        info!("Gemini vision enabled ({})", VISION_MODEL);
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: VISION_MODEL.to_string(),
            prompt: VISION_PROMPT.to_string(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}:generateContent", VISION_ENDPOINT, self.model)
    }

    /// Ask the model to describe a JPEG frame
    pub async fn describe(&self, jpeg: &[u8]) -> Result<String, VisionError> {
        debug!("Sending {} byte frame to {}", jpeg.len(), self.model);
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest::describe_jpeg(&self.prompt, jpeg))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(VisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed.text().ok_or(VisionError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let req = GenerateRequest::describe_jpeg("What is this?", &[0xFF, 0xD8, 0xFF]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{
                    "parts": [
                        {"text": "What is this?"},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_response_text() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "A hallway "}, {"text": "with a cat."}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(resp.text().as_deref(), Some("A hallway with a cat."));
    }

    #[test]
    fn test_response_without_text() {
        let resp: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(resp.text().is_none());

        let resp: GenerateResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert!(resp.text().is_none());
    }

    #[test]
    fn test_url() {
        let client = VisionClient::new("key");
        assert!(client.url().ends_with("/models/gemini-2.0-flash:generateContent"));
    }
}
