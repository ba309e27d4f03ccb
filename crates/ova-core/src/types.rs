use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Logical capability served by one provider registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Sign,
    Caption,
    Detection,
    Transcription,
    Synthesis,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::Sign => write!(f, "sign"),
            Capability::Caption => write!(f, "caption"),
            Capability::Detection => write!(f, "detection"),
            Capability::Transcription => write!(f, "transcription"),
            Capability::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// A chat message coming from the web client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Build a request, rejecting blank input.
    pub fn new(text: impl Into<String>) -> Result<Self, GatewayError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("empty message".to_string()));
        }
        Ok(Self {
            text,
            system_prompt: None,
            max_tokens: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A decoded image plus its declared content type.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageRequest {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Result<Self, GatewayError> {
        if bytes.is_empty() {
            return Err(GatewayError::InvalidRequest("empty image".to_string()));
        }
        let content_type = content_type.into();
        if !content_type.starts_with("image/") {
            return Err(GatewayError::InvalidRequest(format!(
                "unsupported image content type: {}",
                content_type
            )));
        }
        Ok(Self { bytes, content_type })
    }

    /// File extension matching the declared content type.
    pub fn extension(&self) -> &str {
        match self.content_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "png",
        }
    }
}

/// Raw audio for speech-to-text.
#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl AudioRequest {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Result<Self, GatewayError> {
        if bytes.is_empty() {
            return Err(GatewayError::InvalidRequest("empty audio".to_string()));
        }
        Ok(Self {
            bytes,
            content_type: content_type.into(),
        })
    }
}

/// Canonical, provider-agnostic result of one recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub label_or_text: String,
    /// Always on the 0–100 scale.
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Which parse branch produced this result.
    pub source_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub label: String,
    pub confidence: f64,
}

impl NormalizedResult {
    /// A failed result carrying an error message.
    pub fn failure(label: impl Into<String>, error: impl Into<String>, source_format: &str) -> Self {
        Self {
            label_or_text: label.into(),
            confidence: 0.0,
            alternatives: Vec::new(),
            success: false,
            error: Some(error.into()),
            source_format: source_format.to_string(),
        }
    }
}

/// Who produced a dispatched answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource {
    Provider(String),
    LocalFallback,
}

impl ReplySource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ReplySource::LocalFallback)
    }
}

impl std::fmt::Display for ReplySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplySource::Provider(name) => write!(f, "{}", name),
            ReplySource::LocalFallback => write!(f, "local_fallback"),
        }
    }
}

impl Serialize for ReplySource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Answer to a chat message. `text` is never empty.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub source: ReplySource,
    /// Providers tried before this answer was produced.
    pub attempts: usize,
}

/// Result of a non-chat dispatch together with its origin.
#[derive(Debug, Clone, Serialize)]
pub struct Dispatched<T> {
    pub value: T,
    pub source: ReplySource,
    pub attempts: usize,
}

/// One object found by a detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// 0–100 scale.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Combined object detection and captioning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub objects: Vec<DetectedObject>,
    pub description: String,
}

impl ImageAnalysis {
    pub const UNAVAILABLE_DESCRIPTION: &'static str = "Image analysis service temporarily unavailable";

    /// Degraded answer used when the analysis providers cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            objects: Vec::new(),
            description: Self::UNAVAILABLE_DESCRIPTION.to_string(),
        }
    }
}

/// Speech-to-text output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_rejects_blank() {
        assert!(ChatRequest::new("   ").is_err());
        let req = ChatRequest::new("hola").unwrap().with_max_tokens(128);
        assert_eq!(req.max_tokens, Some(128));
        assert!(req.system_prompt.is_none());
    }

    #[test]
    fn test_image_request_validation() {
        assert!(ImageRequest::new(Vec::new(), "image/png").is_err());
        assert!(ImageRequest::new(vec![1, 2, 3], "text/plain").is_err());
        let img = ImageRequest::new(vec![1, 2, 3], "image/jpeg").unwrap();
        assert_eq!(img.extension(), "jpg");
    }

    #[test]
    fn test_reply_source_serialization() {
        let json = serde_json::to_value(ReplySource::LocalFallback).unwrap();
        assert_eq!(json, "local_fallback");
        let json = serde_json::to_value(ReplySource::Provider("qwen".into())).unwrap();
        assert_eq!(json, "qwen");
    }

    #[test]
    fn test_normalized_result_serde_skips_empty_error() {
        let result = NormalizedResult {
            label_or_text: "B".into(),
            confidence: 42.0,
            alternatives: Vec::new(),
            success: true,
            error: None,
            source_format: "sequence".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["confidence"], 42.0);
    }
}
