use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{HuggingFaceConfig, DEFAULT_INFERENCE_BASE};
use crate::error::ProviderError;
use crate::types::{AudioRequest, ImageRequest};
use crate::util::http;

use super::{GenerationParams, InferenceBackend};

/// Client for the hosted inference API: `POST {base}/{model}`.
pub struct HfInferenceClient {
    token: Option<String>,
    api_base: String,
}

impl HfInferenceClient {
    pub fn new(token: Option<String>, api_base: Option<String>) -> Self {
        let base = api_base.unwrap_or_else(|| DEFAULT_INFERENCE_BASE.to_string());
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            api_base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &HuggingFaceConfig) -> Self {
        Self::new(
            Some(config.token.clone()),
            Some(config.inference_base.clone()),
        )
    }

    fn url(&self, model: &str) -> String {
        format!("{}/{}", self.api_base, model.trim_matches('/'))
    }

    fn request(&self, model: &str) -> reqwest::RequestBuilder {
        let req = http::client().post(self.url(model));
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn post_json(&self, model: &str, body: Value) -> Result<Value, ProviderError> {
        debug!(model, "Inference request");
        let response = self
            .request(model)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn post_bytes(&self, model: &str, bytes: &[u8], content_type: &str) -> Result<Value, ProviderError> {
        debug!(model, size = bytes.len(), content_type, "Inference upload");
        let response = self
            .request(model)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        read_json(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: api_error_message(&text),
        });
    }
    Ok(response)
}

async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let response = check_status(response).await?;
    let text = response.text().await?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| ProviderError::Parse(format!("invalid JSON from inference API: {}", e)))?;
    // Some deployments answer 200 with {"error": "..."}.
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(ProviderError::Remote(err.to_string()));
    }
    Ok(value)
}

/// Pull `error` out of a JSON error body, or use the body as-is.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl InferenceBackend for HfInferenceClient {
    async fn text_generation(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Value, ProviderError> {
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": params.max_new_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
                "repetition_penalty": params.repetition_penalty,
                "do_sample": true,
                "return_full_text": false,
            }
        });
        self.post_json(model, body).await
    }

    async fn image_to_text(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError> {
        self.post_bytes(model, &image.bytes, &image.content_type).await
    }

    async fn object_detection(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError> {
        self.post_bytes(model, &image.bytes, &image.content_type).await
    }

    async fn image_classification(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError> {
        self.post_bytes(model, &image.bytes, &image.content_type).await
    }

    async fn speech_to_text(&self, model: &str, audio: &AudioRequest) -> Result<Value, ProviderError> {
        self.post_bytes(model, &audio.bytes, &audio.content_type).await
    }

    async fn text_to_speech(&self, model: &str, text: &str) -> Result<Vec<u8>, ProviderError> {
        debug!(model, chars = text.chars().count(), "Speech synthesis request");
        let response = self
            .request(model)
            .header("Content-Type", "application/json")
            .json(&json!({ "inputs": text }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("audio/") {
            return Err(ProviderError::Parse(format!(
                "expected audio response, got '{}'",
                content_type
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = HfInferenceClient::new(None, Some("https://example.test/models/".into()));
        assert_eq!(client.url("facebook/detr-resnet-50"), "https://example.test/models/facebook/detr-resnet-50");

        let default = HfInferenceClient::new(None, None);
        assert_eq!(
            default.url("Qwen/Qwen2.5-1.5B-Instruct"),
            format!("{}/Qwen/Qwen2.5-1.5B-Instruct", DEFAULT_INFERENCE_BASE)
        );
    }

    #[test]
    fn test_blank_token_ignored() {
        let client = HfInferenceClient::new(Some("  ".into()), None);
        assert!(client.token.is_none());
        let client = HfInferenceClient::from_config(&HuggingFaceConfig {
            token: "hf_x".into(),
            ..Default::default()
        });
        assert_eq!(client.token.as_deref(), Some("hf_x"));
    }

    #[test]
    fn test_api_error_message() {
        assert_eq!(
            api_error_message(r#"{"error": "Model is currently loading"}"#),
            "Model is currently loading"
        );
        assert_eq!(api_error_message("  Bad Gateway \n"), "Bad Gateway");
    }
}
