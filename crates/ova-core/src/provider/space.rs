//! Client for hosted Gradio apps.
//!
//! A prediction is two requests: `POST /call/{route}` returns an event id,
//! then `GET /call/{route}/{event_id}` streams server-sent events until a
//! `complete` or `error` event arrives. Newer apps serve this under the
//! `/gradio_api` prefix, older ones at the root; both are tried.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::util::http;

use super::SpaceBackend;

const API_PREFIXES: &[&str] = &["/gradio_api", ""];

pub struct GradioSpaceClient {
    token: Option<String>,
}

impl GradioSpaceClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn start_call(&self, base: &str, prefix: &str, route: &str, data: &[Value]) -> Result<Option<String>, ProviderError> {
        let url = format!("{}{}/call/{}", base, prefix, route);
        debug!(url = %url, "Starting space call");
        let response = self
            .authorize(http::client().post(&url))
            .json(&json!({ "data": data }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: Value = response.json().await?;
        body.get("event_id")
            .and_then(|v| v.as_str())
            .map(|id| Some(id.to_string()))
            .ok_or_else(|| ProviderError::Parse(format!("no event_id in response: {}", body)))
    }

    async fn await_result(&self, base: &str, prefix: &str, route: &str, event_id: &str) -> Result<Value, ProviderError> {
        let url = format!("{}{}/call/{}/{}", base, prefix, route, event_id);
        let response = self.authorize(http::client().get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Other(format!("Stream read error: {}", e)))?;
            buf.extend_from_slice(&chunk);

            while let Some(end) = find_block_end(&buf) {
                let block: Vec<u8> = buf.drain(..end + 2).collect();
                if let Some(outcome) = parse_sse_block(&String::from_utf8_lossy(&block)).and_then(resolve_event) {
                    return outcome;
                }
            }
        }

        // A final event without the trailing blank line.
        if let Some(outcome) = parse_sse_block(&String::from_utf8_lossy(&buf)).and_then(resolve_event) {
            return outcome;
        }
        Err(ProviderError::Parse("event stream ended without a result".to_string()))
    }
}

impl Default for GradioSpaceClient {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Base URL for a space: URLs are used verbatim, `owner/name` slugs map to
/// `https://owner-name.hf.space`.
pub fn space_base_url(space: &str) -> String {
    let space = space.trim();
    if space.starts_with("http://") || space.starts_with("https://") {
        return space.trim_end_matches('/').to_string();
    }
    let subdomain: String = space
        .to_lowercase()
        .chars()
        .map(|c| if c == '/' || c == '_' || c == '.' { '-' } else { c })
        .collect();
    format!("https://{}.hf.space", subdomain)
}

fn route_name(api_name: &str) -> &str {
    api_name.trim_start_matches('/')
}

fn find_block_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Parse one SSE block (`event:` / `data:` lines). Returns None for blocks
/// without an event name.
fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.trim());
        }
    }
    event.map(|event| SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Terminal events produce an outcome; progress and heartbeats do not.
fn resolve_event(event: SseEvent) -> Option<Result<Value, ProviderError>> {
    match event.event.as_str() {
        "complete" => Some(
            serde_json::from_str::<Value>(&event.data)
                .map_err(|e| ProviderError::Parse(format!("invalid result payload: {}", e))),
        ),
        "error" => {
            let message = match serde_json::from_str::<Value>(&event.data) {
                Ok(Value::String(s)) => s,
                Ok(Value::Null) | Err(_) if event.data.is_empty() || event.data == "null" => {
                    "space reported an error without details".to_string()
                }
                Ok(other) => other.to_string(),
                Err(_) => event.data.clone(),
            };
            Some(Err(ProviderError::Remote(message)))
        }
        _ => None,
    }
}

#[async_trait]
impl SpaceBackend for GradioSpaceClient {
    async fn upload(
        &self,
        space: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let base = space_base_url(space);
        for prefix in API_PREFIXES {
            let url = format!("{}{}/upload", base, prefix);
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(file_name.to_string())
                .mime_str(content_type)
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            let form = reqwest::multipart::Form::new().part("files", part);

            let response = self.authorize(http::client().post(&url)).multipart(form).send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: text,
                });
            }

            let paths: Value = response.json().await?;
            return paths
                .get(0)
                .and_then(|p| p.as_str())
                .map(str::to_string)
                .ok_or_else(|| ProviderError::Parse(format!("unexpected upload response: {}", paths)));
        }
        Err(ProviderError::Api {
            status: 404,
            message: format!("no upload endpoint on {}", base),
        })
    }

    async fn predict(&self, space: &str, api_name: &str, data: Vec<Value>) -> Result<Value, ProviderError> {
        let base = space_base_url(space);
        let route = route_name(api_name);
        for prefix in API_PREFIXES {
            if let Some(event_id) = self.start_call(&base, prefix, route, &data).await? {
                debug!(space, route, event_id = %event_id, "Awaiting space result");
                return self.await_result(&base, prefix, route, &event_id).await;
            }
        }
        Err(ProviderError::Api {
            status: 404,
            message: format!("route '{}' not found on {}", api_name, base),
        })
    }
}
