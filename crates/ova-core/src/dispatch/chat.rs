use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{correlation_id, Backends, CallSettings};
use crate::error::{ProviderError, ResilienceError};
use crate::normalize::normalize_generation;
use crate::provider::{GenerationParams, LocalResponder, ProviderDescriptor, ProviderRegistry, ResourceType};
use crate::types::{ChatReply, ChatRequest, ReplySource};

pub const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente virtual amable, cálido y servicial. \
Respondes en tono amigable y claro. Siempre explicas de forma sencilla y en español.";

/// Route used on chat spaces without an invocation hint.
const DEFAULT_CHAT_ROUTE: &str = "/chat";

/// Argument layouts tried against a chat space, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatConvention {
    /// message, history, system prompt, max tokens, temperature, top-p
    Full,
    MessageAndHistory,
    MessageOnly,
}

impl ChatConvention {
    pub fn sequence(supports_system_prompt: bool) -> &'static [ChatConvention] {
        if supports_system_prompt {
            &[ChatConvention::Full, ChatConvention::MessageAndHistory, ChatConvention::MessageOnly]
        } else {
            &[ChatConvention::MessageAndHistory, ChatConvention::MessageOnly]
        }
    }

    /// Positional arguments. History is always an explicit empty list.
    pub fn arguments(&self, message: &str, system_prompt: &str, params: &GenerationParams) -> Vec<Value> {
        match self {
            ChatConvention::Full => vec![
                json!(message),
                json!([]),
                json!(system_prompt),
                json!(params.max_new_tokens),
                json!(params.temperature),
                json!(params.top_p),
            ],
            ChatConvention::MessageAndHistory => vec![json!(message), json!([])],
            ChatConvention::MessageOnly => vec![json!(message)],
        }
    }
}

impl std::fmt::Display for ChatConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatConvention::Full => write!(f, "full"),
            ChatConvention::MessageAndHistory => write!(f, "message_and_history"),
            ChatConvention::MessageOnly => write!(f, "message_only"),
        }
    }
}

/// Chat dispatch over an ordered provider registry.
pub struct ChatDispatcher {
    registry: ProviderRegistry,
    backends: Backends,
    settings: CallSettings,
    responder: LocalResponder,
    params: GenerationParams,
}

impl ChatDispatcher {
    pub fn new(registry: ProviderRegistry, backends: Backends, settings: CallSettings) -> Self {
        Self {
            registry,
            backends,
            settings,
            responder: LocalResponder::new(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Answer a chat message. Always returns non-empty text.
    pub async fn dispatch(&self, request: &ChatRequest) -> ChatReply {
        let cid = correlation_id();
        let mut attempts = 0;
        debug!(correlation_id = %cid, chars = request.text.chars().count(), "Chat dispatch started");

        for provider in self.registry.candidates() {
            let call = self.settings.call::<Option<String>>(format!("chat:{}", provider.name));
            let outcome = call.run(|| self.invoke(provider, request)).await;
            if !matches!(outcome, Err(ResilienceError::CircuitOpen(_))) {
                attempts += 1;
            }
            match outcome {
                Ok(None) => {
                    warn!(correlation_id = %cid, provider = %provider.name, "Chat provider returned no usable text");
                }
                Ok(Some(text)) => {
                    info!(correlation_id = %cid, provider = %provider.name, attempt = attempts, "Chat provider answered");
                    return ChatReply {
                        text,
                        source: ReplySource::Provider(provider.name.clone()),
                        attempts,
                    };
                }
                Err(ResilienceError::CircuitOpen(class)) => {
                    warn!(correlation_id = %cid, breaker = %class, "Circuit open, skipping remaining chat providers");
                    break;
                }
                Err(ResilienceError::Failed(e)) => {
                    if e.is_calling_convention_mismatch() {
                        warn!(
                            correlation_id = %cid,
                            provider = %provider.name,
                            calling_convention = true,
                            error = %e,
                            "Chat provider rejected every calling convention"
                        );
                    } else {
                        warn!(correlation_id = %cid, provider = %provider.name, error = %e, "Chat provider failed");
                    }
                }
            }
        }

        error!(correlation_id = %cid, attempts, "All chat providers failed, using local fallback");
        ChatReply {
            text: self.responder.respond(&request.text),
            source: ReplySource::LocalFallback,
            attempts,
        }
    }

    /// `Ok(None)` means the endpoint answered but produced no usable text.
    async fn invoke(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
    ) -> Result<Option<String>, ProviderError> {
        let system_prompt = request.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut params = self.params;
        if let Some(max) = request.max_tokens {
            params.max_new_tokens = max;
        }

        match provider.resource_type {
            ResourceType::RawModel => {
                let prompt = if provider.supports_system_prompt {
                    format!("{}\n\nUsuario: {}\nAsistente:", system_prompt, request.text)
                } else {
                    format!("Usuario: {}\nAsistente:", request.text)
                };
                let raw = self
                    .backends
                    .inference
                    .text_generation(&provider.resource, &prompt, &params)
                    .await?;
                Ok(normalize_generation(&raw, Some(&prompt)))
            }
            ResourceType::InteractiveSpace => self.ask_space(provider, request, system_prompt, &params).await,
        }
    }

    /// Walk the calling conventions until the space accepts one. Errors the
    /// space reports itself move on to the next layout; anything else ends
    /// this provider's attempt.
    async fn ask_space(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest,
        system_prompt: &str,
        params: &GenerationParams,
    ) -> Result<Option<String>, ProviderError> {
        let route = provider.invocation_hint.as_deref().unwrap_or(DEFAULT_CHAT_ROUTE);
        let mut last_error = None;

        for convention in ChatConvention::sequence(provider.supports_system_prompt) {
            let data = convention.arguments(&request.text, system_prompt, params);
            match self.backends.spaces.predict(&provider.resource, route, data).await {
                Ok(raw) => return Ok(normalize_generation(&raw, None)),
                Err(e @ ProviderError::Remote(_)) => {
                    if e.is_calling_convention_mismatch() {
                        warn!(
                            provider = %provider.name,
                            convention = %convention,
                            calling_convention = true,
                            error = %e,
                            "Space rejected argument layout"
                        );
                    } else {
                        debug!(provider = %provider.name, convention = %convention, error = %e, "Space call failed");
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other(format!("no calling convention for {}", provider.name))))
    }
}
