use serde::Serialize;
use tracing::info;

use crate::config::{Config, Environment};
use crate::dispatch::vision::{DEFAULT_CAPTION_MODEL, DEFAULT_DETECTION_MODEL};
use crate::dispatch::speech::{DEFAULT_SYNTHESIS_MODEL, DEFAULT_TRANSCRIPTION_MODEL};
use crate::dispatch::{Backends, CallSettings, ChatDispatcher, SpeechDispatcher, VisionDispatcher};
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::resilience::{BreakerRegistry, BreakerStatus};
use crate::types::{
    AudioRequest, Capability, ChatReply, ChatRequest, Dispatched, ImageAnalysis, ImageRequest, NormalizedResult,
    Transcription,
};

/// Overall service condition reported by [`Gateway::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: HealthStatus,
    pub environment: Environment,
    pub token_configured: bool,
    pub breakers: Vec<BreakerStatus>,
}

/// Service container owning the breakers and every dispatcher.
pub struct Gateway {
    config: Config,
    breakers: BreakerRegistry,
    chat: ChatDispatcher,
    vision: VisionDispatcher,
    speech: SpeechDispatcher,
}

impl Gateway {
    /// Build a gateway talking to the real Hugging Face endpoints.
    pub fn from_config(config: Config) -> Result<Self> {
        let backends = Backends::from_config(&config);
        Self::new(config, backends)
    }

    pub fn new(config: Config, backends: Backends) -> Result<Self> {
        config.validate()?;

        let breakers = BreakerRegistry::new(
            config.resilience.failure_threshold,
            config.resilience.recovery_timeout(),
        );
        let settings = |capability| CallSettings::from_config(&config, capability, &breakers);
        let model = |capability, default: &str| {
            config
                .capability(capability)
                .model
                .clone()
                .unwrap_or_else(|| default.to_string())
        };

        let chat = ChatDispatcher::new(
            ProviderRegistry::from_config(&config, Capability::Chat)?,
            backends.clone(),
            settings(Capability::Chat),
        );
        let vision = VisionDispatcher::new(
            ProviderRegistry::from_config(&config, Capability::Sign)?,
            backends.clone(),
            settings(Capability::Sign),
        )
        .with_caption(settings(Capability::Caption), model(Capability::Caption, DEFAULT_CAPTION_MODEL))
        .with_detection(
            settings(Capability::Detection),
            model(Capability::Detection, DEFAULT_DETECTION_MODEL),
        );
        let speech = SpeechDispatcher::new(
            backends,
            settings(Capability::Transcription),
            settings(Capability::Synthesis),
        )
        .with_models(
            model(Capability::Transcription, DEFAULT_TRANSCRIPTION_MODEL),
            model(Capability::Synthesis, DEFAULT_SYNTHESIS_MODEL),
        );

        info!(
            environment = %config.environment,
            chat_providers = chat.registry().len(),
            sign_providers = vision.registry().len(),
            token_configured = config.has_token(),
            "Gateway ready"
        );

        Ok(Self {
            config,
            breakers,
            chat,
            vision,
            speech,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Answer a plain chat message. Only blank input is an error.
    pub async fn chat(&self, text: &str) -> Result<ChatReply> {
        let request = ChatRequest::new(text)?;
        Ok(self.chat.dispatch(&request).await)
    }

    pub async fn chat_request(&self, request: &ChatRequest) -> ChatReply {
        self.chat.dispatch(request).await
    }

    pub async fn recognize_sign(&self, image: &ImageRequest) -> Dispatched<NormalizedResult> {
        self.vision.recognize_sign(image).await
    }

    pub async fn analyze_image(&self, image: &ImageRequest) -> Dispatched<ImageAnalysis> {
        self.vision.analyze_image(image).await
    }

    pub async fn transcribe(&self, audio: AudioRequest) -> Transcription {
        self.speech.transcribe(audio).await
    }

    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.speech.synthesize(text).await
    }

    pub fn breaker_status(&self) -> Vec<BreakerStatus> {
        self.breakers.status_all()
    }

    /// Close one breaker. Returns false for an unknown dependency class.
    pub fn reset_breaker(&self, class: &str) -> bool {
        let found = self.breakers.reset(class);
        if found {
            info!(breaker = %class, "Breaker reset by operator");
        }
        found
    }

    pub fn reset_all_breakers(&self) {
        self.breakers.reset_all();
        info!("All breakers reset by operator");
    }

    pub fn health(&self) -> Health {
        let status = if self.breakers.any_open() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Health {
            status,
            environment: self.config.environment,
            token_configured: self.config.has_token(),
            breakers: self.breaker_status(),
        }
    }
}
