pub mod inference;
pub mod local;
pub mod space;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::{ConfigError, ProviderError};
use crate::types::{AudioRequest, Capability, ImageRequest};

pub use inference::HfInferenceClient;
pub use local::{FallbackCategory, LocalResponder};
pub use space::GradioSpaceClient;

/// Routes tried on an image space that has no invocation hint.
pub const DEFAULT_IMAGE_ROUTES: &[&str] = &["/predict", "/process", "/classify"];

/// How a provider is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A hosted interactive app with named routes.
    InteractiveSpace,
    /// A model behind the plain inference API.
    RawModel,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::InteractiveSpace => write!(f, "interactive_space"),
            ResourceType::RawModel => write!(f, "raw_model"),
        }
    }
}

/// One alternative backend for a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    /// Space slug (`owner/name`), space URL, or model id.
    pub resource: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_hint: Option<String>,
    #[serde(default)]
    pub supports_system_prompt: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            resource_type,
            invocation_hint: None,
            supports_system_prompt: false,
            enabled: true,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.invocation_hint = Some(hint.into());
        self
    }

    pub fn with_system_prompt(mut self, supported: bool) -> Self {
        self.supports_system_prompt = supported;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_space(&self) -> bool {
        self.resource_type == ResourceType::InteractiveSpace
    }

    /// Routes to try for image input: the hint alone, or the default list.
    pub fn image_routes(&self) -> Vec<&str> {
        match self.invocation_hint.as_deref() {
            Some(hint) => vec![hint],
            None => DEFAULT_IMAGE_ROUTES.to_vec(),
        }
    }
}

/// Ordered alternatives for one capability. Never empty.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    capability: Capability,
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(capability: Capability, providers: Vec<ProviderDescriptor>) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders(capability.to_string()));
        }
        Ok(Self { capability, providers })
    }

    /// Build the registry for `capability`, applying the environment reorder.
    pub fn from_config(config: &Config, capability: Capability) -> Result<Self, ConfigError> {
        let registry = Self::new(capability, config.providers_for(capability).to_vec())?;
        if config.prefers_raw_models() {
            Ok(registry.prefer_raw_models())
        } else {
            Ok(registry)
        }
    }

    /// Move raw models ahead of spaces, keeping the order within each group.
    pub fn prefer_raw_models(mut self) -> Self {
        self.providers
            .sort_by_key(|p| p.resource_type != ResourceType::RawModel);
        self
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Enabled providers in trial order.
    pub fn candidates(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn all(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Sampling settings for text generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.1,
        }
    }
}

/// Plain inference API for raw models. Outputs are returned as raw JSON for
/// the normalizer.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn text_generation(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Value, ProviderError>;

    async fn image_to_text(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError>;

    async fn object_detection(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError>;

    async fn image_classification(&self, model: &str, image: &ImageRequest) -> Result<Value, ProviderError>;

    async fn speech_to_text(&self, model: &str, audio: &AudioRequest) -> Result<Value, ProviderError>;

    /// Synthesized audio bytes.
    async fn text_to_speech(&self, model: &str, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Hosted interactive apps reached through named routes.
#[async_trait]
pub trait SpaceBackend: Send + Sync {
    /// Upload a file and return the server-side path to reference it by.
    async fn upload(
        &self,
        space: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError>;

    /// Call `api_name` with positional arguments and return its output.
    async fn predict(&self, space: &str, api_name: &str, data: Vec<Value>) -> Result<Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            Capability::Chat,
            vec![
                ProviderDescriptor::new("space-a", "a/a", ResourceType::InteractiveSpace),
                ProviderDescriptor::new("raw-b", "b/b", ResourceType::RawModel),
                ProviderDescriptor::new("space-c", "c/c", ResourceType::InteractiveSpace).disabled(),
                ProviderDescriptor::new("raw-d", "d/d", ResourceType::RawModel),
            ],
        )
        .unwrap()
    }

    fn names<'a>(it: impl Iterator<Item = &'a ProviderDescriptor>) -> Vec<&'a str> {
        it.map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_empty_registry_rejected() {
        match ProviderRegistry::new(Capability::Sign, Vec::new()) {
            Err(ConfigError::NoProviders(cap)) => assert_eq!(cap, "sign"),
            other => panic!("expected NoProviders, got {:?}", other),
        }
    }

    #[test]
    fn test_candidates_skip_disabled() {
        assert_eq!(names(registry().candidates()), vec!["space-a", "raw-b", "raw-d"]);
    }

    #[test]
    fn test_prefer_raw_models_is_stable() {
        let reordered = registry().prefer_raw_models();
        assert_eq!(names(reordered.all().iter()), vec!["raw-b", "raw-d", "space-a", "space-c"]);
    }

    #[test]
    fn test_from_config_reorders_in_production() {
        let mut cfg = Config::default();
        let dev = ProviderRegistry::from_config(&cfg, Capability::Chat).unwrap();
        assert!(dev.all()[0].is_space());

        cfg.environment = Environment::Production;
        let prod = ProviderRegistry::from_config(&cfg, Capability::Chat).unwrap();
        assert_eq!(prod.all()[0].resource_type, ResourceType::RawModel);
    }

    #[test]
    fn test_image_routes() {
        let plain = ProviderDescriptor::new("asl", "o/n", ResourceType::InteractiveSpace);
        assert_eq!(plain.image_routes(), vec!["/predict", "/process", "/classify"]);
        let hinted = plain.with_hint("/recognize");
        assert_eq!(hinted.image_routes(), vec!["/recognize"]);
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let json = r#"{"name": "x", "resource": "o/x", "resourceType": "interactive_space"}"#;
        let d: ProviderDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.enabled);
        assert!(!d.supports_system_prompt);
        assert!(d.invocation_hint.is_none());
    }
}
