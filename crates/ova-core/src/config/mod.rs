use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::provider::{ProviderDescriptor, ResourceType};
use crate::resilience::RetryPolicy;
use crate::types::Capability;

/// Default ASL recognition space, overridable with `HF_ASL_SPACE_URL`.
pub const DEFAULT_ASL_SPACE_URL: &str = "https://jhonarleycastillov-asl-image.hf.space";
pub const DEFAULT_INFERENCE_BASE: &str = "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_DEPENDENCY_CLASS: &str = "huggingface";

/// Root configuration for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub environment: Environment,
    pub huggingface: HuggingFaceConfig,
    pub resilience: ResilienceConfig,
    pub capabilities: CapabilitiesConfig,
    pub providers: ProvidersConfig,
    /// Put raw models ahead of interactive spaces. Unset means "only in production".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_raw_models: Option<bool>,
}

impl Config {
    pub fn capability(&self, capability: Capability) -> &CapabilityConfig {
        let c = &self.capabilities;
        match capability {
            Capability::Chat => &c.chat,
            Capability::Sign => &c.sign,
            Capability::Caption => &c.caption,
            Capability::Detection => &c.detection,
            Capability::Transcription => &c.transcription,
            Capability::Synthesis => &c.synthesis,
        }
    }

    /// Provider registry entries for a capability. Raw-model capabilities
    /// have no registry and return an empty slice.
    pub fn providers_for(&self, capability: Capability) -> &[ProviderDescriptor] {
        match capability {
            Capability::Chat => &self.providers.chat,
            Capability::Sign => &self.providers.sign,
            _ => &[],
        }
    }

    pub fn prefers_raw_models(&self) -> bool {
        self.prefer_raw_models
            .unwrap_or(self.environment == Environment::Production)
    }

    pub fn has_token(&self) -> bool {
        !self.huggingface.token.trim().is_empty()
    }

    /// Retry policy for a capability, using the shared backoff settings.
    pub fn retry_policy(&self, capability: Capability) -> RetryPolicy {
        RetryPolicy::new(
            self.capability(capability).retry_attempts,
            Duration::from_millis(self.resilience.base_delay_ms),
            Duration::from_millis(self.resilience.max_delay_ms),
        )
    }

    /// Check the config is usable before building a gateway from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for capability in [Capability::Chat, Capability::Sign] {
            let providers = self.providers_for(capability);
            if providers.is_empty() {
                return Err(ConfigError::NoProviders(capability.to_string()));
            }
            if let Some(p) = providers.iter().find(|p| p.resource.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' for {} has no resource",
                    p.name, capability
                )));
            }
        }
        if self.resilience.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failureThreshold must be at least 1".into()));
        }
        if self.huggingface.inference_base.trim().is_empty() {
            return Err(ConfigError::Invalid("inferenceBase must not be empty".into()));
        }
        Ok(())
    }
}

/// Deployment environment, as read from `ENVIRONMENT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Lenient parse of an environment name. Anything unknown is development.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuggingFaceConfig {
    pub token: String,
    pub inference_base: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            inference_base: DEFAULT_INFERENCE_BASE.to_string(),
        }
    }
}

/// Breaker and backoff settings shared by all capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl ResilienceConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Per-capability call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityConfig {
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    /// Breaker shared by every call of this capability.
    pub dependency_class: String,
    /// Model id for capabilities served by a single raw model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_attempts: 3,
            dependency_class: DEFAULT_DEPENDENCY_CLASS.to_string(),
            model: None,
        }
    }
}

impl CapabilityConfig {
    fn with(timeout_secs: u64, retry_attempts: u32, model: Option<&str>) -> Self {
        Self {
            timeout_secs,
            retry_attempts,
            model: model.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitiesConfig {
    pub chat: CapabilityConfig,
    pub sign: CapabilityConfig,
    pub caption: CapabilityConfig,
    pub detection: CapabilityConfig,
    pub transcription: CapabilityConfig,
    pub synthesis: CapabilityConfig,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            chat: CapabilityConfig::with(30, 2, None),
            sign: CapabilityConfig::with(30, 2, None),
            caption: CapabilityConfig::with(60, 3, Some("nlpconnect/vit-gpt2-image-captioning")),
            detection: CapabilityConfig::with(60, 3, Some("facebook/detr-resnet-50")),
            transcription: CapabilityConfig::with(60, 3, Some("openai/whisper-large-v3")),
            synthesis: CapabilityConfig::with(60, 3, Some("espnet/kan-bayashi_ljspeech_vits")),
        }
    }
}

/// Ordered provider registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub chat: Vec<ProviderDescriptor>,
    pub sign: Vec<ProviderDescriptor>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            chat: vec![
                ProviderDescriptor::new("gpt-oss-20b", "merterbak/gpt-oss-20b-demo", ResourceType::InteractiveSpace)
                    .with_hint("/chat")
                    .with_system_prompt(true),
                ProviderDescriptor::new(
                    "gpt-oss-120b",
                    "https://amd-gpt-oss-120b-chatbot.hf.space",
                    ResourceType::InteractiveSpace,
                ),
                ProviderDescriptor::new("qwen2.5-1.5b", "Qwen/Qwen2.5-1.5B-Instruct", ResourceType::RawModel)
                    .with_system_prompt(true),
            ],
            sign: vec![
                ProviderDescriptor::new("asl-primary", DEFAULT_ASL_SPACE_URL, ResourceType::InteractiveSpace),
                ProviderDescriptor::new("asl-image", "JhonArleyCastilloV/ASL_image", ResourceType::InteractiveSpace)
                    .with_hint("/predict"),
            ],
        }
    }
}

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `OVA_CONFIG` env var: full JSON config
/// 2. File (`config_path`, or `~/.ova/config.json`)
/// 3. Individual env vars applied on top
pub fn load_config_from_env(config_path: Option<&Path>) -> Config {
    let mut cfg = None;
    if let Ok(json) = std::env::var("OVA_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => cfg = Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse OVA_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = cfg.unwrap_or_else(|| load_config(config_path));
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg
}

/// Overlay individual environment variables, read through `lookup`.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("HF_TOKEN").or_else(|| non_empty("HF_API_KEY")) {
        cfg.huggingface.token = v;
    }
    if let Some(v) = non_empty("ENVIRONMENT") {
        cfg.environment = Environment::from_name(&v);
    }
    if let Some(v) = non_empty("HF_ASL_SPACE_URL") {
        match cfg.providers.sign.first_mut() {
            Some(primary) => primary.resource = v,
            None => cfg.providers.sign.push(ProviderDescriptor::new(
                "asl-primary",
                v,
                ResourceType::InteractiveSpace,
            )),
        }
    }
    if let Some(v) = non_empty("OVA_FAILURE_THRESHOLD") {
        match v.trim().parse::<u32>() {
            Ok(n) => cfg.resilience.failure_threshold = n,
            Err(_) => tracing::warn!("Ignoring invalid OVA_FAILURE_THRESHOLD: {}", v),
        }
    }
    if let Some(v) = non_empty("OVA_RECOVERY_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(n) => cfg.resilience.recovery_timeout_secs = n,
            Err(_) => tracing::warn!("Ignoring invalid OVA_RECOVERY_TIMEOUT_SECS: {}", v),
        }
    }
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ova")
        .join("config.json")
}

/// Load configuration from file or fall back to defaults.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> std::result::Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        crate::util::ensure_dir(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}
