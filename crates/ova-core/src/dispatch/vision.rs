use std::sync::atomic::{AtomicBool, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{correlation_id, Backends, CallSettings};
use crate::error::{ProviderError, ResilienceError};
use crate::normalize::{normalize_detections, normalize_generation, Normalizer};
use crate::provider::{LocalResponder, ProviderDescriptor, ProviderRegistry, ResourceType};
use crate::types::{Capability, DetectedObject, Dispatched, ImageAnalysis, ImageRequest, NormalizedResult, ReplySource};

pub const DEFAULT_CAPTION_MODEL: &str = "nlpconnect/vit-gpt2-image-captioning";
pub const DEFAULT_DETECTION_MODEL: &str = "facebook/detr-resnet-50";

/// Ways of passing an image to a space route, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageConvention {
    /// Upload first, then pass a file reference.
    FileReference,
    /// Pass the image inline as a base64 data URL.
    InlineDataUrl,
}

impl ImageConvention {
    pub const ALL: &'static [ImageConvention] = &[ImageConvention::FileReference, ImageConvention::InlineDataUrl];
}

impl std::fmt::Display for ImageConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageConvention::FileReference => write!(f, "file_reference"),
            ImageConvention::InlineDataUrl => write!(f, "inline_data_url"),
        }
    }
}

/// Sign recognition over a provider registry, plus captioning and object
/// detection on fixed raw models.
pub struct VisionDispatcher {
    registry: ProviderRegistry,
    backends: Backends,
    sign: CallSettings,
    caption: CallSettings,
    detection: CallSettings,
    caption_model: String,
    detection_model: String,
    normalizer: Normalizer,
    responder: LocalResponder,
}

impl VisionDispatcher {
    /// Uses `sign` settings for every call and the default analysis models.
    pub fn new(registry: ProviderRegistry, backends: Backends, sign: CallSettings) -> Self {
        Self {
            registry,
            backends,
            caption: sign.clone(),
            detection: sign.clone(),
            sign,
            caption_model: DEFAULT_CAPTION_MODEL.to_string(),
            detection_model: DEFAULT_DETECTION_MODEL.to_string(),
            normalizer: Normalizer::default(),
            responder: LocalResponder::new(),
        }
    }

    pub fn with_caption(mut self, settings: CallSettings, model: impl Into<String>) -> Self {
        self.caption = settings;
        self.caption_model = model.into();
        self
    }

    pub fn with_detection(mut self, settings: CallSettings, model: impl Into<String>) -> Self {
        self.detection = settings;
        self.detection_model = model.into();
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Recognize a sign. Exhaustion yields the degraded result from the
    /// local responder with `success = false`.
    pub async fn recognize_sign(&self, image: &ImageRequest) -> Dispatched<NormalizedResult> {
        let cid = correlation_id();
        let mut attempts = 0;
        debug!(correlation_id = %cid, size = image.bytes.len(), content_type = %image.content_type, "Sign dispatch started");

        for provider in self.registry.candidates() {
            let call = self.sign.call::<NormalizedResult>(format!("sign:{}", provider.name));
            let outcome = call.run(|| self.invoke(provider, image)).await;
            if !matches!(outcome, Err(ResilienceError::CircuitOpen(_))) {
                attempts += 1;
            }
            match outcome {
                Ok(result) if !result.success => {
                    warn!(
                        correlation_id = %cid,
                        provider = %provider.name,
                        label = %result.label_or_text,
                        reason = %result.error.as_deref().unwrap_or(&result.source_format),
                        "Sign provider answered without a recognition"
                    );
                }
                Ok(result) => {
                    info!(
                        correlation_id = %cid,
                        provider = %provider.name,
                        label = %result.label_or_text,
                        confidence = result.confidence,
                        "Sign recognized"
                    );
                    return Dispatched {
                        value: result,
                        source: ReplySource::Provider(provider.name.clone()),
                        attempts,
                    };
                }
                Err(ResilienceError::CircuitOpen(class)) => {
                    warn!(correlation_id = %cid, breaker = %class, "Circuit open, skipping remaining sign providers");
                    break;
                }
                Err(ResilienceError::Failed(e)) => {
                    warn!(
                        correlation_id = %cid,
                        provider = %provider.name,
                        calling_convention = e.is_calling_convention_mismatch(),
                        error = %e,
                        "Sign provider failed"
                    );
                }
            }
        }

        error!(correlation_id = %cid, attempts, "All sign providers failed");
        Dispatched {
            value: self.responder.unavailable_result(Capability::Sign),
            source: ReplySource::LocalFallback,
            attempts,
        }
    }

    async fn invoke(&self, provider: &ProviderDescriptor, image: &ImageRequest) -> Result<NormalizedResult, ProviderError> {
        match provider.resource_type {
            ResourceType::RawModel => {
                let raw = self
                    .backends
                    .inference
                    .image_classification(&provider.resource, image)
                    .await?;
                Ok(self.normalizer.normalize(&raw))
            }
            ResourceType::InteractiveSpace => self.ask_space(provider, image).await,
        }
    }

    /// Try each route with each image convention. Anything short of a
    /// transport failure moves on to the next combination.
    async fn ask_space(&self, provider: &ProviderDescriptor, image: &ImageRequest) -> Result<NormalizedResult, ProviderError> {
        let mut file_ref: Option<Value> = None;
        let mut last_error = None;

        for route in provider.image_routes() {
            for convention in ImageConvention::ALL {
                let argument = match convention {
                    ImageConvention::FileReference => match self.file_reference(provider, image, &mut file_ref).await {
                        Ok(v) => v,
                        Err(e) if e.is_transport() => return Err(e),
                        Err(e) => {
                            debug!(provider = %provider.name, error = %e, "Upload failed, trying inline image");
                            last_error = Some(e);
                            continue;
                        }
                    },
                    ImageConvention::InlineDataUrl => Value::String(data_url(image)),
                };

                match self.backends.spaces.predict(&provider.resource, route, vec![argument]).await {
                    Ok(raw) => return Ok(self.normalizer.normalize(&raw)),
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => {
                        if e.is_calling_convention_mismatch() {
                            warn!(
                                provider = %provider.name,
                                route,
                                convention = %convention,
                                calling_convention = true,
                                error = %e,
                                "Space rejected image layout"
                            );
                        } else {
                            debug!(provider = %provider.name, route, convention = %convention, error = %e, "Space route failed");
                        }
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other(format!("no route answered on {}", provider.name))))
    }

    async fn file_reference(
        &self,
        provider: &ProviderDescriptor,
        image: &ImageRequest,
        cached: &mut Option<Value>,
    ) -> Result<Value, ProviderError> {
        if let Some(v) = cached {
            return Ok(v.clone());
        }
        let file_name = format!("image.{}", image.extension());
        let path = self
            .backends
            .spaces
            .upload(&provider.resource, &file_name, image.bytes.clone(), &image.content_type)
            .await?;
        let reference = json!({ "path": path, "meta": { "_type": "gradio.FileData" } });
        *cached = Some(reference.clone());
        Ok(reference)
    }

    /// Object detection plus a caption. Detection failures leave the object
    /// list empty; a failed or empty caption makes the whole analysis
    /// unavailable.
    pub async fn analyze_image(&self, image: &ImageRequest) -> Dispatched<ImageAnalysis> {
        let cid = correlation_id();
        let detection_called = AtomicBool::new(false);
        let caption_called = AtomicBool::new(false);

        let objects: Vec<DetectedObject> = self
            .detection
            .call::<Vec<DetectedObject>>("detection")
            .fallback(Vec::new())
            .run(|| {
                detection_called.store(true, Ordering::Relaxed);
                async {
                    let raw = self
                        .backends
                        .inference
                        .object_detection(&self.detection_model, image)
                        .await?;
                    Ok(normalize_detections(&raw))
                }
            })
            .await
            .unwrap_or_default();

        let caption = self
            .caption
            .call::<Option<String>>("caption")
            .run(|| {
                caption_called.store(true, Ordering::Relaxed);
                async {
                    let raw = self.backends.inference.image_to_text(&self.caption_model, image).await?;
                    Ok(normalize_generation(&raw, None))
                }
            })
            .await;

        let attempts = [&detection_called, &caption_called]
            .iter()
            .filter(|called| called.load(Ordering::Relaxed))
            .count();

        match caption {
            Ok(Some(description)) => {
                info!(correlation_id = %cid, objects = objects.len(), attempts, "Image analyzed");
                Dispatched {
                    value: ImageAnalysis { objects, description },
                    source: ReplySource::Provider(self.caption_model.clone()),
                    attempts,
                }
            }
            Ok(None) => {
                warn!(correlation_id = %cid, attempts, "Caption model returned no text");
                Dispatched {
                    value: ImageAnalysis::unavailable(),
                    source: ReplySource::LocalFallback,
                    attempts,
                }
            }
            Err(e) => {
                warn!(correlation_id = %cid, attempts, error = %e, "Image analysis unavailable");
                Dispatched {
                    value: ImageAnalysis::unavailable(),
                    source: ReplySource::LocalFallback,
                    attempts,
                }
            }
        }
    }
}

fn data_url(image: &ImageRequest) -> String {
    format!("data:{};base64,{}", image.content_type, STANDARD.encode(&image.bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{settings, ScriptedInference, ScriptedSpaces};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn image() -> ImageRequest {
        ImageRequest::new(vec![0x89, 0x50, 0x4e, 0x47], "image/png").unwrap()
    }

    fn dispatcher(
        providers: Vec<ProviderDescriptor>,
        inference: Arc<ScriptedInference>,
        spaces: Arc<ScriptedSpaces>,
    ) -> VisionDispatcher {
        VisionDispatcher::new(
            ProviderRegistry::new(Capability::Sign, providers).unwrap(),
            Backends::new(inference, spaces),
            settings(5),
        )
    }

    fn space(name: &str) -> ProviderDescriptor {
        ProviderDescriptor::new(name, format!("o/{}", name), ResourceType::InteractiveSpace)
    }

    #[tokio::test]
    async fn test_route_list_and_upload_reuse() {
        let spaces = ScriptedSpaces::new(|_, route, _| match route {
            "/predict" => Err(ProviderError::Api { status: 404, message: "not found".into() }),
            _ => Ok(json!(["B", 0.42])),
        });
        let d = dispatcher(
            vec![space("asl")],
            ScriptedInference::new(|_, _| Ok(Value::Null)),
            spaces.clone(),
        );
        let out = d.recognize_sign(&image()).await;
        assert_eq!(out.source, ReplySource::Provider("asl".into()));
        assert_eq!(out.value.label_or_text, "B");
        assert_eq!(out.value.confidence, 42.0);
        assert_eq!(spaces.uploads.load(Ordering::SeqCst), 1);

        let calls = spaces.calls.lock().unwrap();
        // /predict with both conventions, then /process with a file reference.
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].1, "/process");
        assert_eq!(calls[2].2[0]["meta"]["_type"], "gradio.FileData");
    }

    #[tokio::test]
    async fn test_inline_image_after_convention_mismatch() {
        let spaces = ScriptedSpaces::new(|_, _, data| {
            if data[0].is_object() {
                Err(ProviderError::Remote("'bool' object is not iterable".into()))
            } else {
                assert!(data[0].as_str().unwrap().starts_with("data:image/png;base64,"));
                Ok(json!({"label": "cat", "score": 0.995}))
            }
        });
        let d = dispatcher(
            vec![space("asl").with_hint("/predict")],
            ScriptedInference::new(|_, _| Ok(Value::Null)),
            spaces.clone(),
        );
        let out = d.recognize_sign(&image()).await;
        assert_eq!(out.value.label_or_text, "cat");
        assert_eq!(out.value.confidence, 99.5);
        assert_eq!(spaces.call_count(), 2);
    }

    #[tokio::test]
    async fn test_no_recognition_moves_to_next_provider() {
        let spaces = ScriptedSpaces::new(|_, _, _| Ok(json!(["Sin reconocimiento", 0.0])));
        let inference = ScriptedInference::new(|op, _| {
            assert_eq!(op, "image_classification");
            Ok(json!([{"label": "L", "score": 0.66}, {"label": "I", "score": 0.2}]))
        });
        let d = dispatcher(
            vec![
                space("asl").with_hint("/predict"),
                ProviderDescriptor::new("classifier", "o/classifier", ResourceType::RawModel),
            ],
            inference,
            spaces,
        );
        let out = d.recognize_sign(&image()).await;
        assert_eq!(out.source, ReplySource::Provider("classifier".into()));
        assert_eq!(out.value.label_or_text, "L");
        assert_eq!(out.attempts, 2);
        assert_eq!(d.sign.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_no_recognition_keeps_breaker_closed() {
        let spaces = ScriptedSpaces::new(|_, _, _| Ok(json!(["Sin reconocimiento", 0.0])));
        let d = dispatcher(
            vec![space("a").with_hint("/predict"), space("b").with_hint("/predict")],
            ScriptedInference::new(|_, _| Ok(Value::Null)),
            spaces.clone(),
        );
        for _ in 0..4 {
            let out = d.recognize_sign(&image()).await;
            assert!(out.source.is_fallback());
            assert_eq!(out.attempts, 2);
        }
        assert!(!d.sign.breaker.is_open());
        assert_eq!(d.sign.breaker.failure_count(), 0);
        assert_eq!(spaces.call_count(), 8);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_unavailable_result() {
        let spaces = ScriptedSpaces::new(|_, _, _| Err(ProviderError::Api { status: 422, message: "bad input".into() }));
        let d = dispatcher(
            vec![space("a").with_hint("/predict"), space("b").with_hint("/predict")],
            ScriptedInference::new(|_, _| Ok(Value::Null)),
            spaces.clone(),
        );
        let out = d.recognize_sign(&image()).await;
        assert!(out.source.is_fallback());
        assert!(!out.value.success);
        assert_eq!(out.value.source_format, "all_providers_failed");
        assert_eq!(spaces.spaces_called(), vec!["o/a", "o/a", "o/b", "o/b"]);
    }

    #[tokio::test]
    async fn test_analysis_with_failed_detection() {
        let inference = ScriptedInference::new(|op, _| match op {
            "object_detection" => Err(ProviderError::Api { status: 400, message: "bad image".into() }),
            _ => Ok(json!([{"generated_text": "a person sitting on a chair"}])),
        });
        let d = dispatcher(vec![space("asl")], inference, ScriptedSpaces::new(|_, _, _| Ok(Value::Null)));
        let out = d.analyze_image(&image()).await;
        assert!(out.value.objects.is_empty());
        assert_eq!(out.value.description, "a person sitting on a chair");
        assert_eq!(out.source, ReplySource::Provider(DEFAULT_CAPTION_MODEL.into()));
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test]
    async fn test_empty_caption_is_unavailable_without_breaker_failure() {
        let inference = ScriptedInference::new(|op, _| match op {
            "object_detection" => Ok(json!([])),
            _ => Ok(json!([{"generated_text": "  "}])),
        });
        let d = dispatcher(vec![space("asl")], inference, ScriptedSpaces::new(|_, _, _| Ok(Value::Null)));
        let out = d.analyze_image(&image()).await;
        assert_eq!(out.value, ImageAnalysis::unavailable());
        assert_eq!(out.attempts, 2);
        assert_eq!(d.caption.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_analysis_attempts_zero_when_breaker_open() {
        let inference = ScriptedInference::new(|_, _| Ok(json!([{"generated_text": "never"}])));
        let d = dispatcher(vec![space("asl")], inference.clone(), ScriptedSpaces::new(|_, _, _| Ok(Value::Null)));
        for _ in 0..5 {
            d.caption.breaker.record_failure();
        }
        let out = d.analyze_image(&image()).await;
        assert!(out.source.is_fallback());
        assert_eq!(out.attempts, 0);
        assert_eq!(inference.call_count(), 0);
    }

    #[tokio::test]
    async fn test_analysis_unavailable_when_caption_fails() {
        let inference = ScriptedInference::new(|op, _| match op {
            "object_detection" => Ok(json!([{"label": "person", "score": 0.9}])),
            _ => Err(ProviderError::Api { status: 400, message: "bad image".into() }),
        });
        let d = dispatcher(vec![space("asl")], inference, ScriptedSpaces::new(|_, _, _| Ok(Value::Null)));
        let out = d.analyze_image(&image()).await;
        assert_eq!(out.value, ImageAnalysis::unavailable());
        assert!(out.source.is_fallback());
    }
}
