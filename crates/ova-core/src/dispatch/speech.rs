use std::sync::Arc;

use tracing::{info, warn};

use super::{correlation_id, Backends, CallSettings};
use crate::error::ProviderError;
use crate::normalize::normalize_generation;
use crate::types::{AudioRequest, Transcription};

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "openai/whisper-large-v3";
pub const DEFAULT_SYNTHESIS_MODEL: &str = "espnet/kan-bayashi_ljspeech_vits";

/// Speech-to-text and text-to-speech on single raw models.
///
/// Calls run detached so a client that hangs up mid-request does not stop
/// the breaker from hearing how the call ended.
pub struct SpeechDispatcher {
    backends: Backends,
    transcription: CallSettings,
    synthesis: CallSettings,
    transcription_model: String,
    synthesis_model: String,
}

impl SpeechDispatcher {
    pub fn new(backends: Backends, transcription: CallSettings, synthesis: CallSettings) -> Self {
        Self {
            backends,
            transcription,
            synthesis,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            synthesis_model: DEFAULT_SYNTHESIS_MODEL.to_string(),
        }
    }

    pub fn with_models(mut self, transcription: impl Into<String>, synthesis: impl Into<String>) -> Self {
        self.transcription_model = transcription.into();
        self.synthesis_model = synthesis.into();
        self
    }

    /// Failures come back in-band with `success = false`.
    pub async fn transcribe(&self, audio: AudioRequest) -> Transcription {
        let cid = correlation_id();
        let inference = self.backends.inference.clone();
        let model = self.transcription_model.clone();
        let audio = Arc::new(audio);

        let outcome = self
            .transcription
            .call::<Option<String>>("transcription")
            .run_detached(move || {
                let inference = inference.clone();
                let model = model.clone();
                let audio = audio.clone();
                async move {
                    let raw = inference.speech_to_text(&model, &audio).await?;
                    Ok(normalize_generation(&raw, None))
                }
            })
            .await;

        match outcome {
            Ok(None) => {
                warn!(correlation_id = %cid, "Transcription came back empty");
                Transcription {
                    text: String::new(),
                    success: false,
                    error: Some(ProviderError::Unrecognized("empty transcription".to_string()).to_string()),
                }
            }
            Ok(Some(text)) => {
                info!(correlation_id = %cid, chars = text.chars().count(), "Audio transcribed");
                Transcription {
                    text,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(correlation_id = %cid, error = %e, "Transcription failed");
                Transcription {
                    text: String::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Synthesized audio, or None when the text is blank or the call fails.
    pub async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            warn!("Refusing to synthesize empty text");
            return None;
        }

        let cid = correlation_id();
        let inference = self.backends.inference.clone();
        let model = self.synthesis_model.clone();
        let text = text.to_string();

        let outcome = self
            .synthesis
            .call::<Vec<u8>>("synthesis")
            .run_detached(move || {
                let inference = inference.clone();
                let model = model.clone();
                let text = text.clone();
                async move {
                    inference.text_to_speech(&model, &text).await
                }
            })
            .await;

        match outcome {
            Ok(audio) if audio.is_empty() => {
                warn!(correlation_id = %cid, "Synthesis returned no audio");
                None
            }
            Ok(audio) => {
                info!(correlation_id = %cid, bytes = audio.len(), "Speech synthesized");
                Some(audio)
            }
            Err(e) => {
                warn!(correlation_id = %cid, error = %e, "Speech synthesis failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{settings, ScriptedInference, ScriptedSpaces};
    use serde_json::{json, Value};

    fn dispatcher(inference: Arc<ScriptedInference>) -> SpeechDispatcher {
        let s = settings(5);
        SpeechDispatcher::new(
            Backends::new(inference, ScriptedSpaces::new(|_, _, _| Ok(Value::Null))),
            s.clone(),
            s,
        )
    }

    fn audio() -> AudioRequest {
        AudioRequest::new(vec![1, 2, 3, 4], "audio/wav").unwrap()
    }

    #[tokio::test]
    async fn test_transcribe() {
        let inference = ScriptedInference::new(|op, model| {
            assert_eq!(op, "speech_to_text");
            assert_eq!(model, DEFAULT_TRANSCRIPTION_MODEL);
            Ok(json!({"text": " hola mundo "}))
        });
        let out = dispatcher(inference).transcribe(audio()).await;
        assert!(out.success);
        assert_eq!(out.text, "hola mundo");
    }

    #[tokio::test]
    async fn test_transcribe_failure_is_in_band() {
        let inference = ScriptedInference::new(|_, _| Err(ProviderError::Api { status: 400, message: "bad audio".into() }));
        let d = dispatcher(inference);
        let out = d.transcribe(audio()).await;
        assert!(!out.success);
        assert!(out.text.is_empty());
        assert!(out.error.unwrap().contains("bad audio"));
        assert_eq!(d.transcription.breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcription_is_in_band_without_breaker_failure() {
        let inference = ScriptedInference::new(|_, _| Ok(json!({"text": "  "})));
        let d = dispatcher(inference);
        let out = d.transcribe(audio()).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("empty transcription"));
        assert_eq!(d.transcription.breaker.failure_count(), 0);

        let inference = ScriptedInference::new(|_, _| Ok(json!("")));
        let d = dispatcher(inference);
        assert_eq!(d.synthesize("Hola").await, None);
        assert_eq!(d.synthesis.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_synthesize() {
        let inference = ScriptedInference::new(|op, _| {
            assert_eq!(op, "text_to_speech");
            Ok(json!("RIFF"))
        });
        let d = dispatcher(inference).with_models("stt/model", "tts/model");
        assert_eq!(d.synthesize("Hola").await, Some(b"RIFF".to_vec()));
    }

    #[tokio::test]
    async fn test_synthesize_failure_and_blank_input() {
        let inference = ScriptedInference::new(|_, _| Err(ProviderError::Parse("expected audio response".into())));
        let d = dispatcher(inference.clone());
        assert_eq!(d.synthesize("Hola").await, None);
        assert_eq!(d.synthesize("   ").await, None);
        assert_eq!(inference.call_count(), 1);
    }
}
