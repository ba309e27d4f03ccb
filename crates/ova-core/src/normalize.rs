//! Turns whatever a provider returned into a [`NormalizedResult`].
//!
//! Raw output is first classified into a [`RawShape`], then each shape has
//! exactly one parse rule. Confidences always end up on the 0–100 scale:
//! values at or below 1.0 are treated as fractions and multiplied by 100.
//! Nothing in here panics on unexpected input; odd shapes become `unknown`
//! results with zero confidence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::types::{Alternative, BoundingBox, DetectedObject, NormalizedResult};

/// Confidence given to a plain-text answer with no score attached.
pub const PLAIN_TEXT_CONFIDENCE: f64 = 80.0;
/// Confidence given to a bare number or boolean.
pub const SCALAR_CONFIDENCE: f64 = 100.0;

/// Labels that mean "the model saw nothing".
pub const NO_RECOGNITION_SENTINELS: &[&str] = &["sin reconocimiento", "no recognition", "desconocido", "unknown"];

const LABEL_KEYS: &[&str] = &["label", "prediction", "result", "label_or_text"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score", "probability"];
const TEXT_KEYS: &[&str] = &["generated_text", "text", "response", "content", "output"];
const ASSISTANT_MARKERS: &[&str] = &["Assistant:", "Asistente:"];

static ANNOTATED_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(.*?)\s*\(\s*(\d+(?:\.\d+)?)\s*(%?)\s*\)\s*$").expect("valid annotated text pattern")
});

/// The closed set of output shapes the normalizer understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RawShape<'a> {
    /// One-element sequence; unwrapped and classified again.
    Singleton(&'a Value),
    /// `[label, score, ...]`
    LabelScore { label: &'a str, score: f64 },
    /// `[{label, score}, ...]` as produced by classification models.
    RankedList(Vec<(String, f64)>),
    Mapping(&'a Map<String, Value>),
    Text(&'a str),
    /// Number or boolean.
    Scalar(&'a Value),
    Unknown(&'a Value),
}

impl<'a> RawShape<'a> {
    pub fn classify(raw: &'a Value) -> Self {
        match raw {
            Value::Array(items) if items.len() == 1 => RawShape::Singleton(&items[0]),
            Value::Array(items) if items.len() >= 2 => {
                if let (Some(label), Some(score)) = (items[0].as_str(), items[1].as_f64()) {
                    return RawShape::LabelScore { label, score };
                }
                match ranked_entries(items) {
                    Some(entries) => RawShape::RankedList(entries),
                    None => RawShape::Unknown(raw),
                }
            }
            Value::Object(map) => RawShape::Mapping(map),
            Value::String(s) => RawShape::Text(s),
            Value::Number(_) | Value::Bool(_) => RawShape::Scalar(raw),
            _ => RawShape::Unknown(raw),
        }
    }
}

/// Recognition-output normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    pub plain_text_confidence: f64,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            plain_text_confidence: PLAIN_TEXT_CONFIDENCE,
        }
    }
}

impl Normalizer {
    pub fn normalize(&self, raw: &Value) -> NormalizedResult {
        match RawShape::classify(raw) {
            RawShape::Singleton(inner) => self.normalize(inner),
            RawShape::LabelScore { label, score } => {
                finish(label.to_string(), to_percent(score), Vec::new(), None, "sequence")
            }
            RawShape::RankedList(entries) => from_ranked(entries),
            RawShape::Mapping(map) => from_mapping(map),
            RawShape::Text(text) => self.from_text(text),
            RawShape::Scalar(v) => finish(value_to_label(v), SCALAR_CONFIDENCE, Vec::new(), None, "scalar"),
            RawShape::Unknown(v) => finish(value_to_label(v), 0.0, Vec::new(), None, "unknown"),
        }
    }

    fn from_text(&self, text: &str) -> NormalizedResult {
        if let Some(caps) = ANNOTATED_TEXT.captures(text) {
            let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let value = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(0.0);
            let has_percent = caps.get(3).map(|m| !m.as_str().is_empty()).unwrap_or(false);
            let confidence = if has_percent { value } else { to_percent(value) };
            return finish(label.to_string(), confidence, Vec::new(), None, "annotated_text");
        }
        finish(text.trim().to_string(), self.plain_text_confidence, Vec::new(), None, "plain_text")
    }
}

/// Normalize a recognition output with the default policy.
pub fn normalize_prediction(raw: &Value) -> NormalizedResult {
    Normalizer::default().normalize(raw)
}

fn from_ranked(mut entries: Vec<(String, f64)>) -> NormalizedResult {
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut iter = entries.into_iter();
    let (label, score) = iter.next().unwrap_or_default();
    let alternatives = iter
        .map(|(label, score)| Alternative {
            label,
            confidence: round2(clamp(to_percent(score))),
        })
        .collect();
    finish(label, to_percent(score), alternatives, None, "ranked_list")
}

fn from_mapping(map: &Map<String, Value>) -> NormalizedResult {
    // An already-normalized result carries 0–100 values; leave them alone.
    let canonical = map.contains_key("label_or_text");
    let scale = |v: f64| if canonical { v } else { to_percent(v) };

    let error = map
        .get("error")
        .filter(|v| !v.is_null())
        .map(value_to_label)
        .filter(|e| !e.trim().is_empty());

    let label = match LABEL_KEYS.iter().find_map(|k| map.get(*k)) {
        Some(v) => value_to_label(v),
        None => {
            return finish(Value::Object(map.clone()).to_string(), 0.0, Vec::new(), error, "unknown");
        }
    };

    let gradio_confidences = map
        .get("confidences")
        .and_then(|v| v.as_array())
        .and_then(|items| ranked_entries(items));

    let confidence = CONFIDENCE_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(number_of))
        .map(scale)
        .or_else(|| {
            gradio_confidences
                .as_ref()
                .and_then(|entries| entries.iter().find(|(l, _)| *l == label))
                .map(|(_, c)| to_percent(*c))
        })
        .unwrap_or(0.0);

    let alternatives = match (&gradio_confidences, map.get("alternatives").and_then(|v| v.as_array())) {
        (_, Some(items)) => items
            .iter()
            .filter_map(alternative_of)
            .map(|(l, c)| Alternative {
                label: l,
                confidence: round2(clamp(scale(c))),
            })
            .collect(),
        (Some(entries), None) => entries
            .iter()
            .filter(|(l, _)| *l != label)
            .map(|(l, c)| Alternative {
                label: l.clone(),
                confidence: round2(clamp(to_percent(*c))),
            })
            .collect(),
        (None, None) => Vec::new(),
    };

    finish(label, confidence, alternatives, error, "mapping")
}

/// `{label, score}` object or `[label, score]` pair.
fn alternative_of(v: &Value) -> Option<(String, f64)> {
    match v {
        Value::Object(m) => {
            let label = LABEL_KEYS.iter().find_map(|k| m.get(*k)).map(value_to_label)?;
            let score = CONFIDENCE_KEYS.iter().find_map(|k| m.get(*k).and_then(number_of))?;
            Some((label, score))
        }
        Value::Array(pair) if pair.len() >= 2 => Some((value_to_label(&pair[0]), number_of(&pair[1])?)),
        _ => None,
    }
}

/// Every element is a `{label, score}` object.
fn ranked_entries(items: &[Value]) -> Option<Vec<(String, f64)>> {
    if items.is_empty() || !items.iter().all(|v| v.is_object()) {
        return None;
    }
    items.iter().map(alternative_of).collect()
}

fn finish(
    label: String,
    confidence: f64,
    alternatives: Vec<Alternative>,
    error: Option<String>,
    source_format: &str,
) -> NormalizedResult {
    let confidence = round2(clamp(confidence));
    let success = error.is_none() && confidence > 0.0 && !is_no_recognition(&label);
    NormalizedResult {
        label_or_text: label,
        confidence,
        alternatives,
        success,
        error,
        source_format: source_format.to_string(),
    }
}

/// Empty labels count as no recognition too.
pub fn is_no_recognition(label: &str) -> bool {
    let label = label.trim();
    label.is_empty()
        || NO_RECOGNITION_SENTINELS
            .iter()
            .any(|s| label.eq_ignore_ascii_case(s))
}

fn to_percent(v: f64) -> f64 {
    if v <= 1.0 {
        v * 100.0
    } else {
        v
    }
}

fn clamp(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn value_to_label(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Extract generated text from a text-generation or chat output.
///
/// Handles plain strings, `[{"generated_text": ..}]`, objects keyed by
/// `generated_text`/`text`/`response`, chatbot history pairs and
/// role/content message lists. An echoed `prompt` and leading
/// `Assistant:` turns are stripped. Returns None when no text is left.
pub fn normalize_generation(raw: &Value, prompt: Option<&str>) -> Option<String> {
    let text = extract_text(raw)?;
    let mut text = text.trim();

    if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(rest) = text.strip_prefix(prompt) {
            text = rest.trim();
        }
    }
    for marker in ASSISTANT_MARKERS {
        if let Some(idx) = text.rfind(marker) {
            text = text[idx + marker.len()..].trim();
        }
    }

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn extract_text(raw: &Value) -> Option<&str> {
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        // role/content messages: only the last assistant turn counts
        Value::Array(items) if items.iter().any(|m| m.get("role").is_some()) => items
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
            .and_then(|m| m.get("content"))
            .and_then(extract_text),
        // chatbot history pairs: only the reply slot of the last pair
        Value::Array(items) if !items.is_empty() && items.iter().all(is_history_pair) => items
            .last()
            .and_then(|pair| pair.get(1))
            .and_then(extract_text),
        Value::Array(items) => items.iter().rev().find_map(extract_text),
        Value::Object(map) => TEXT_KEYS.iter().find_map(|k| map.get(*k).and_then(extract_text)),
        _ => None,
    }
}

fn is_history_pair(v: &Value) -> bool {
    matches!(v, Value::Array(pair) if pair.len() == 2)
}

/// Parse object-detection output (`[{label, score, box}]`), best first.
pub fn normalize_detections(raw: &Value) -> Vec<DetectedObject> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    let mut objects: Vec<DetectedObject> = items
        .iter()
        .filter_map(|item| {
            let map = item.as_object()?;
            let label = map.get("label").map(value_to_label)?;
            let score = CONFIDENCE_KEYS.iter().find_map(|k| map.get(*k).and_then(number_of))?;
            let bounding_box = map.get("box").and_then(|b| {
                Some(BoundingBox {
                    xmin: number_of(b.get("xmin")?)?,
                    ymin: number_of(b.get("ymin")?)?,
                    xmax: number_of(b.get("xmax")?)?,
                    ymax: number_of(b.get("ymax")?)?,
                })
            });
            Some(DetectedObject {
                label,
                confidence: round2(clamp(to_percent(score))),
                bounding_box,
            })
        })
        .collect();
    objects.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    objects
}
