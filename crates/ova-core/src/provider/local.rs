//! Rule-based replies used when no remote provider can answer.
//!
//! Everything here is deterministic and offline. Matching runs on a
//! lower-cased, accent-folded copy of the message: single keywords must
//! match a whole word, multi-word phrases match anywhere in the sentence.

use crate::types::{Capability, NormalizedResult};
use crate::util::truncate_string;

/// Longest slice of the user's message echoed back in an unmatched reply.
const ECHO_LIMIT: usize = 80;

/// Which canned reply a message gets, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCategory {
    ServiceStatus,
    Joke,
    Thanks,
    Farewell,
    Greeting,
    Programming,
    ArtificialIntelligence,
    Question,
    Unmatched,
}

struct Rule {
    category: FallbackCategory,
    words: &'static [&'static str],
    phrases: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        category: FallbackCategory::ServiceStatus,
        words: &["status", "funcionas", "caido", "caida"],
        phrases: &[
            "estado del servicio",
            "estas funcionando",
            "esta funcionando",
            "estas disponible",
            "are you working",
            "are you down",
        ],
    },
    Rule {
        category: FallbackCategory::Joke,
        words: &["chiste", "chistes", "broma", "bromas", "joke", "jokes"],
        phrases: &["hazme reir", "algo gracioso"],
    },
    Rule {
        category: FallbackCategory::Thanks,
        words: &["gracias", "agradezco", "agradecido", "agradecida", "thanks", "thank"],
        phrases: &["muy amable"],
    },
    Rule {
        category: FallbackCategory::Farewell,
        words: &["adios", "chao", "chau", "bye", "goodbye"],
        phrases: &["hasta luego", "hasta pronto", "hasta manana", "nos vemos"],
    },
    Rule {
        category: FallbackCategory::Greeting,
        words: &["hola", "buenas", "saludos", "hello", "hi", "hey"],
        phrases: &["buenos dias", "buenas tardes", "buenas noches"],
    },
    Rule {
        category: FallbackCategory::Programming,
        words: &[
            "programacion", "programar", "programa", "codigo", "python", "javascript", "java",
            "rust", "html", "css", "sql", "algoritmo", "programming", "code",
        ],
        phrases: &[],
    },
    Rule {
        category: FallbackCategory::ArtificialIntelligence,
        words: &["ia", "ai", "chatgpt", "gpt", "llm"],
        phrases: &[
            "inteligencia artificial",
            "aprendizaje automatico",
            "machine learning",
            "redes neuronales",
            "artificial intelligence",
        ],
    },
    Rule {
        category: FallbackCategory::Question,
        words: &["que", "como", "porque", "cual", "cuando", "donde", "quien", "what", "how", "why"],
        phrases: &["por que"],
    },
];

const JOKES: &[&str] = &[
    "¿Por qué los programadores confunden Halloween con Navidad? Porque OCT 31 es igual a DEC 25. 🎃",
    "¿Qué le dice un bit a otro bit? Nos vemos en el bus. 🚌",
    "Había una vez un servidor tan lento que sus respuestas llegaban con fecha de caducidad. ⏳",
];

/// Offline responder for chat and degraded results for other capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResponder;

impl LocalResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> FallbackCategory {
        let folded = fold(text);
        let words: Vec<&str> = folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        for rule in RULES {
            let word_hit = rule.words.iter().any(|k| words.contains(k));
            let phrase_hit = rule.phrases.iter().any(|p| folded.contains(p));
            if word_hit || phrase_hit {
                return rule.category;
            }
        }
        if text.contains('?') || text.contains('¿') {
            return FallbackCategory::Question;
        }
        FallbackCategory::Unmatched
    }

    /// Canned reply for a chat message. Never empty.
    pub fn respond(&self, text: &str) -> String {
        match self.classify(text) {
            FallbackCategory::ServiceStatus => {
                "Estoy funcionando en modo básico: los servicios de IA externos no responden en este momento, \
                 pero sigo aquí para ayudarte con respuestas sencillas."
                    .to_string()
            }
            FallbackCategory::Joke => JOKES[text.chars().count() % JOKES.len()].to_string(),
            FallbackCategory::Thanks => {
                "¡De nada! Me alegra poder ayudarte. Si necesitas algo más, aquí estaré. 😊".to_string()
            }
            FallbackCategory::Farewell => {
                "¡Hasta luego! Fue un gusto conversar contigo. Vuelve cuando quieras. 👋".to_string()
            }
            FallbackCategory::Greeting => {
                "¡Hola! Soy OVA, tu asistente virtual. ¿En qué puedo ayudarte hoy?".to_string()
            }
            FallbackCategory::Programming => {
                "¡La programación es un gran tema! Ahora mismo trabajo en modo básico y no puedo revisar \
                 código en detalle, pero puedo orientarte si me cuentas qué lenguaje o problema tienes."
                    .to_string()
            }
            FallbackCategory::ArtificialIntelligence => {
                "La inteligencia artificial permite que las máquinas aprendan de datos para reconocer \
                 patrones, entender lenguaje o ver imágenes. Pregúntame de nuevo en unos minutos para \
                 una respuesta más completa."
                    .to_string()
            }
            FallbackCategory::Question => {
                "¡Buena pregunta! En este momento no puedo consultar a mis modelos de IA para darte una \
                 respuesta completa. Por favor, inténtalo de nuevo en unos minutos."
                    .to_string()
            }
            FallbackCategory::Unmatched => format!(
                "Recibí tu mensaje: \"{}\". Mis servicios de IA no están disponibles en este momento, \
                 pero lo intentaré de nuevo pronto.",
                truncate_string(text.trim(), ECHO_LIMIT, "...")
            ),
        }
    }

    /// Degraded recognition result when every provider failed.
    pub fn unavailable_result(&self, capability: Capability) -> NormalizedResult {
        NormalizedResult::failure(
            "",
            format!("All {} providers are unavailable, please try again later", capability),
            "all_providers_failed",
        )
    }
}

/// Lower-case and strip Spanish diacritics.
fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        let responder = LocalResponder::new();
        assert_eq!(responder.classify("hola"), FallbackCategory::Greeting);
        assert_eq!(responder.classify("¡Buenos días!"), FallbackCategory::Greeting);
        assert!(responder.respond("hola").starts_with("¡Hola!"));
    }

    #[test]
    fn test_category_order() {
        let r = LocalResponder::new();
        // Joke wins over greeting.
        assert_eq!(r.classify("hola, cuéntame un chiste"), FallbackCategory::Joke);
        // Thanks wins over farewell.
        assert_eq!(r.classify("gracias y adiós"), FallbackCategory::Thanks);
        // Status wins over everything.
        assert_eq!(r.classify("hola, ¿estás funcionando?"), FallbackCategory::ServiceStatus);
        // Programming before generic question.
        assert_eq!(r.classify("¿cómo aprendo Python?"), FallbackCategory::Programming);
    }

    #[test]
    fn test_accent_folding() {
        let r = LocalResponder::new();
        assert_eq!(r.classify("¿Qué es la Inteligencia Artificial?"), FallbackCategory::ArtificialIntelligence);
        assert_eq!(r.classify("Adiós"), FallbackCategory::Farewell);
        assert_eq!(r.classify("por qué el cielo es azul"), FallbackCategory::Question);
    }

    #[test]
    fn test_whole_word_matching() {
        let r = LocalResponder::new();
        // "hi" inside "chico" and "ia" inside "dia" must not match.
        assert_eq!(r.classify("chico"), FallbackCategory::Unmatched);
        assert_eq!(r.classify("mediano"), FallbackCategory::Unmatched);
    }

    #[test]
    fn test_question_mark_only() {
        let r = LocalResponder::new();
        assert_eq!(r.classify("¿mañana llueve?"), FallbackCategory::Question);
    }

    #[test]
    fn test_unmatched_echo_is_truncated() {
        let r = LocalResponder::new();
        let long = "x".repeat(500);
        let reply = r.respond(&long);
        assert!(reply.contains("xxx..."));
        assert!(reply.len() < 300);
        assert!(r.respond("zzz").contains("\"zzz\""));
    }

    #[test]
    fn test_deterministic_and_non_empty() {
        let r = LocalResponder::new();
        for input in ["hola", "chiste", "", "   ", "asdf", "¿?"] {
            let a = r.respond(input);
            assert!(!a.is_empty());
            assert_eq!(a, r.respond(input));
        }
    }

    #[test]
    fn test_unavailable_result() {
        let result = LocalResponder::new().unavailable_result(Capability::Sign);
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.source_format, "all_providers_failed");
        assert!(result.error.unwrap().contains("sign"));
    }
}
