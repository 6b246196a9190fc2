//! Use-case classification.
//!
//! A request is assigned to a use case by the first rule that applies:
//! 1. Operation signals: an audio payload asks for transcription, a request
//!    for audio output without an audio payload asks for synthesis.
//! 2. The modality hint, when present.
//! 3. Whole-word keyword hits in the query, ties broken by [`UseCase::ALL`]
//!    order.
//! 4. Otherwise the default use case, [`UseCase::Agent`], at low confidence.

use std::collections::BTreeMap;

use turnstile_common::{Modality, RouteRequest, UseCase};

/// Confidence reported for operation signals and modality hints.
pub const CERTAIN: f64 = 1.0;

/// Confidence reported when nothing in the request matched.
pub const DEFAULT_CONFIDENCE: f64 = 0.3;

const KEYWORD_BASE: f64 = 0.6;
const KEYWORD_STEP: f64 = 0.1;
const KEYWORD_CAP: f64 = 0.95;

/// The parts of a request classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    pub query: &'a str,
    pub modality: Option<Modality>,
    pub context: &'a BTreeMap<String, String>,
    pub has_audio: bool,
    pub output: Option<Modality>,
}

impl<'a> ClassificationInput<'a> {
    pub fn from_request(request: &'a RouteRequest) -> Self {
        Self {
            query: &request.query,
            modality: request.modality,
            context: &request.context,
            has_audio: request.has_audio_payload(),
            output: request.output,
        }
    }

    /// Use case the request explicitly asks for by its shape, independent of
    /// the query text.
    pub fn operation_signal(&self) -> Option<UseCase> {
        if self.has_audio {
            Some(UseCase::Stt)
        } else if self.output == Some(Modality::Audio) {
            Some(UseCase::Tts)
        } else {
            None
        }
    }

    fn context_flag(&self, key: &str) -> bool {
        self.context
            .get(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Which rule produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Operation,
    ModalityHint,
    Keywords,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub use_case: UseCase,
    pub confidence: f64,
    pub basis: Basis,
}

impl Classification {
    fn new(use_case: UseCase, confidence: f64, basis: Basis) -> Self {
        Self {
            use_case,
            confidence,
            basis,
        }
    }
}

/// Maps a request to a use case.
///
/// Implementations must be pure: the same input always yields the same
/// classification, and classifying never fails.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &ClassificationInput<'_>) -> Classification;
}

/// Keyword table classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    /// Normalised keywords per use case, in [`UseCase::ALL`] order.
    keywords: Vec<(UseCase, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        let keywords = UseCase::ALL
            .iter()
            .map(|&use_case| {
                let words = default_keywords(use_case)
                    .iter()
                    .map(|kw| normalize(kw))
                    .collect();
                (use_case, words)
            })
            .collect();
        Self { keywords }
    }

    fn keyword_hits(&self, input: &ClassificationInput<'_>) -> Vec<(UseCase, usize)> {
        let haystack = format!(" {} ", normalize(input.query));
        self.keywords
            .iter()
            .map(|(use_case, words)| {
                let mut hits = words
                    .iter()
                    .filter(|kw| haystack.contains(&format!(" {kw} ")))
                    .count();
                if hits > 0 {
                    if let Some(flag) = context_flag_for(*use_case) {
                        if input.context_flag(flag) {
                            hits += 1;
                        }
                    }
                }
                (*use_case, hits)
            })
            .collect()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, input: &ClassificationInput<'_>) -> Classification {
        if let Some(use_case) = input.operation_signal() {
            return Classification::new(use_case, CERTAIN, Basis::Operation);
        }

        if let Some(modality) = input.modality {
            return Classification::new(modality.primary_use_case(), CERTAIN, Basis::ModalityHint);
        }

        // Strictly greater keeps the earliest use case on ties.
        let mut best: Option<(UseCase, usize)> = None;
        for (use_case, hits) in self.keyword_hits(input) {
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((use_case, hits));
            }
        }

        match best {
            Some((use_case, hits)) => {
                let confidence =
                    (KEYWORD_BASE + KEYWORD_STEP * (hits - 1) as f64).min(KEYWORD_CAP);
                Classification::new(use_case, confidence, Basis::Keywords)
            }
            None => {
                tracing::debug!(
                    query_len = input.query.len(),
                    "No keyword matched, using default use case"
                );
                Classification::new(UseCase::Agent, DEFAULT_CONFIDENCE, Basis::Default)
            }
        }
    }
}

/// Lowercase and turn every non-alphanumeric run into a single space.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn context_flag_for(use_case: UseCase) -> Option<&'static str> {
    match use_case {
        UseCase::Multimodal => Some("has_image"),
        UseCase::Stt => Some("has_audio"),
        UseCase::Video => Some("has_video"),
        _ => None,
    }
}

fn default_keywords(use_case: UseCase) -> &'static [&'static str] {
    match use_case {
        UseCase::Agent => &[
            "code", "program", "programming", "debug", "function", "script", "algorithm",
            "write", "generate", "explain", "solve", "implement", "refactor", "plan", "execute",
        ],
        UseCase::Avatar => &[
            "avatar", "lip sync", "lipsync", "talking head", "facial", "face animation",
            "lip", "mouth", "animate face",
        ],
        UseCase::Stt => &[
            "transcribe", "transcription", "transcript", "speech to text", "dictation",
            "dictate", "recognize speech",
        ],
        UseCase::Tts => &[
            "synthesize", "synthesis", "speak", "text to speech", "tts", "narrate",
            "read aloud", "voice over", "voiceover",
        ],
        UseCase::Multimodal => &[
            "image", "images", "picture", "photo", "visual", "describe", "caption",
            "diagram", "screenshot", "chart",
        ],
        UseCase::Video => &[
            "video", "videos", "movie", "clip", "frame", "frames", "footage", "summarize",
            "scene",
        ],
    }
}
