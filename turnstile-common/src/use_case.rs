//! Use-case and modality types for the routing system.

use serde::{Deserialize, Serialize};

/// Fixed inference task categories a request can be routed to.
///
/// Each use case is served by exactly one backend, configured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    /// Content generation and executing agents (the default).
    Agent,
    /// Talking head avatars and lip sync generation.
    Avatar,
    /// Speech-to-text transcription.
    Stt,
    /// Text-to-speech synthesis.
    Tts,
    /// Image understanding and multi-modal RAG.
    Multimodal,
    /// Video understanding and generation.
    Video,
}

impl UseCase {
    /// All use cases, in tie-breaking order.
    pub const ALL: [UseCase; 6] = [
        UseCase::Agent,
        UseCase::Avatar,
        UseCase::Stt,
        UseCase::Tts,
        UseCase::Multimodal,
        UseCase::Video,
    ];

    /// Parse a use case from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "avatar" => Some(Self::Avatar),
            "stt" => Some(Self::Stt),
            "tts" => Some(Self::Tts),
            "multimodal" => Some(Self::Multimodal),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Avatar => "avatar",
            Self::Stt => "stt",
            Self::Tts => "tts",
            Self::Multimodal => "multimodal",
            Self::Video => "video",
        }
    }

    /// Human-readable description served by the use-case listing.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Agent => "Content generation and executing agents",
            Self::Avatar => "Talking head avatars and lip sync generation",
            Self::Stt => "Speech-to-text conversion for Indian languages",
            Self::Tts => "Text-to-speech synthesis for Indian languages",
            Self::Multimodal => "Multi-modal temporal agentic RAG",
            Self::Video => "Video-to-text understanding and content generation",
        }
    }
}

impl std::fmt::Display for UseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input (or requested output) modality of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// The use case a modality hint selects on its own.
    pub fn primary_use_case(&self) -> UseCase {
        match self {
            Self::Text => UseCase::Agent,
            Self::Image => UseCase::Multimodal,
            Self::Audio => UseCase::Stt,
            Self::Video => UseCase::Video,
        }
    }

    /// Whether a session assigned to `use_case` can keep serving requests
    /// carrying this modality hint.
    pub fn is_compatible_with(&self, use_case: UseCase) -> bool {
        match self {
            Self::Text => matches!(use_case, UseCase::Agent | UseCase::Avatar | UseCase::Tts),
            Self::Image => matches!(use_case, UseCase::Multimodal | UseCase::Avatar),
            Self::Audio => matches!(use_case, UseCase::Stt | UseCase::Tts | UseCase::Avatar),
            Self::Video => matches!(use_case, UseCase::Video | UseCase::Multimodal),
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_case_serialization() {
        let json = serde_json::to_string(&UseCase::Multimodal).unwrap();
        assert_eq!(json, r#""multimodal""#);

        let parsed: UseCase = serde_json::from_str(r#""stt""#).unwrap();
        assert_eq!(parsed, UseCase::Stt);
    }

    #[test]
    fn test_use_case_parse() {
        assert_eq!(UseCase::parse("agent"), Some(UseCase::Agent));
        assert_eq!(UseCase::parse("TTS"), Some(UseCase::Tts));
        assert_eq!(UseCase::parse("Video"), Some(UseCase::Video));
        assert_eq!(UseCase::parse("translation"), None);
    }

    #[test]
    fn test_use_case_display_matches_serde() {
        for use_case in UseCase::ALL {
            let json = serde_json::to_string(&use_case).unwrap();
            assert_eq!(json, format!("\"{}\"", use_case));
        }
    }

    #[test]
    fn test_modality_primary_use_case() {
        assert_eq!(Modality::Text.primary_use_case(), UseCase::Agent);
        assert_eq!(Modality::Image.primary_use_case(), UseCase::Multimodal);
        assert_eq!(Modality::Audio.primary_use_case(), UseCase::Stt);
        assert_eq!(Modality::Video.primary_use_case(), UseCase::Video);
    }

    #[test]
    fn test_modality_primary_use_case_is_compatible() {
        for modality in [Modality::Text, Modality::Image, Modality::Audio, Modality::Video] {
            assert!(modality.is_compatible_with(modality.primary_use_case()));
        }
    }

    #[test]
    fn test_modality_conflicts() {
        assert!(!Modality::Video.is_compatible_with(UseCase::Agent));
        assert!(!Modality::Image.is_compatible_with(UseCase::Stt));
        assert!(!Modality::Text.is_compatible_with(UseCase::Stt));
        assert!(Modality::Audio.is_compatible_with(UseCase::Tts));
    }
}
