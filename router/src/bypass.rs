//! Decides whether a request may reuse its session's routing decision.

use turnstile_common::UseCase;

use crate::classifier::ClassificationInput;
use crate::session::Session;

/// Why a request has to go through the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclassifyReason {
    /// No live session under the request's id.
    NoSession,
    /// The modality hint cannot be served by the stored use case.
    ModalityConflict,
    /// An audio payload or audio output request asks for another use case.
    OperationConflict,
    /// The session used up its turn allowance.
    TurnLimit,
}

impl ReclassifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::ModalityConflict => "modality_conflict",
            Self::OperationConflict => "operation_conflict",
            Self::TurnLimit => "turn_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reuse the session's use case and backend.
    Bypass(UseCase),
    Reclassify(ReclassifyReason),
}

#[derive(Debug, Clone)]
pub struct BypassEngine {
    max_turns: u64,
}

impl BypassEngine {
    pub fn new(max_turns: u64) -> Self {
        Self { max_turns }
    }

    pub fn evaluate(&self, session: Option<&Session>, input: &ClassificationInput<'_>) -> Verdict {
        let Some(session) = session else {
            return Verdict::Reclassify(ReclassifyReason::NoSession);
        };

        if let Some(wanted) = input.operation_signal() {
            if wanted != session.use_case {
                return Verdict::Reclassify(ReclassifyReason::OperationConflict);
            }
        }

        if let Some(modality) = input.modality {
            if !modality.is_compatible_with(session.use_case) {
                return Verdict::Reclassify(ReclassifyReason::ModalityConflict);
            }
        }

        if session.turn_count >= self.max_turns {
            return Verdict::Reclassify(ReclassifyReason::TurnLimit);
        }

        Verdict::Bypass(session.use_case)
    }
}
