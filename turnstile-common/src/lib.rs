//! Turnstile Common Types
//!
//! Shared types used by the router, its clients and its completion backends.

pub mod chat;
pub mod route;
pub mod use_case;

pub use chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, Usage};
pub use route::{DecisionSource, RouteRequest, RouteResponse, SessionSummary};
pub use use_case::{Modality, UseCase};
