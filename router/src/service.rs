//! The routing pipeline: session lookup, bypass or classification, session
//! update, dispatch, statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use turnstile_common::{DecisionSource, RouteRequest, RouteResponse, SessionSummary, UseCase};
use uuid::Uuid;

use crate::bypass::{BypassEngine, Verdict};
use crate::classifier::{ClassificationInput, Classifier, KeywordClassifier};
use crate::config::Config;
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::error::{Error, Result};
use crate::registry::BackendRegistry;
use crate::session::{self, with_deadline, Session, SessionStore, SessionStoreError};
use crate::stats::{Outcome, StatsAggregator, StatsSnapshot};

/// Compare-and-swap rounds before giving up on a contended session.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// How a request was routed, before dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Decision {
    use_case: UseCase,
    confidence: f64,
    source: DecisionSource,
    new_session: bool,
    context_changed: bool,
    degraded: bool,
}

/// Result of probing the session store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub kind: &'static str,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RoutingService {
    classifier: Arc<dyn Classifier>,
    registry: Arc<BackendRegistry>,
    store: Arc<dyn SessionStore>,
    stats: Arc<StatsAggregator>,
    dispatcher: Dispatcher,
    bypass: BypassEngine,
    session_ttl: Duration,
    op_timeout: Duration,
    default_max_tokens: u32,
    default_temperature: f32,
}

impl RoutingService {
    pub fn new(
        config: &Config,
        registry: Arc<BackendRegistry>,
        store: Arc<dyn SessionStore>,
        stats: Arc<StatsAggregator>,
    ) -> std::result::Result<Self, reqwest::Error> {
        Ok(Self {
            classifier: Arc::new(KeywordClassifier::new()),
            registry,
            store,
            stats,
            dispatcher: Dispatcher::from_config(&config.dispatch)?,
            bypass: BypassEngine::new(config.session.max_turns_per_session),
            session_ttl: config.session.ttl(),
            op_timeout: config.session.op_timeout(),
            default_max_tokens: config.dispatch.default_max_tokens,
            default_temperature: config.dispatch.default_temperature,
        })
    }

    /// Replace the default keyword classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Override the configured session TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Route one request end to end.
    ///
    /// Only malformed requests are errors. Backend failures come back as a
    /// response with `success: false`.
    pub async fn route(&self, request: RouteRequest) -> Result<RouteResponse> {
        let started = Instant::now();

        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".to_string()));
        }
        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        if max_tokens == 0 {
            return Err(Error::InvalidRequest("max_tokens must be positive".to_string()));
        }
        let temperature = request.temperature.unwrap_or(self.default_temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::InvalidRequest(
                "temperature must be between 0 and 2".to_string(),
            ));
        }
        let audio = decode_audio(&request)?;

        let (session_id, generated) = match request.session_id.as_deref() {
            Some(id) => {
                session::validate_session_id(id).map_err(Error::InvalidRequest)?;
                (id.to_string(), false)
            }
            None => (Uuid::new_v4().to_string(), true),
        };

        let input = ClassificationInput::from_request(&request);
        let decision = self.decide(&session_id, generated, &input).await;
        let routing_time = started.elapsed();

        let backend = self.registry.get(decision.use_case);
        let dispatch_request = DispatchRequest {
            query: &request.query,
            context: &request.context,
            max_tokens,
            temperature,
            audio: audio.as_deref(),
        };
        let inference_started = Instant::now();
        let outcome = self.dispatcher.dispatch(backend, &dispatch_request).await;
        let inference_time = inference_started.elapsed();
        let total_time = started.elapsed();

        let (result, error_message) = match outcome {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let success = result.is_some();

        self.stats.record(&Outcome {
            use_case: decision.use_case,
            source: decision.source,
            success,
            new_session: decision.new_session,
            context_changed: decision.context_changed,
            degraded: decision.degraded,
            routing_time,
            inference_time,
            total_time,
        });

        info!(
            session_id = %session_id,
            user_id = request.user_id.as_deref().unwrap_or("-"),
            use_case = %decision.use_case,
            backend = %backend.name,
            source = %decision.source,
            confidence = decision.confidence,
            success,
            routing_ms = millis(routing_time),
            total_ms = millis(total_time),
            "Routed request"
        );

        Ok(RouteResponse {
            success,
            result,
            use_case: decision.use_case,
            selected_backend: backend.name.clone(),
            confidence: decision.confidence,
            decision_source: decision.source,
            session_id,
            new_session: decision.new_session,
            routing_time_ms: millis(routing_time),
            inference_time_ms: millis(inference_time),
            total_time_ms: millis(total_time),
            error_message,
        })
    }

    /// Read, decide and write back the session as one atomic step.
    ///
    /// The decision is recomputed from a fresh read whenever another request
    /// wrote the session in between, so concurrent first turns on one id
    /// agree on a single assignment.
    async fn decide(&self, id: &str, generated: bool, input: &ClassificationInput<'_>) -> Decision {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = match with_deadline(self.op_timeout, self.store.get(id)).await {
                Ok(current) => current,
                Err(e) => return self.degraded(id, generated, input, &e),
            };

            let (next, decision) = self.plan(id, current.as_ref(), input);
            let expected = current.as_ref().map(|s| s.revision);
            let swap = self.store.compare_and_swap(expected, &next, self.session_ttl);
            match with_deadline(self.op_timeout, swap).await {
                Ok(true) => return decision,
                Ok(false) => {
                    debug!(session_id = %id, attempt, "Session changed concurrently, retrying")
                }
                Err(e) => return self.degraded(id, generated, input, &e),
            }
        }

        let contended = SessionStoreError::Unavailable(format!(
            "session still contended after {MAX_CAS_ATTEMPTS} attempts"
        ));
        self.degraded(id, generated, input, &contended)
    }

    /// The session's next state and the routing decision, from one read.
    fn plan(
        &self,
        id: &str,
        current: Option<&Session>,
        input: &ClassificationInput<'_>,
    ) -> (Session, Decision) {
        let now = Utc::now();
        let verdict = self.bypass.evaluate(current, input);

        if let (Verdict::Bypass(use_case), Some(session)) = (verdict, current) {
            let decision = Decision {
                use_case,
                confidence: session.confidence,
                source: DecisionSource::Bypassed,
                new_session: false,
                context_changed: false,
                degraded: false,
            };
            return (session.touched(now), decision);
        }

        let classification = self.classifier.classify(input);
        let backend = &self.registry.get(classification.use_case).name;
        if let Verdict::Reclassify(reason) = verdict {
            debug!(
                session_id = %id,
                reason = reason.as_str(),
                use_case = %classification.use_case,
                "Classified request"
            );
        }

        let next = match current {
            Some(session) => session.reassigned(
                classification.use_case,
                backend.clone(),
                classification.confidence,
                now,
            ),
            None => Session::new(
                id,
                classification.use_case,
                backend.clone(),
                classification.confidence,
                self.session_ttl,
                now,
            ),
        };
        let decision = Decision {
            use_case: classification.use_case,
            confidence: classification.confidence,
            source: DecisionSource::Classified,
            new_session: current.is_none(),
            context_changed: current.is_some_and(|s| s.use_case != classification.use_case),
            degraded: false,
        };
        (next, decision)
    }

    /// Classify without touching the session store.
    fn degraded(
        &self,
        id: &str,
        generated: bool,
        input: &ClassificationInput<'_>,
        error: &SessionStoreError,
    ) -> Decision {
        warn!(
            session_id = %id,
            store = self.store.kind(),
            error = %error,
            "Session store unavailable, routing without session"
        );
        let classification = self.classifier.classify(input);
        Decision {
            use_case: classification.use_case,
            confidence: classification.confidence,
            source: DecisionSource::Classified,
            new_session: generated,
            context_changed: false,
            degraded: true,
        }
    }

    pub async fn session(&self, id: &str) -> Result<SessionSummary> {
        session::validate_session_id(id).map_err(Error::InvalidRequest)?;
        with_deadline(self.op_timeout, self.store.get(id))
            .await?
            .map(|s| s.summary())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Remove a session. Returns whether a live one existed; deleting an
    /// unknown id is not an error.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        session::validate_session_id(id).map_err(Error::InvalidRequest)?;
        let deleted = with_deadline(self.op_timeout, self.store.delete(id)).await?;
        if deleted {
            info!(session_id = %id, "Session deleted");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let active = match with_deadline(self.op_timeout, self.store.count()).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Could not count sessions");
                None
            }
        };
        self.stats.snapshot(active, self.store.kind())
    }

    pub async fn store_health(&self) -> StoreHealth {
        match with_deadline(self.op_timeout, self.store.ping()).await {
            Ok(()) => StoreHealth {
                kind: self.store.kind(),
                reachable: true,
                error: None,
            },
            Err(e) => StoreHealth {
                kind: self.store.kind(),
                reachable: false,
                error: Some(e.to_string()),
            },
        }
    }
}

fn decode_audio(request: &RouteRequest) -> Result<Option<Vec<u8>>> {
    if !request.has_audio_payload() {
        return Ok(None);
    }
    let encoded = request.audio.as_deref().unwrap_or_default();
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map(Some)
        .map_err(|e| Error::InvalidRequest(format!("audio is not valid base64: {e}")))
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
