//! Routing statistics.
//!
//! Counters are cumulative over the process lifetime. Latencies are
//! exponentially weighted moving averages so recent traffic dominates.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use turnstile_common::{DecisionSource, UseCase};

/// Weight of the newest sample in the latency averages.
const EWMA_ALPHA: f64 = 0.1;

/// One routed request, as seen by the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub use_case: UseCase,
    pub source: DecisionSource,
    pub success: bool,
    pub new_session: bool,
    /// An existing session was moved to a different use case.
    pub context_changed: bool,
    /// The session store could not be used for this request.
    pub degraded: bool,
    pub routing_time: Duration,
    pub inference_time: Duration,
    pub total_time: Duration,
}

#[derive(Debug, Default)]
struct Ewma(Option<f64>);

impl Ewma {
    fn observe(&mut self, sample: f64) {
        self.0 = Some(match self.0 {
            None => sample,
            Some(avg) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * avg,
        });
    }

    fn value(&self) -> f64 {
        self.0.unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    bypassed: u64,
    classified: u64,
    sessions_created: u64,
    context_changes: u64,
    degraded: u64,
    per_use_case: BTreeMap<UseCase, u64>,
    routing_ms: Ewma,
    inference_ms: Ewma,
    total_ms: Ewma,
}

/// Point-in-time copy of the statistics, as served by `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bypassed_requests: u64,
    pub classified_requests: u64,
    pub bypass_rate: f64,
    pub sessions_created: u64,
    pub context_changes: u64,
    pub degraded_requests: u64,
    pub use_case_counts: BTreeMap<String, u64>,
    pub avg_routing_time_ms: f64,
    pub avg_inference_time_ms: f64,
    pub avg_total_time_ms: f64,
    /// Live sessions, absent when the store could not be asked.
    pub active_sessions: Option<usize>,
    pub session_store: &'static str,
}

/// Aggregates [`Outcome`]s. One lock guards every field so a snapshot never
/// mixes counters from before and after an update.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    counters: RwLock<Counters>,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome) {
        let mut c = self
            .counters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        c.total += 1;
        if outcome.success {
            c.successful += 1;
        } else {
            c.failed += 1;
        }
        match outcome.source {
            DecisionSource::Bypassed => c.bypassed += 1,
            DecisionSource::Classified => c.classified += 1,
        }
        if outcome.new_session {
            c.sessions_created += 1;
        }
        if outcome.context_changed {
            c.context_changes += 1;
        }
        if outcome.degraded {
            c.degraded += 1;
        }
        *c.per_use_case.entry(outcome.use_case).or_default() += 1;

        c.routing_ms.observe(millis(outcome.routing_time));
        c.inference_ms.observe(millis(outcome.inference_time));
        c.total_ms.observe(millis(outcome.total_time));
    }

    pub fn snapshot(
        &self,
        active_sessions: Option<usize>,
        session_store: &'static str,
    ) -> StatsSnapshot {
        let c = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let bypass_rate = if c.total == 0 {
            0.0
        } else {
            c.bypassed as f64 / c.total as f64
        };

        StatsSnapshot {
            total_requests: c.total,
            successful_requests: c.successful,
            failed_requests: c.failed,
            bypassed_requests: c.bypassed,
            classified_requests: c.classified,
            bypass_rate,
            sessions_created: c.sessions_created,
            context_changes: c.context_changes,
            degraded_requests: c.degraded,
            use_case_counts: c
                .per_use_case
                .iter()
                .map(|(uc, n)| (uc.as_str().to_string(), *n))
                .collect(),
            avg_routing_time_ms: c.routing_ms.value(),
            avg_inference_time_ms: c.inference_ms.value(),
            avg_total_time_ms: c.total_ms.value(),
            active_sessions,
            session_store,
        }
    }
}
