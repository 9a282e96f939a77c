use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoModel,
    Timeout,
    Error,
    Unparsable,
    LowerConfidence,
}

#[derive(Debug, Default)]
pub struct AppMetrics {
    utterances_total: AtomicU64,
    rule_fast_path_total: AtomicU64,
    emergency_fast_path_total: AtomicU64,
    model_invocations_total: AtomicU64,
    model_accepted_total: AtomicU64,
    model_timeouts_total: AtomicU64,
    model_errors_total: AtomicU64,
    model_unavailable_total: AtomicU64,
    model_unparsable_total: AtomicU64,
    rule_kept_total: AtomicU64,
    gate_blocks_total: AtomicU64,
    falls_suspected_total: AtomicU64,
    falls_confirmed_total: AtomicU64,
    false_alarms_total: AtomicU64,
    escalations_started_total: AtomicU64,
    escalations_resolved_total: AtomicU64,
    capability_failures_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub utterances_total: u64,
    pub rule_fast_path_total: u64,
    pub emergency_fast_path_total: u64,
    pub model_invocations_total: u64,
    pub model_accepted_total: u64,
    pub model_fallbacks_total: u64,
    pub model_timeouts_total: u64,
    pub model_errors_total: u64,
    pub model_unavailable_total: u64,
    pub model_unparsable_total: u64,
    pub gate_blocks_total: u64,
    pub falls_suspected_total: u64,
    pub falls_confirmed_total: u64,
    pub false_alarms_total: u64,
    pub escalations_started_total: u64,
    pub escalations_resolved_total: u64,
    pub capability_failures_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_utterance(&self) {
        self.utterances_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rule_fast_path(&self) {
        self.rule_fast_path_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_emergency_fast_path(&self) {
        self.emergency_fast_path_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_model_invocation(&self) {
        self.model_invocations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_model_accepted(&self) {
        self.model_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_model_fallback(&self, reason: FallbackReason) {
        let counter = match reason {
            FallbackReason::Timeout => &self.model_timeouts_total,
            FallbackReason::Error => &self.model_errors_total,
            FallbackReason::NoModel => &self.model_unavailable_total,
            FallbackReason::Unparsable => &self.model_unparsable_total,
            FallbackReason::LowerConfidence => &self.rule_kept_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gate_block(&self) {
        self.gate_blocks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fall_suspected(&self) {
        self.falls_suspected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fall_confirmed(&self) {
        self.falls_confirmed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_false_alarm(&self) {
        self.false_alarms_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_escalation_started(&self) {
        self.escalations_started_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_escalation_resolved(&self) {
        self.escalations_resolved_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_capability_failure(&self) {
        self.capability_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let utterances = self.utterances_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);
        let timeouts = self.model_timeouts_total.load(Ordering::Relaxed);
        let errors = self.model_errors_total.load(Ordering::Relaxed);
        let unavailable = self.model_unavailable_total.load(Ordering::Relaxed);
        let unparsable = self.model_unparsable_total.load(Ordering::Relaxed);
        let rule_kept = self.rule_kept_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            utterances_total: utterances,
            rule_fast_path_total: self.rule_fast_path_total.load(Ordering::Relaxed),
            emergency_fast_path_total: self.emergency_fast_path_total.load(Ordering::Relaxed),
            model_invocations_total: self.model_invocations_total.load(Ordering::Relaxed),
            model_accepted_total: self.model_accepted_total.load(Ordering::Relaxed),
            model_fallbacks_total: timeouts + errors + unavailable + unparsable + rule_kept,
            model_timeouts_total: timeouts,
            model_errors_total: errors,
            model_unavailable_total: unavailable,
            model_unparsable_total: unparsable,
            gate_blocks_total: self.gate_blocks_total.load(Ordering::Relaxed),
            falls_suspected_total: self.falls_suspected_total.load(Ordering::Relaxed),
            falls_confirmed_total: self.falls_confirmed_total.load(Ordering::Relaxed),
            false_alarms_total: self.false_alarms_total.load(Ordering::Relaxed),
            escalations_started_total: self.escalations_started_total.load(Ordering::Relaxed),
            escalations_resolved_total: self.escalations_resolved_total.load(Ordering::Relaxed),
            capability_failures_total: self.capability_failures_total.load(Ordering::Relaxed),
            avg_latency_millis: if utterances == 0 {
                0.0
            } else {
                latency as f64 / utterances as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,sanad_agents=info,sanad_core=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
