use std::sync::Arc;
use std::time::{Duration, Instant};

use sanad_core::normalize::clean;
use sanad_core::{
    normalize, normalize_contact_name, DecisionSource, EngineConfig, IntentCategory,
    IntentDecision, RuleClassifier,
};
use sanad_ml::{build_classification_prompt, parse_model_reply, ModelBackend, ModelOpinion};
use sanad_observability::{AppMetrics, FallbackReason};
use tracing::{debug, info, instrument, warn};

/// Confidence-gated combination of the rule classifier and an optional model.
/// Keeps no state between calls and never returns an error.
#[derive(Clone)]
pub struct HybridOrchestrator {
    classifier: RuleClassifier,
    model: Option<Arc<dyn ModelBackend>>,
    min_confidence: f32,
    model_timeout: Duration,
    max_tokens: u32,
    metrics: Arc<AppMetrics>,
}

impl HybridOrchestrator {
    pub fn new(
        config: &EngineConfig,
        model: Option<Arc<dyn ModelBackend>>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            classifier: RuleClassifier::new(),
            model,
            min_confidence: config.min_confidence,
            model_timeout: config.model_timeout(),
            max_tokens: config.model_max_tokens,
            metrics,
        }
    }

    #[instrument(skip(self, raw), fields(chars = raw.chars().count()))]
    pub async fn resolve(&self, raw: &str) -> IntentDecision {
        let started = Instant::now();
        self.metrics.inc_utterance();

        let utterance = normalize(raw);
        let (category, confidence) = self.classifier.classify(&utterance);
        let rule = IntentDecision::new(
            category,
            confidence,
            utterance.slot_entities(),
            DecisionSource::Rule,
        );

        let decision = if category.is_emergency() {
            self.metrics.inc_emergency_fast_path();
            rule
        } else if confidence >= self.min_confidence {
            self.metrics.inc_rule_fast_path();
            rule
        } else {
            self.consult_model(utterance.canonical(), rule).await
        };
        let decision = post_process(decision);

        self.metrics.observe_latency(started.elapsed());
        info!(
            category = %decision.category(),
            confidence = decision.confidence(),
            source = ?decision.source(),
            "utterance resolved"
        );
        decision
    }

    async fn consult_model(&self, canonical: &str, rule: IntentDecision) -> IntentDecision {
        let Some(model) = &self.model else {
            self.metrics.inc_model_fallback(FallbackReason::NoModel);
            debug!("no model configured, keeping rule decision");
            return rule.with_source(DecisionSource::Fallback);
        };

        self.metrics.inc_model_invocation();
        let prompt = build_classification_prompt(canonical);
        let reply =
            tokio::time::timeout(self.model_timeout, model.infer(&prompt, self.max_tokens)).await;

        let reason = match reply {
            Err(_) => {
                warn!(
                    model = model.name(),
                    timeout_ms = self.model_timeout.as_millis() as u64,
                    "model call timed out"
                );
                FallbackReason::Timeout
            }
            Ok(Err(err)) => {
                warn!(model = model.name(), error = %err, "model call failed");
                FallbackReason::Error
            }
            Ok(Ok(text)) => match parse_model_reply(&text) {
                None => {
                    warn!(model = model.name(), "model reply unparsable");
                    FallbackReason::Unparsable
                }
                Some(opinion) if opinion.confidence >= rule.confidence() => {
                    self.metrics.inc_model_accepted();
                    return merge_opinion(&rule, opinion);
                }
                Some(opinion) => {
                    debug!(
                        model_confidence = opinion.confidence,
                        rule_confidence = rule.confidence(),
                        "model less confident than rules"
                    );
                    FallbackReason::LowerConfidence
                }
            },
        };

        self.metrics.inc_model_fallback(reason);
        rule.with_source(DecisionSource::Fallback)
    }
}

/// Model entities win; slots the model did not mention are kept.
fn merge_opinion(rule: &IntentDecision, opinion: ModelOpinion) -> IntentDecision {
    let mut entities = rule.entities().clone();
    entities.extend(opinion.entities);
    IntentDecision::new(
        opinion.category,
        opinion.confidence,
        entities,
        DecisionSource::Model,
    )
}

fn post_process(mut decision: IntentDecision) -> IntentDecision {
    if let Some(contact) = decision.entity("contact").map(normalize_contact_name) {
        if contact.is_empty() {
            decision.remove_entity("contact");
        } else {
            decision.set_entity("contact", contact);
        }
    }

    if matches!(
        decision.category(),
        IntentCategory::CallContact | IntentCategory::SendMessage
    ) {
        if let Some(message) = decision.entity("message").map(clean) {
            decision.set_entity("message", message);
        }
    }
    decision
}
