use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sanad_core::{EngineConfig, GateVerdict, IntentDecision, SeniorGate};
use sanad_observability::AppMetrics;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::capabilities::{guarded, SpeechCapability};
use crate::guardian::GuardianHandle;
use crate::orchestrator::HybridOrchestrator;

pub const ASK_TO_REPEAT: &str = "معلش مش فاهم قصدك. ممكن تقول تاني؟";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Ready for an executor; execution itself lives outside the engine.
    Execute { decision: IntentDecision },
    EmergencyTriggered { decision: IntentDecision },
    Blocked {
        decision: IntentDecision,
        reason: String,
    },
    AskToRepeat { decision: Option<IntentDecision> },
}

/// Top-level owner of one agent's command path: orchestrator, senior gate and
/// a handle to the guardian runtime.
pub struct AgentSession {
    orchestrator: HybridOrchestrator,
    gate: SeniorGate,
    senior_mode: AtomicBool,
    execution_threshold: f32,
    capability_timeout: Duration,
    speech: Arc<dyn SpeechCapability>,
    guardian: Option<GuardianHandle>,
    metrics: Arc<AppMetrics>,
}

impl AgentSession {
    pub fn new(
        config: &EngineConfig,
        orchestrator: HybridOrchestrator,
        speech: Arc<dyn SpeechCapability>,
        guardian: Option<GuardianHandle>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            orchestrator,
            gate: config.senior_gate(),
            senior_mode: AtomicBool::new(config.senior_enabled),
            execution_threshold: config.execution_threshold,
            capability_timeout: config.capability_timeout(),
            speech,
            guardian,
            metrics,
        }
    }

    pub fn senior_mode(&self) -> bool {
        self.senior_mode.load(Ordering::Relaxed)
    }

    pub fn set_senior_mode(&self, enabled: bool) {
        self.senior_mode.store(enabled, Ordering::Relaxed);
        info!(enabled, "senior mode changed");
    }

    pub fn guardian(&self) -> Option<&GuardianHandle> {
        self.guardian.as_ref()
    }

    #[instrument(skip(self, text))]
    pub async fn handle_utterance(&self, text: &str) -> CommandOutcome {
        let decision = self.orchestrator.resolve(text).await;

        if decision.category().is_emergency() {
            match &self.guardian {
                Some(guardian) => {
                    if let Err(err) = guardian.trigger_emergency().await {
                        warn!(error = %err, "could not reach guardian runtime");
                    }
                }
                None => warn!("emergency recognised but no guardian runtime attached"),
            }
            return CommandOutcome::EmergencyTriggered { decision };
        }

        if let GateVerdict::Blocked { reason, .. } = self.gate.filter(&decision, self.senior_mode())
        {
            self.metrics.inc_gate_block();
            info!(category = %decision.category(), "command blocked in senior mode");
            self.say(&reason).await;
            return CommandOutcome::Blocked { decision, reason };
        }

        if decision.confidence() < self.execution_threshold {
            info!(
                confidence = decision.confidence(),
                threshold = self.execution_threshold,
                "confidence below execution threshold"
            );
            self.say(ASK_TO_REPEAT).await;
            return CommandOutcome::AskToRepeat {
                decision: Some(decision),
            };
        }

        CommandOutcome::Execute { decision }
    }

    /// Transcribes then handles. A failed transcription asks the user to repeat.
    pub async fn handle_audio(&self, audio: &[u8]) -> CommandOutcome {
        let transcript = guarded(
            "speech.transcribe",
            self.capability_timeout,
            &self.metrics,
            self.speech.transcribe(audio),
        )
        .await
        .filter(|text| !text.trim().is_empty());

        match transcript {
            Some(text) => self.handle_utterance(&text).await,
            None => {
                self.say(ASK_TO_REPEAT).await;
                CommandOutcome::AskToRepeat { decision: None }
            }
        }
    }

    async fn say(&self, text: &str) {
        guarded(
            "speech.speak",
            self.capability_timeout,
            &self.metrics,
            self.speech.speak(text),
        )
        .await;
    }
}
