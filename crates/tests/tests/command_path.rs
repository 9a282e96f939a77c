mod support;

use std::sync::Arc;
use std::time::Duration;

use sanad_agents::{AgentSession, CommandOutcome, GuardianEvent, HybridOrchestrator, ASK_TO_REPEAT};
use sanad_core::{
    DecisionSource, EngineConfig, EscalationTrigger, GateVerdict, IntentCategory, IntentDecision,
};
use sanad_ml::ModelBackend;
use sanad_observability::AppMetrics;

use support::{CountingModel, Harness, ModelBehaviour, RecordingSpeech};

fn orchestrator(
    config: &EngineConfig,
    model: Option<Arc<dyn ModelBackend>>,
    metrics: Arc<AppMetrics>,
) -> HybridOrchestrator {
    HybridOrchestrator::new(config, model, metrics)
}

#[tokio::test]
async fn emergency_never_reaches_the_model() {
    let config = EngineConfig::default();
    let model = CountingModel::new(ModelBehaviour::Fail);
    let metrics = AppMetrics::shared();
    let orchestrator = orchestrator(&config, Some(model.clone()), metrics.clone());

    for text in ["الحقوني وقعت", "يا نجدة", "Help me please", "عايز إسعاف بسرعة"] {
        let decision = orchestrator.resolve(text).await;
        assert_eq!(decision.category(), IntentCategory::Emergency, "{text}");
        assert_eq!(decision.source(), DecisionSource::Rule, "{text}");
        assert!(decision.confidence() >= 0.95, "{text}");
    }

    assert_eq!(model.calls(), 0);
    assert_eq!(metrics.snapshot().emergency_fast_path_total, 4);
}

#[tokio::test]
async fn confident_rule_skips_the_model() {
    let config = EngineConfig::default();
    let model = CountingModel::new(ModelBehaviour::Reply(r#"{"intent":"set_alarm","confidence":0.97}"#));
    let orchestrator = orchestrator(&config, Some(model.clone()), AppMetrics::shared());

    let decision = orchestrator.resolve("اتصل بأمي").await;

    assert_eq!(decision.category(), IntentCategory::CallContact);
    assert_eq!(decision.source(), DecisionSource::Rule);
    assert_eq!(decision.entity("contact"), Some("الأم"));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn more_confident_model_overrides_a_weak_rule() {
    let config = EngineConfig::default();
    let model = CountingModel::new(ModelBehaviour::Reply(
        r#"Sure! {"intent": "medication_reminder", "confidence": "0.9", "entities": {"medicine": "دوا الضغط"}}"#,
    ));
    let metrics = AppMetrics::shared();
    let orchestrator = orchestrator(&config, Some(model.clone()), metrics.clone());

    let decision = orchestrator.resolve("ميعاد دوا الضغط").await;

    assert_eq!(model.calls(), 1);
    assert_eq!(decision.category(), IntentCategory::MedicationReminder);
    assert_eq!(decision.source(), DecisionSource::Model);
    assert!((decision.confidence() - 0.9).abs() < 1e-6);
    assert_eq!(decision.entity("medication"), Some("دوا الضغط"));
    assert_eq!(metrics.snapshot().model_accepted_total, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_model_times_out_to_the_rule_decision() {
    let config = EngineConfig::from_pairs([("model.timeout_ms", "2000")]).unwrap();
    let model = CountingModel::new(ModelBehaviour::Hang);
    let metrics = AppMetrics::shared();
    let orchestrator = orchestrator(&config, Some(model.clone()), metrics.clone());

    let decision = orchestrator.resolve("ميعاد دوا الضغط").await;

    assert_eq!(model.calls(), 1);
    assert_eq!(decision.category(), IntentCategory::MedicationReminder);
    assert_eq!(decision.source(), DecisionSource::Fallback);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.model_timeouts_total, 1);
    assert_eq!(snapshot.model_fallbacks_total, 1);
}

#[tokio::test]
async fn failing_or_unsure_model_falls_back() {
    let config = EngineConfig::default();
    for behaviour in [ModelBehaviour::Fail, ModelBehaviour::Reply("I am not sure, sorry")] {
        let model = CountingModel::new(behaviour);
        let orchestrator = orchestrator(&config, Some(model.clone()), AppMetrics::shared());

        let decision = orchestrator.resolve("ميعاد دوا الضغط").await;

        assert_eq!(model.calls(), 1);
        assert_eq!(decision.source(), DecisionSource::Fallback);
        assert_eq!(decision.category(), IntentCategory::MedicationReminder);
    }
}

#[test]
fn senior_gate_only_blocks_in_restricted_mode() {
    let gate = EngineConfig::default().senior_gate();
    let add_contact = IntentDecision::new(
        IntentCategory::AddContact,
        0.75,
        Default::default(),
        DecisionSource::Rule,
    );
    let emergency = IntentDecision::new(
        IntentCategory::Emergency,
        0.95,
        Default::default(),
        DecisionSource::Rule,
    );

    assert!(gate.filter(&add_contact, false).is_allowed());
    assert!(matches!(
        gate.filter(&add_contact, true),
        GateVerdict::Blocked {
            category: IntentCategory::AddContact,
            ..
        }
    ));
    assert!(gate.filter(&emergency, true).is_allowed());

    let locked_down = EngineConfig::from_pairs([("senior.allowed_intents", "read_time")])
        .unwrap()
        .senior_gate();
    assert!(locked_down.filter(&emergency, true).is_allowed());
}

fn session(
    config: &EngineConfig,
    speech: Arc<RecordingSpeech>,
    harness: Option<&Harness>,
    metrics: Arc<AppMetrics>,
) -> AgentSession {
    AgentSession::new(
        config,
        orchestrator(config, None, metrics.clone()),
        speech,
        harness.map(|harness| harness.guardian.clone()),
        metrics,
    )
}

#[tokio::test]
async fn senior_mode_blocks_and_explains() {
    let config = EngineConfig::from_pairs([("senior.enabled", "true")]).unwrap();
    let speech = RecordingSpeech::scripted(&[]);
    let metrics = AppMetrics::shared();
    let session = session(&config, speech.clone(), None, metrics.clone());

    let outcome = session.handle_utterance("ضيف رقم خالد").await;

    let CommandOutcome::Blocked { decision, reason } = outcome else {
        panic!("expected a block, got {outcome:?}");
    };
    assert_eq!(decision.category(), IntentCategory::AddContact);
    assert_eq!(speech.spoken(), vec![reason]);
    assert_eq!(metrics.snapshot().gate_blocks_total, 1);

    session.set_senior_mode(false);
    assert!(matches!(
        session.handle_utterance("ضيف رقم خالد").await,
        CommandOutcome::Execute { .. }
    ));
}

#[tokio::test]
async fn unclear_utterance_asks_to_repeat() {
    let config = EngineConfig::default();
    let speech = RecordingSpeech::scripted(&[]);
    let session = session(&config, speech.clone(), None, AppMetrics::shared());

    let outcome = session.handle_utterance("البطيخ طعمه حلو النهارده").await;

    assert!(matches!(
        outcome,
        CommandOutcome::AskToRepeat {
            decision: Some(ref decision)
        } if decision.category() == IntentCategory::Unknown
    ));
    assert_eq!(speech.spoken(), vec![ASK_TO_REPEAT.to_string()]);
}

#[tokio::test]
async fn confident_command_is_ready_to_execute() {
    let config = EngineConfig::default();
    let speech = RecordingSpeech::scripted(&[]);
    let session = session(&config, speech.clone(), None, AppMetrics::shared());

    let outcome = session.handle_audio("كلم ماما".as_bytes()).await;

    let CommandOutcome::Execute { decision } = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(decision.category(), IntentCategory::CallContact);
    assert_eq!(decision.entity("contact"), Some("الأم"));
    assert!(speech.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spoken_emergency_starts_an_escalation_even_in_senior_mode() {
    let config = EngineConfig::from_pairs([
        ("senior.enabled", "true"),
        ("senior.allowed_intents", "read_time"),
    ])
    .unwrap();
    let mut harness = Harness::spawn(&config, &[], None);
    let speech = RecordingSpeech::scripted(&[]);
    let session = session(&config, speech, Some(&harness), AppMetrics::shared());

    let outcome = session.handle_utterance("الحقوني").await;
    assert!(matches!(outcome, CommandOutcome::EmergencyTriggered { .. }));

    let started = harness
        .expect_event(Duration::from_secs(1), |event| {
            matches!(event, GuardianEvent::EscalationStarted { .. })
        })
        .await;
    assert!(matches!(
        started,
        GuardianEvent::EscalationStarted {
            trigger: EscalationTrigger::Manual,
            ..
        }
    ));
}
