mod support;

use std::time::Duration;

use sanad_agents::{GuardianError, GuardianEvent};
use sanad_core::escalation::{
    CANCELLED_ANNOUNCEMENT, FALL_ANNOUNCEMENT, LOCATION_PROMPT, MANUAL_ANNOUNCEMENT,
    NOTIFIED_ANNOUNCEMENT, STAND_DOWN_ANNOUNCEMENT, WELLNESS_PROMPT,
};
use sanad_core::{EngineConfig, EscalationOutcome, EscalationPhase, EscalationTrigger, GeoPoint};

use support::Harness;

const SECOND: Duration = Duration::from_secs(1);
const LONG_WAIT: Duration = Duration::from_secs(600);

fn resolved(event: &GuardianEvent) -> bool {
    matches!(event, GuardianEvent::EscalationResolved { .. })
}

#[tokio::test(start_paused = true)]
async fn impact_then_stillness_confirms_one_fall_and_escalates() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);
    harness.guardian.start_monitoring().await.unwrap();

    harness
        .push_magnitudes(
            config.fall.gravity,
            &[5.0, 5.0, 22.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            SECOND,
        )
        .await;

    let suspected = harness
        .expect_event(SECOND, |event| matches!(event, GuardianEvent::FallSuspected { .. }))
        .await;
    let GuardianEvent::FallSuspected { at_ms, magnitude } = suspected else {
        unreachable!()
    };
    assert_eq!(at_ms, 2_000);
    assert!((magnitude - 22.0).abs() < 1e-3);

    let confirmed = harness
        .expect_event(SECOND, |event| matches!(event, GuardianEvent::FallConfirmed { .. }))
        .await;
    assert!(matches!(confirmed, GuardianEvent::FallConfirmed { at_ms: 7_000, .. }));

    let started = harness
        .expect_event(SECOND, |event| matches!(event, GuardianEvent::EscalationStarted { .. }))
        .await;
    assert!(matches!(
        started,
        GuardianEvent::EscalationStarted {
            trigger: EscalationTrigger::Fall,
            ..
        }
    ));
    harness
        .expect_event(SECOND, |event| {
            matches!(event, GuardianEvent::Announced { message, .. } if message == FALL_ANNOUNCEMENT)
        })
        .await;

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.falls_suspected_total, 1);
    assert_eq!(metrics.falls_confirmed_total, 1);
    assert_eq!(metrics.false_alarms_total, 0);
    assert_eq!(harness.dispatcher.dispatched(), vec![EscalationTrigger::Fall]);

    let snapshot = harness.guardian.snapshot().await.unwrap();
    let session = snapshot.escalation.expect("escalation is live");
    assert_eq!(session.phase, EscalationPhase::Escalating);
    assert_eq!(session.started_at_ms, 7_000);
}

#[tokio::test(start_paused = true)]
async fn continued_motion_after_impact_is_a_false_alarm() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);
    harness.guardian.start_monitoring().await.unwrap();

    harness
        .push_magnitudes(
            config.fall.gravity,
            &[5.0, 25.0, 8.0, 8.0, 8.0, 8.0, 8.0],
            SECOND,
        )
        .await;

    let event = harness
        .expect_event(SECOND, |event| {
            matches!(
                event,
                GuardianEvent::FalseAlarm { .. } | GuardianEvent::FallConfirmed { .. }
            )
        })
        .await;
    let GuardianEvent::FalseAlarm { at_ms, residual } = event else {
        panic!("expected a false alarm, got {event:?}");
    };
    assert_eq!(at_ms, 6_000);
    assert!(residual >= config.fall.post_fall_threshold);

    let snapshot = harness.guardian.snapshot().await.unwrap();
    assert!(snapshot.escalation.is_none());
    assert_eq!(harness.metrics.snapshot().escalations_started_total, 0);
    assert!(harness.dispatcher.dispatched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopping_monitoring_drops_a_pending_suspicion() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);
    harness.guardian.start_monitoring().await.unwrap();

    harness
        .push_magnitudes(config.fall.gravity, &[22.0], Duration::ZERO)
        .await;
    harness.guardian.stop_monitoring().await.unwrap();
    tokio::time::sleep(10 * SECOND).await;

    let events = harness.drain_events();
    assert!(events
        .iter()
        .any(|event| matches!(event, GuardianEvent::MonitoringStopped)));
    assert!(!events.iter().any(|event| matches!(
        event,
        GuardianEvent::FallConfirmed { .. } | GuardianEvent::FalseAlarm { .. }
    )));

    let snapshot = harness.guardian.snapshot().await.unwrap();
    assert!(!snapshot.monitoring);
    assert_eq!(snapshot.pending_deadlines, 0);
}

#[tokio::test(start_paused = true)]
async fn user_reporting_ok_stands_the_escalation_down() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &["أنا كويس الحمد لله"], None);

    harness.guardian.trigger_emergency().await.unwrap();
    let event = harness.expect_event(LONG_WAIT, resolved).await;
    assert!(matches!(
        event,
        GuardianEvent::EscalationResolved {
            outcome: EscalationOutcome::UserOk,
            ..
        }
    ));
    assert!(harness.guardian.now_ms() >= config.escalation.wellness_check_ms);

    tokio::time::sleep(SECOND).await;
    assert_eq!(harness.dispatcher.dispatched(), vec![EscalationTrigger::Manual]);
    assert_eq!(harness.dispatcher.stand_downs(), 1);
    assert!(harness.notifier.messages().is_empty());

    let spoken = harness.speech.spoken();
    assert!(spoken.iter().any(|text| text == WELLNESS_PROMPT));
    assert!(spoken.iter().any(|text| text == STAND_DOWN_ANNOUNCEMENT));
    assert!(!spoken.iter().any(|text| text == LOCATION_PROMPT));

    let snapshot = harness.guardian.snapshot().await.unwrap();
    assert!(snapshot.escalation.is_none());
    let last = snapshot.last_resolved.expect("resolved session kept");
    assert_eq!(last.phase, EscalationPhase::Resolved);
}

#[tokio::test(start_paused = true)]
async fn denial_collects_location_and_notifies_contacts() {
    let config = EngineConfig::default();
    let cairo = GeoPoint {
        latitude: 30.0444,
        longitude: 31.2357,
    };
    let mut harness = Harness::spawn(&config, &["لا مش كويس", "في المطبخ"], Some(cairo));

    harness.guardian.trigger_emergency().await.unwrap();
    let notified = harness
        .expect_event(LONG_WAIT, |event| {
            matches!(event, GuardianEvent::ContactsNotified { .. })
        })
        .await;
    let GuardianEvent::ContactsNotified {
        details, delivered, ..
    } = notified
    else {
        unreachable!()
    };
    assert!(delivered);
    assert!(details.contains("في المطبخ"));
    assert!(details.contains("https://maps.google.com/?q=30.044400,31.235700"));

    let event = harness.expect_event(LONG_WAIT, resolved).await;
    assert!(matches!(
        event,
        GuardianEvent::EscalationResolved {
            outcome: EscalationOutcome::ContactsNotified,
            ..
        }
    ));

    tokio::time::sleep(SECOND).await;
    assert_eq!(harness.notifier.messages(), vec![details]);
    assert_eq!(harness.dispatcher.stand_downs(), 0);
    let spoken = harness.speech.spoken();
    assert!(spoken.iter().any(|text| text == LOCATION_PROMPT));
    assert!(spoken.iter().any(|text| text == NOTIFIED_ANNOUNCEMENT));

    let last = harness
        .guardian
        .snapshot()
        .await
        .unwrap()
        .last_resolved
        .expect("resolved session kept");
    assert_eq!(last.location_details.as_deref(), Some("في المطبخ"));
}

#[tokio::test(start_paused = true)]
async fn failing_capabilities_do_not_stop_the_protocol() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn_degraded(&config, &["لا", "في الصالة"]);

    harness.guardian.trigger_emergency().await.unwrap();
    harness
        .expect_event(SECOND, |event| {
            matches!(event, GuardianEvent::Announced { message, .. } if message == MANUAL_ANNOUNCEMENT)
        })
        .await;

    let notified = harness
        .expect_event(LONG_WAIT, |event| {
            matches!(event, GuardianEvent::ContactsNotified { .. })
        })
        .await;
    let GuardianEvent::ContactsNotified {
        details, delivered, ..
    } = notified
    else {
        unreachable!()
    };
    assert!(!delivered);
    assert!(details.contains("في الصالة"));
    assert!(!details.contains("maps.google.com"));

    let event = harness.expect_event(LONG_WAIT, resolved).await;
    assert!(matches!(
        event,
        GuardianEvent::EscalationResolved {
            outcome: EscalationOutcome::ContactsNotified,
            ..
        }
    ));

    tokio::time::sleep(SECOND).await;
    assert_eq!(harness.dispatcher.dispatched(), vec![EscalationTrigger::Manual]);
    assert_eq!(harness.speech.listens(), 2);
    let spoken = harness.speech.spoken();
    assert!(spoken.iter().any(|text| text == WELLNESS_PROMPT));
    assert!(spoken.iter().any(|text| text == LOCATION_PROMPT));
    assert_eq!(harness.notifier.messages(), vec![details]);
    assert_eq!(harness.metrics.snapshot().capability_failures_total, 3);
}

#[tokio::test(start_paused = true)]
async fn silence_runs_every_timeout_before_notifying() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);

    harness.guardian.trigger_emergency().await.unwrap();
    let event = harness.expect_event(LONG_WAIT, resolved).await;
    assert!(matches!(
        event,
        GuardianEvent::EscalationResolved {
            outcome: EscalationOutcome::ContactsNotified,
            ..
        }
    ));

    let escalation = config.escalation;
    let minimum = escalation.wellness_check_ms
        + escalation.confirmation_timeout_ms
        + escalation.location_timeout_ms;
    assert!(harness.guardian.now_ms() >= minimum);

    tokio::time::sleep(SECOND).await;
    assert_eq!(harness.speech.listens(), 2);
    let messages = harness.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].contains("maps.google.com"));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_awaiting_confirmation_ends_the_protocol() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);

    harness.guardian.trigger_emergency().await.unwrap();
    harness
        .expect_event(LONG_WAIT, |event| {
            matches!(
                event,
                GuardianEvent::PhaseChanged {
                    phase: EscalationPhase::AwaitingConfirmation,
                    ..
                }
            )
        })
        .await;

    harness.guardian.cancel_emergency().await.unwrap();
    let event = harness.expect_event(SECOND, resolved).await;
    assert!(matches!(
        event,
        GuardianEvent::EscalationResolved {
            outcome: EscalationOutcome::Cancelled,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_secs(300)).await;

    let spoken = harness.speech.spoken();
    assert!(spoken.iter().any(|text| text == CANCELLED_ANNOUNCEMENT));
    assert!(!spoken.iter().any(|text| text == LOCATION_PROMPT));
    assert!(harness.notifier.messages().is_empty());
    assert!(harness.speech.listens() <= 1);
    assert!(!harness.drain_events().iter().any(resolved));

    let snapshot = harness.guardian.snapshot().await.unwrap();
    assert!(snapshot.escalation.is_none());
    assert_eq!(snapshot.pending_deadlines, 0);
}

#[tokio::test(start_paused = true)]
async fn second_trigger_joins_the_live_session() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);

    harness.guardian.trigger_emergency().await.unwrap();
    let first = harness.guardian.snapshot().await.unwrap().escalation;
    harness.guardian.trigger_emergency().await.unwrap();
    let second = harness.guardian.snapshot().await.unwrap().escalation;

    let first = first.expect("session opened");
    assert_eq!(second.map(|session| session.id), Some(first.id));

    tokio::time::sleep(SECOND).await;
    let started = harness
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, GuardianEvent::EscalationStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(harness.metrics.snapshot().escalations_started_total, 1);
    assert_eq!(harness.dispatcher.dispatched().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_without_escalation_is_harmless() {
    let config = EngineConfig::default();
    let mut harness = Harness::spawn(&config, &[], None);

    harness.guardian.cancel_emergency().await.unwrap();
    let snapshot = harness.guardian.snapshot().await.unwrap();

    assert!(snapshot.escalation.is_none());
    assert!(snapshot.last_resolved.is_none());
    assert!(harness.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn handles_fail_once_the_runtime_shuts_down() {
    let config = EngineConfig::default();
    let harness = Harness::spawn(&config, &[], None);

    harness.guardian.shutdown().await.unwrap();
    harness.task.await.unwrap();

    assert!(matches!(
        harness.guardian.start_monitoring().await,
        Err(GuardianError::Stopped)
    ));
}
