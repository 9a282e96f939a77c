#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sanad_agents::{
    Capabilities, CapabilityError, EmergencyDispatcher, EmergencyNotifier, GuardianEvent,
    GuardianHandle, GuardianRuntime, LocationProvider, MonotonicClock, SpeechCapability,
};
use sanad_core::{EngineConfig, EscalationTrigger, GeoPoint};
use sanad_ml::{ModelBackend, ModelError};
use sanad_observability::AppMetrics;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub enum ModelBehaviour {
    Reply(&'static str),
    Fail,
    Hang,
}

/// Model fake that counts every call.
pub struct CountingModel {
    behaviour: ModelBehaviour,
    calls: AtomicUsize,
}

impl CountingModel {
    pub fn new(behaviour: ModelBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    async fn infer(&self, _prompt: &str, _max_tokens: u32) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            ModelBehaviour::Reply(text) => Ok(text.to_string()),
            ModelBehaviour::Fail => Err(ModelError::Inference("model exploded".to_string())),
            ModelBehaviour::Hang => std::future::pending().await,
        }
    }
}

/// Records what was spoken. Each `listen` takes the next scripted reply; with
/// the script exhausted it never answers, so the caller's deadline decides.
#[derive(Default)]
pub struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<String>>,
    listens: AtomicUsize,
}

impl RecordingSpeech {
    pub fn scripted(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
            ..Self::default()
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechCapability for RecordingSpeech {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CapabilityError> {
        String::from_utf8(audio.to_vec()).map_err(|err| CapabilityError::Failed(err.to_string()))
    }

    async fn speak(&self, text: &str) -> Result<(), CapabilityError> {
        self.spoken.lock().push(text.to_string());
        Ok(())
    }

    async fn listen(&self, _max_wait: Duration) -> Result<Option<String>, CapabilityError> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => Ok(Some(reply)),
            None => std::future::pending().await,
        }
    }
}

/// Records dispatch calls; a failing dispatcher records the attempt, then errors.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<EscalationTrigger>>,
    stand_downs: AtomicUsize,
    failing: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn dispatched(&self) -> Vec<EscalationTrigger> {
        self.dispatched.lock().clone()
    }

    pub fn stand_downs(&self) -> usize {
        self.stand_downs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmergencyDispatcher for RecordingDispatcher {
    async fn dispatch(&self, trigger: EscalationTrigger) -> Result<(), CapabilityError> {
        self.dispatched.lock().push(trigger);
        if self.failing {
            return Err(CapabilityError::Unavailable("no dispatch service".to_string()));
        }
        Ok(())
    }

    async fn stand_down(&self) -> Result<(), CapabilityError> {
        self.stand_downs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl EmergencyNotifier for RecordingNotifier {
    async fn notify_emergency_contacts(&self, details: &str) -> Result<(), CapabilityError> {
        self.messages.lock().push(details.to_string());
        if self.failing {
            return Err(CapabilityError::Failed("sms gateway rejected the message".to_string()));
        }
        Ok(())
    }
}

pub struct StaticLocation(pub Option<GeoPoint>);

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn last_known_location(&self) -> Result<Option<GeoPoint>, CapabilityError> {
        Ok(self.0)
    }
}

pub struct DeniedLocation;

#[async_trait]
impl LocationProvider for DeniedLocation {
    async fn last_known_location(&self) -> Result<Option<GeoPoint>, CapabilityError> {
        Err(CapabilityError::PermissionDenied("location".to_string()))
    }
}

/// A guardian runtime wired to recording fakes.
pub struct Harness {
    pub guardian: GuardianHandle,
    pub task: JoinHandle<()>,
    pub events: broadcast::Receiver<GuardianEvent>,
    pub speech: Arc<RecordingSpeech>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<AppMetrics>,
}

impl Harness {
    pub fn spawn(config: &EngineConfig, replies: &[&str], location: Option<GeoPoint>) -> Self {
        Self::spawn_with(
            config,
            replies,
            RecordingDispatcher::default(),
            RecordingNotifier::default(),
            Arc::new(StaticLocation(location)),
        )
    }

    /// Every external capability except speech fails.
    pub fn spawn_degraded(config: &EngineConfig, replies: &[&str]) -> Self {
        Self::spawn_with(
            config,
            replies,
            RecordingDispatcher::failing(),
            RecordingNotifier::failing(),
            Arc::new(DeniedLocation),
        )
    }

    fn spawn_with(
        config: &EngineConfig,
        replies: &[&str],
        dispatcher: RecordingDispatcher,
        notifier: RecordingNotifier,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        let speech = RecordingSpeech::scripted(replies);
        let dispatcher = Arc::new(dispatcher);
        let notifier = Arc::new(notifier);
        let metrics = AppMetrics::shared();

        let (guardian, task) = GuardianRuntime::spawn(
            config,
            Capabilities {
                speech: speech.clone(),
                dispatcher: dispatcher.clone(),
                notifier: notifier.clone(),
                location,
            },
            metrics.clone(),
            Arc::new(MonotonicClock::new()),
        );
        let events = guardian.subscribe();

        Self {
            guardian,
            task,
            events,
            speech,
            dispatcher,
            notifier,
            metrics,
        }
    }

    /// Waits for the first event matching `wanted`, skipping the rest.
    pub async fn expect_event<F>(&mut self, within: Duration, wanted: F) -> GuardianEvent
    where
        F: Fn(&GuardianEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(within, async {
            loop {
                match events.recv().await {
                    Ok(event) if wanted(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("guardian event stream closed")
                    }
                }
            }
        })
        .await
        .expect("expected guardian event did not arrive")
    }

    /// Every event already published, without waiting.
    pub fn drain_events(&mut self) -> Vec<GuardianEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Pushes one reading per magnitude, `interval` apart, starting now.
    pub async fn push_magnitudes(&self, gravity: f32, magnitudes: &[f32], interval: Duration) {
        for magnitude in magnitudes {
            self.guardian
                .push_reading(0.0, 0.0, gravity + magnitude)
                .await
                .expect("runtime running");
            tokio::time::sleep(interval).await;
        }
    }
}
