//! Single-writer runtime for fall monitoring and emergency escalation.
//!
//! One actor task owns the [`FallMonitor`], the [`EscalationController`] and
//! the [`DeadlineQueue`]. Sensor samples, manual triggers, cancels and
//! listening results all arrive on one command channel, and due deadlines
//! fire from the same `select!` loop, so every state transition is
//! serialized. Capability calls run on a separate effect worker in the order
//! the controller emitted them; the actor never waits on a collaborator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sanad_core::{
    compose_alert_details, ConfirmationResult, DeadlineQueue, EngineConfig, EscalationController,
    EscalationEffect, EscalationOutcome, EscalationPhase, EscalationSession, EscalationTrigger,
    FallMonitor, FallState, FallTransition, ListenPurpose, MotionSample, MAX_WINDOW_MS,
};
use sanad_observability::AppMetrics;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::{guarded, Capabilities};
use crate::clock::Clock;
use crate::listen::{listen_for_reply, wait_for_confirmation, Reply};

const COMMAND_CHANNEL_SIZE: usize = 256;
const EVENT_CHANNEL_SIZE: usize = 128;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("guardian runtime has stopped")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardianEvent {
    MonitoringStarted,
    MonitoringStopped,
    FallSuspected {
        at_ms: i64,
        magnitude: f32,
    },
    FallConfirmed {
        at_ms: i64,
        residual: f32,
    },
    FalseAlarm {
        at_ms: i64,
        residual: f32,
    },
    EscalationStarted {
        session: Uuid,
        trigger: EscalationTrigger,
    },
    PhaseChanged {
        session: Uuid,
        phase: EscalationPhase,
    },
    Announced {
        session: Uuid,
        message: String,
    },
    ContactsNotified {
        session: Uuid,
        details: String,
        delivered: bool,
    },
    EscalationResolved {
        session: Uuid,
        outcome: EscalationOutcome,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardianSnapshot {
    pub monitoring: bool,
    pub fall_state: FallState,
    pub escalation: Option<EscalationSession>,
    pub last_resolved: Option<EscalationSession>,
    pub pending_deadlines: usize,
}

enum Command {
    StartMonitoring,
    StopMonitoring,
    Sample(MotionSample),
    Trigger(EscalationTrigger),
    Cancel,
    Confirmation {
        session: Uuid,
        result: ConfirmationResult,
    },
    Location {
        session: Uuid,
        text: Option<String>,
    },
    Snapshot(oneshot::Sender<GuardianSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    FallConfirmation { generation: u64 },
    WellnessCheck { session: Uuid },
}

enum Job {
    Run(EscalationEffect),
    Listen {
        session: Uuid,
        purpose: ListenPurpose,
        prompt: String,
        deadline: Instant,
        cancel: CancellationToken,
    },
}

/// Cheap to clone. Every method fails only once the runtime has stopped.
#[derive(Clone)]
pub struct GuardianHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<GuardianEvent>,
    clock: Arc<dyn Clock>,
}

impl GuardianHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.events.subscribe()
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub async fn start_monitoring(&self) -> Result<(), GuardianError> {
        self.send(Command::StartMonitoring).await
    }

    pub async fn stop_monitoring(&self) -> Result<(), GuardianError> {
        self.send(Command::StopMonitoring).await
    }

    pub async fn push_sample(&self, sample: MotionSample) -> Result<(), GuardianError> {
        self.send(Command::Sample(sample)).await
    }

    /// Stamps a raw accelerometer reading with the engine clock.
    pub async fn push_reading(&self, x: f32, y: f32, z: f32) -> Result<(), GuardianError> {
        self.push_sample(MotionSample::new(x, y, z, self.clock.now_ms()))
            .await
    }

    pub async fn trigger_emergency(&self) -> Result<(), GuardianError> {
        self.send(Command::Trigger(EscalationTrigger::Manual)).await
    }

    /// Safe with no active escalation.
    pub async fn cancel_emergency(&self) -> Result<(), GuardianError> {
        self.send(Command::Cancel).await
    }

    pub async fn snapshot(&self) -> Result<GuardianSnapshot, GuardianError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        response.await.map_err(|_| GuardianError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), GuardianError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), GuardianError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GuardianError::Stopped)
    }
}

pub struct GuardianRuntime {
    fall: FallMonitor,
    escalation: EscalationController,
    deadlines: DeadlineQueue<Deadline>,
    session_tokens: HashMap<Uuid, CancellationToken>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AppMetrics>,
    events: broadcast::Sender<GuardianEvent>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl GuardianRuntime {
    /// Spawns the actor and its effect worker on the current tokio runtime.
    pub fn spawn(
        config: &EngineConfig,
        capabilities: Capabilities,
        metrics: Arc<AppMetrics>,
        clock: Arc<dyn Clock>,
    ) -> (GuardianHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let worker = EffectWorker {
            capabilities,
            capability_timeout: config.capability_timeout(),
            metrics: metrics.clone(),
            events: events.clone(),
            commands: commands_tx.downgrade(),
        };
        tokio::spawn(worker.run(jobs_rx));

        let runtime = Self {
            fall: FallMonitor::new(config.fall),
            escalation: EscalationController::new(config.escalation),
            deadlines: DeadlineQueue::new(),
            session_tokens: HashMap::new(),
            clock: clock.clone(),
            metrics,
            events: events.clone(),
            jobs: jobs_tx,
        };
        let task = tokio::spawn(runtime.run(commands_rx));

        let handle = GuardianHandle {
            commands: commands_tx,
            events,
            clock,
        };
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("guardian runtime started");
        loop {
            let wait = self
                .deadlines
                .next_due()
                .map(|due| Duration::from_millis(due.saturating_sub(self.clock.now_ms()).max(0) as u64));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                () = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                    self.fire_due();
                }
            }
        }

        for (_, token) in self.session_tokens.drain() {
            token.cancel();
        }
        info!("guardian runtime stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now_ms();
        match command {
            Command::StartMonitoring => {
                if self.fall.start() {
                    self.publish(GuardianEvent::MonitoringStarted);
                }
            }
            Command::StopMonitoring => {
                let was_active = self.fall.is_active();
                if let Some(timer) = self.fall.stop() {
                    self.deadlines.cancel_where(|deadline| {
                        *deadline
                            == Deadline::FallConfirmation {
                                generation: timer.generation,
                            }
                    });
                }
                if was_active {
                    self.publish(GuardianEvent::MonitoringStopped);
                }
            }
            Command::Sample(sample) => {
                let transition = self.fall.on_sample(sample);
                self.on_fall_transition(transition, now);
            }
            Command::Trigger(trigger) => {
                let effects = self.escalation.trigger(trigger, now);
                self.apply(effects, now);
            }
            Command::Cancel => {
                let effects = self.escalation.cancel();
                self.apply(effects, now);
            }
            Command::Confirmation { session, result } => {
                let effects = self.escalation.on_confirmation(session, result, now);
                self.apply(effects, now);
            }
            Command::Location { session, text } => {
                let effects = self.escalation.on_location(session, text);
                self.apply(effects, now);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn fire_due(&mut self) {
        let now = self.clock.now_ms();
        while let Some((_, deadline)) = self.deadlines.pop_due(now) {
            match deadline {
                Deadline::FallConfirmation { generation } => {
                    let transition = self.fall.on_confirmation_due(generation, now);
                    self.on_fall_transition(transition, now);
                }
                Deadline::WellnessCheck { session } => {
                    let effects = self.escalation.on_wellness_check(session, now);
                    self.apply(effects, now);
                }
            }
        }
    }

    fn on_fall_transition(&mut self, transition: FallTransition, now: i64) {
        match transition {
            FallTransition::Unchanged => {}
            FallTransition::Suspected {
                started_at_ms,
                magnitude,
                timer,
            } => {
                self.metrics.inc_fall_suspected();
                self.deadlines
                    .cancel_where(|deadline| matches!(deadline, Deadline::FallConfirmation { .. }));
                // Sample timestamps only order samples; the window runs on the engine clock.
                let due_ms = now.saturating_add(timer.due_ms.saturating_sub(started_at_ms));
                self.deadlines.schedule(
                    due_ms,
                    Deadline::FallConfirmation {
                        generation: timer.generation,
                    },
                );
                self.publish(GuardianEvent::FallSuspected {
                    at_ms: now,
                    magnitude,
                });
            }
            FallTransition::Confirmed { residual, .. } => {
                self.metrics.inc_fall_confirmed();
                self.publish(GuardianEvent::FallConfirmed {
                    at_ms: now,
                    residual,
                });
                let effects = self.escalation.trigger(EscalationTrigger::Fall, now);
                self.apply(effects, now);
            }
            FallTransition::FalseAlarm { residual, .. } => {
                self.metrics.inc_false_alarm();
                self.publish(GuardianEvent::FalseAlarm {
                    at_ms: now,
                    residual,
                });
            }
        }
    }

    fn apply(&mut self, effects: Vec<EscalationEffect>, now: i64) {
        for effect in effects {
            match effect {
                EscalationEffect::Dispatch { session, trigger } => {
                    self.metrics.inc_escalation_started();
                    self.session_tokens.insert(session, CancellationToken::new());
                    self.publish(GuardianEvent::EscalationStarted { session, trigger });
                    self.publish(GuardianEvent::PhaseChanged {
                        session,
                        phase: EscalationPhase::Escalating,
                    });
                    self.enqueue(Job::Run(EscalationEffect::Dispatch { session, trigger }));
                }
                EscalationEffect::ScheduleWellnessCheck { session, due_ms } => {
                    self.deadlines
                        .schedule(due_ms, Deadline::WellnessCheck { session });
                }
                EscalationEffect::Listen {
                    session,
                    purpose,
                    prompt,
                    deadline_ms,
                } => {
                    self.publish(GuardianEvent::PhaseChanged {
                        session,
                        phase: self.escalation.phase(),
                    });
                    let Some(token) = self.session_tokens.get(&session) else {
                        warn!(session = %session, "listen requested without a session token");
                        continue;
                    };
                    let window_ms = deadline_ms.saturating_sub(now).clamp(0, MAX_WINDOW_MS);
                    let deadline = Instant::now() + Duration::from_millis(window_ms as u64);
                    let cancel = token.child_token();
                    self.enqueue(Job::Listen {
                        session,
                        purpose,
                        prompt,
                        deadline,
                        cancel,
                    });
                }
                EscalationEffect::Resolved { session, outcome } => {
                    if let Some(token) = self.session_tokens.remove(&session) {
                        token.cancel();
                    }
                    let dropped = self.deadlines.cancel_where(|deadline| {
                        *deadline == Deadline::WellnessCheck { session }
                    });
                    debug!(session = %session, dropped, "session timers cleared");
                    self.metrics.inc_escalation_resolved();
                    self.publish(GuardianEvent::PhaseChanged {
                        session,
                        phase: EscalationPhase::Resolved,
                    });
                    self.publish(GuardianEvent::EscalationResolved { session, outcome });
                }
                other => self.enqueue(Job::Run(other)),
            }
        }
    }

    fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("effect worker is gone, effect dropped");
        }
    }

    fn publish(&self, event: GuardianEvent) {
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> GuardianSnapshot {
        GuardianSnapshot {
            monitoring: self.fall.is_active(),
            fall_state: self.fall.state(),
            escalation: self.escalation.session().cloned(),
            last_resolved: self.escalation.last_resolved().cloned(),
            pending_deadlines: self.deadlines.len(),
        }
    }
}

/// Runs capability calls one at a time, in emission order.
struct EffectWorker {
    capabilities: Capabilities,
    capability_timeout: Duration,
    metrics: Arc<AppMetrics>,
    events: broadcast::Sender<GuardianEvent>,
    commands: mpsc::WeakSender<Command>,
}

impl EffectWorker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Run(effect) => self.run_effect(effect).await,
                Job::Listen {
                    session,
                    purpose,
                    prompt,
                    deadline,
                    cancel,
                } => self.listen(session, purpose, &prompt, deadline, &cancel).await,
            }
        }
    }

    async fn run_effect(&self, effect: EscalationEffect) {
        let caps = &self.capabilities;
        let limit = self.capability_timeout;
        let metrics = self.metrics.as_ref();

        match effect {
            EscalationEffect::Dispatch { session, trigger } => {
                if guarded("dispatcher.dispatch", limit, metrics, caps.dispatcher.dispatch(trigger))
                    .await
                    .is_none()
                {
                    warn!(session = %session, "emergency dispatch failed, continuing protocol");
                }
            }
            EscalationEffect::Announce { session, message } => {
                guarded("speech.speak", limit, metrics, caps.speech.speak(&message)).await;
                let _ = self
                    .events
                    .send(GuardianEvent::Announced { session, message });
            }
            EscalationEffect::NotifyContacts {
                session,
                trigger,
                location_text,
            } => {
                let last_known = guarded(
                    "location.last_known",
                    limit,
                    metrics,
                    caps.location.last_known_location(),
                )
                .await
                .flatten();
                let details = compose_alert_details(trigger, location_text.as_deref(), last_known);
                let delivered = guarded(
                    "notifier.notify",
                    limit,
                    metrics,
                    caps.notifier.notify_emergency_contacts(&details),
                )
                .await
                .is_some();
                info!(session = %session, delivered, has_gps = last_known.is_some(), "emergency contacts notified");
                let _ = self.events.send(GuardianEvent::ContactsNotified {
                    session,
                    details,
                    delivered,
                });
            }
            EscalationEffect::StandDown { session } => {
                guarded("dispatcher.stand_down", limit, metrics, caps.dispatcher.stand_down())
                    .await;
                debug!(session = %session, "dispatch stood down");
            }
            other => debug!(effect = ?other, "effect handled by the runtime, skipped"),
        }
    }

    async fn listen(
        &self,
        session: Uuid,
        purpose: ListenPurpose,
        prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let speech = self.capabilities.speech.as_ref();
        let limit = self.capability_timeout;
        let metrics = self.metrics.as_ref();

        let command = match purpose {
            ListenPurpose::Confirmation => {
                match wait_for_confirmation(speech, prompt, deadline, limit, cancel, metrics).await {
                    Some(result) => Command::Confirmation { session, result },
                    None => return,
                }
            }
            ListenPurpose::Location => {
                match listen_for_reply(speech, prompt, deadline, limit, cancel, metrics).await {
                    Reply::Heard(text) => Command::Location {
                        session,
                        text: Some(text),
                    },
                    Reply::Silent => Command::Location {
                        session,
                        text: None,
                    },
                    Reply::Cancelled => return,
                }
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        match self.commands.upgrade() {
            Some(commands) => {
                let _ = commands.send(command).await;
            }
            None => debug!(session = %session, "runtime gone, reply dropped"),
        }
    }
}
