//! Emergency escalation protocol.
//!
//! `EscalationController` owns the single live [`EscalationSession`] and is
//! driven purely by inputs: a trigger, the wellness-check deadline, the result
//! of a confirmation round, a captured location, or a cancel. Each input
//! returns the [`EscalationEffect`]s the runtime must carry out. Every input
//! that refers to a session carries its id; an id that is not the live
//! session is a no-op.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confirmation::ConfirmationResult;
use crate::models::{
    EscalationOutcome, EscalationPhase, EscalationSession, EscalationTrigger, FallState, GeoPoint,
};

pub const FALL_ANNOUNCEMENT: &str =
    "لقيت إنك وقعت. بيتم الاتصال بجهات الطوارئ دلوقتي. خليك مكانك ومتتحركش.";
pub const MANUAL_ANNOUNCEMENT: &str = "حالة طوارئ! بيتم الاتصال بجهات الطوارئ دلوقتي.";
pub const WELLNESS_PROMPT: &str = "إيه الأخبار؟ قول أنا كويس لو إنت بخير.";
pub const STAND_DOWN_ANNOUNCEMENT: &str = "الحمد لله إنك بخير. تم إلغاء التنبيه.";
pub const LOCATION_PROMPT: &str = "خلاص، هبلغ أهلك. قولي إنت فين بالظبط.";
pub const NOTIFIED_ANNOUNCEMENT: &str = "تم إبلاغ جهات الاتصال للطوارئ.";
pub const CANCELLED_ANNOUNCEMENT: &str = "تم إلغاء حالة الطوارئ.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub wellness_check_ms: i64,
    pub confirmation_timeout_ms: i64,
    pub location_timeout_ms: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            wellness_check_ms: 60_000,
            confirmation_timeout_ms: 30_000,
            location_timeout_ms: 45_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenPurpose {
    Confirmation,
    Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EscalationEffect {
    Dispatch {
        session: Uuid,
        trigger: EscalationTrigger,
    },
    Announce {
        session: Uuid,
        message: String,
    },
    ScheduleWellnessCheck {
        session: Uuid,
        due_ms: i64,
    },
    /// Speak `prompt`, then listen until `deadline_ms`.
    Listen {
        session: Uuid,
        purpose: ListenPurpose,
        prompt: String,
        deadline_ms: i64,
    },
    NotifyContacts {
        session: Uuid,
        trigger: EscalationTrigger,
        location_text: Option<String>,
    },
    StandDown {
        session: Uuid,
    },
    /// The session is gone; every timer and listener tied to it must be dropped.
    Resolved {
        session: Uuid,
        outcome: EscalationOutcome,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EscalationController {
    config: EscalationConfig,
    session: Option<EscalationSession>,
    last_resolved: Option<EscalationSession>,
}

impl EscalationSession {
    /// Session-level fall state: `Escalating` until the protocol finishes.
    pub fn fall_state(&self) -> FallState {
        match self.phase {
            EscalationPhase::Resolved => FallState::Resolved,
            EscalationPhase::Idle => FallState::Confirmed,
            _ => FallState::Escalating,
        }
    }
}

impl EscalationController {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            session: None,
            last_resolved: None,
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&EscalationSession> {
        self.session.as_ref()
    }

    /// The most recently finished session, kept for reporting only.
    pub fn last_resolved(&self) -> Option<&EscalationSession> {
        self.last_resolved.as_ref()
    }

    pub fn phase(&self) -> EscalationPhase {
        self.session
            .as_ref()
            .map(|session| session.phase)
            .unwrap_or(EscalationPhase::Idle)
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a session unless one is already live. A second trigger while a
    /// session runs yields no effects.
    pub fn trigger(&mut self, trigger: EscalationTrigger, now_ms: i64) -> Vec<EscalationEffect> {
        if let Some(active) = &self.session {
            info!(
                session = %active.id,
                ?trigger,
                phase = ?active.phase,
                "escalation already active, trigger ignored"
            );
            return Vec::new();
        }

        let id = Uuid::new_v4();
        self.session = Some(EscalationSession {
            id,
            trigger,
            phase: EscalationPhase::Escalating,
            opened_at: Utc::now(),
            started_at_ms: now_ms,
            confirmation_deadline_ms: None,
            location_details: None,
        });
        warn!(session = %id, ?trigger, "escalation started");

        let announcement = match trigger {
            EscalationTrigger::Fall => FALL_ANNOUNCEMENT,
            EscalationTrigger::Manual => MANUAL_ANNOUNCEMENT,
        };
        vec![
            EscalationEffect::Dispatch {
                session: id,
                trigger,
            },
            EscalationEffect::Announce {
                session: id,
                message: announcement.to_string(),
            },
            EscalationEffect::ScheduleWellnessCheck {
                session: id,
                due_ms: now_ms.saturating_add(self.config.wellness_check_ms),
            },
        ]
    }

    pub fn on_wellness_check(&mut self, session_id: Uuid, now_ms: i64) -> Vec<EscalationEffect> {
        let deadline_ms = now_ms.saturating_add(self.config.confirmation_timeout_ms);
        let Some(session) = self.live_session(session_id, EscalationPhase::Escalating) else {
            return Vec::new();
        };
        session.phase = EscalationPhase::AwaitingConfirmation;
        session.confirmation_deadline_ms = Some(deadline_ms);
        info!(session = %session_id, deadline_ms, "awaiting wellness confirmation");

        vec![EscalationEffect::Listen {
            session: session_id,
            purpose: ListenPurpose::Confirmation,
            prompt: WELLNESS_PROMPT.to_string(),
            deadline_ms,
        }]
    }

    pub fn on_confirmation(
        &mut self,
        session_id: Uuid,
        result: ConfirmationResult,
        now_ms: i64,
    ) -> Vec<EscalationEffect> {
        let deadline_ms = now_ms.saturating_add(self.config.location_timeout_ms);
        let Some(session) = self.live_session(session_id, EscalationPhase::AwaitingConfirmation)
        else {
            return Vec::new();
        };

        if result == ConfirmationResult::Confirmed {
            info!(session = %session_id, "user confirmed they are ok");
            self.close();
            return vec![
                EscalationEffect::Announce {
                    session: session_id,
                    message: STAND_DOWN_ANNOUNCEMENT.to_string(),
                },
                EscalationEffect::StandDown {
                    session: session_id,
                },
                EscalationEffect::Resolved {
                    session: session_id,
                    outcome: EscalationOutcome::UserOk,
                },
            ];
        }

        session.phase = EscalationPhase::AwaitingLocation;
        warn!(session = %session_id, ?result, "user not confirmed ok, asking for location");
        vec![EscalationEffect::Listen {
            session: session_id,
            purpose: ListenPurpose::Location,
            prompt: LOCATION_PROMPT.to_string(),
            deadline_ms,
        }]
    }

    /// `location_text` is `None` when nothing was captured before the deadline.
    pub fn on_location(
        &mut self,
        session_id: Uuid,
        location_text: Option<String>,
    ) -> Vec<EscalationEffect> {
        let Some(session) = self.live_session(session_id, EscalationPhase::AwaitingLocation) else {
            return Vec::new();
        };
        let location_text = location_text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        session.location_details = location_text.clone();
        let trigger = session.trigger;
        self.close();
        info!(session = %session_id, has_location = location_text.is_some(), "notifying emergency contacts");

        vec![
            EscalationEffect::NotifyContacts {
                session: session_id,
                trigger,
                location_text,
            },
            EscalationEffect::Announce {
                session: session_id,
                message: NOTIFIED_ANNOUNCEMENT.to_string(),
            },
            EscalationEffect::Resolved {
                session: session_id,
                outcome: EscalationOutcome::ContactsNotified,
            },
        ]
    }

    /// Forces `Resolved` from any phase. Without a live session this is a no-op.
    pub fn cancel(&mut self) -> Vec<EscalationEffect> {
        let Some(session) = self.close() else {
            debug!("cancel with no active escalation");
            return Vec::new();
        };
        info!(session = %session.id, phase = ?session.phase, "escalation cancelled");
        vec![
            EscalationEffect::Announce {
                session: session.id,
                message: CANCELLED_ANNOUNCEMENT.to_string(),
            },
            EscalationEffect::Resolved {
                session: session.id,
                outcome: EscalationOutcome::Cancelled,
            },
        ]
    }

    fn close(&mut self) -> Option<EscalationSession> {
        let mut session = self.session.take()?;
        session.phase = EscalationPhase::Resolved;
        self.last_resolved = Some(session.clone());
        Some(session)
    }

    fn live_session(
        &mut self,
        session_id: Uuid,
        expected: EscalationPhase,
    ) -> Option<&mut EscalationSession> {
        match self.session.as_mut() {
            Some(session) if session.id == session_id && session.phase == expected => {
                Some(session)
            }
            _ => {
                debug!(session = %session_id, ?expected, "stale escalation input ignored");
                None
            }
        }
    }
}

/// Text sent to guardian contacts.
pub fn compose_alert_details(
    trigger: EscalationTrigger,
    location_text: Option<&str>,
    last_known: Option<GeoPoint>,
) -> String {
    let mut details = match trigger {
        EscalationTrigger::Fall => {
            "تنبيه طوارئ: تم اكتشاف سقوط والمستخدم لم يؤكد أنه بخير.".to_string()
        }
        EscalationTrigger::Manual => "تنبيه طوارئ: المستخدم طلب المساعدة.".to_string(),
    };
    if let Some(text) = location_text.filter(|text| !text.trim().is_empty()) {
        details.push_str(&format!("\nالمكان حسب كلامه: {}", text.trim()));
    }
    if let Some(point) = last_known {
        details.push_str(&format!(
            "\nآخر موقع معروف: https://maps.google.com/?q={:.6},{:.6}",
            point.latitude, point.longitude
        ));
    }
    details
}
