use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for any reported confidence. The engine never claims certainty.
pub const MAX_CONFIDENCE: f32 = 0.98;

/// m/s², same constant the Android sensor stack reports as `GRAVITY_EARTH`.
pub const STANDARD_GRAVITY: f32 = 9.806_65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Unknown,
    CallContact,
    SendMessage,
    SetAlarm,
    ReadTime,
    ReadMissedCalls,
    Emergency,
    MedicationReminder,
    AddContact,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 9] = [
        Self::Unknown,
        Self::CallContact,
        Self::SendMessage,
        Self::SetAlarm,
        Self::ReadTime,
        Self::ReadMissedCalls,
        Self::Emergency,
        Self::MedicationReminder,
        Self::AddContact,
    ];

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::CallContact => "call_contact",
            Self::SendMessage => "send_message",
            Self::SetAlarm => "set_alarm",
            Self::ReadTime => "read_time",
            Self::ReadMissedCalls => "read_missed_calls",
            Self::Emergency => "emergency",
            Self::MedicationReminder => "medication_reminder",
            Self::AddContact => "add_contact",
        }
    }

    /// Accepts snake_case codes, upper-case model labels and the label
    /// aliases older model prompts produced. Anything else is `None`.
    pub fn parse_label(value: &str) -> Option<Self> {
        let label = value.trim().to_lowercase().replace([' ', '-'], "_");
        let category = match label.as_str() {
            "unknown" => Self::Unknown,
            "call_contact" | "call_person" | "call" => Self::CallContact,
            "send_message" | "send_whatsapp" | "send_sms" | "send_voice_message" => {
                Self::SendMessage
            }
            "set_alarm" | "remind" | "reminder" | "alarm" => Self::SetAlarm,
            "read_time" | "what_time" | "time" => Self::ReadTime,
            "read_missed_calls" | "check_calls" | "missed_calls" => Self::ReadMissedCalls,
            "emergency" | "help" | "sos" => Self::Emergency,
            "medication_reminder" | "medication" | "medicine" => Self::MedicationReminder,
            "add_contact" | "new_contact" => Self::AddContact,
            _ => return None,
        };
        Some(category)
    }

    pub fn is_emergency(self) -> bool {
        self == Self::Emergency
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Contact,
    Time,
    Medication,
    Message,
}

impl SlotKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Time => "time",
            Self::Medication => "medication",
            Self::Message => "message",
        }
    }
}

/// Output of the normalizer. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedUtterance {
    raw: String,
    canonical: String,
    slots: BTreeMap<SlotKey, String>,
}

impl NormalizedUtterance {
    pub fn new(
        raw: impl Into<String>,
        canonical: impl Into<String>,
        slots: BTreeMap<SlotKey, String>,
    ) -> Self {
        Self {
            raw: raw.into(),
            canonical: canonical.into(),
            slots: slots
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .collect(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn slot(&self, key: SlotKey) -> Option<&str> {
        self.slots.get(&key).map(String::as_str)
    }

    pub fn slots(&self) -> &BTreeMap<SlotKey, String> {
        &self.slots
    }

    /// Slots as decision entities, keyed by their wire names.
    pub fn slot_entities(&self) -> BTreeMap<String, String> {
        self.slots
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Rule,
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    category: IntentCategory,
    confidence: f32,
    entities: BTreeMap<String, String>,
    source: DecisionSource,
}

impl IntentDecision {
    pub fn new(
        category: IntentCategory,
        confidence: f32,
        entities: BTreeMap<String, String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            category,
            confidence: bound_confidence(confidence),
            entities,
            source,
        }
    }

    pub fn category(&self) -> IntentCategory {
        self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }

    pub fn entities(&self) -> &BTreeMap<String, String> {
        &self.entities
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    pub fn set_entity(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entities.insert(key.into(), value.into());
    }

    pub fn remove_entity(&mut self, key: &str) -> Option<String> {
        self.entities.remove(key)
    }

    pub fn with_source(mut self, source: DecisionSource) -> Self {
        self.source = source;
        self
    }
}

/// Clamps into `[0, MAX_CONFIDENCE]`; NaN collapses to zero.
pub fn bound_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_CONFIDENCE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub timestamp_ms: i64,
}

impl MotionSample {
    pub fn new(x: f32, y: f32, z: f32, timestamp_ms: i64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp_ms,
        }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Gravity-compensated magnitude, `|sqrt(x²+y²+z²) - g|`.
    pub fn motion_magnitude(&self, gravity: f32) -> f32 {
        (self.norm() - gravity).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallState {
    Idle,
    Suspected,
    Confirmed,
    Escalating,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    Fall,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPhase {
    Idle,
    Escalating,
    AwaitingConfirmation,
    AwaitingLocation,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOutcome {
    UserOk,
    ContactsNotified,
    Cancelled,
}

/// The single live escalation. Times ending in `_ms` are on the engine clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSession {
    pub id: Uuid,
    pub trigger: EscalationTrigger,
    pub phase: EscalationPhase,
    pub opened_at: DateTime<Utc>,
    pub started_at_ms: i64,
    pub confirmation_deadline_ms: Option<i64>,
    pub location_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}
