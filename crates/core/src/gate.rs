use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{IntentCategory, IntentDecision};

pub const DEFAULT_ALLOWED_INTENTS: [IntentCategory; 6] = [
    IntentCategory::CallContact,
    IntentCategory::Emergency,
    IntentCategory::ReadTime,
    IntentCategory::SetAlarm,
    IntentCategory::SendMessage,
    IntentCategory::ReadMissedCalls,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Allowed,
    Blocked { category: IntentCategory, reason: String },
}

impl GateVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Restricted-vocabulary filter for senior mode. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct SeniorGate {
    allowed: BTreeSet<IntentCategory>,
}

impl Default for SeniorGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_INTENTS)
    }
}

impl SeniorGate {
    /// Emergency is always part of the allow-list, whatever the caller passes.
    pub fn new(allowed: impl IntoIterator<Item = IntentCategory>) -> Self {
        let mut allowed: BTreeSet<IntentCategory> = allowed.into_iter().collect();
        allowed.insert(IntentCategory::Emergency);
        Self { allowed }
    }

    pub fn allowed(&self) -> &BTreeSet<IntentCategory> {
        &self.allowed
    }

    pub fn filter(&self, decision: &IntentDecision, restricted_mode_active: bool) -> GateVerdict {
        let category = decision.category();
        if !restricted_mode_active || category.is_emergency() || self.allowed.contains(&category) {
            return GateVerdict::Allowed;
        }

        GateVerdict::Blocked {
            category,
            reason: format!("{} ({category})", self.blocked_message()),
        }
    }

    /// Arabic explanation naming what is still available in senior mode.
    pub fn blocked_message(&self) -> String {
        let options: Vec<&str> = self
            .allowed
            .iter()
            .filter_map(|category| allowed_phrase(*category))
            .collect();
        format!(
            "الأمر ده مش متاح في وضع كبار السن. تقدر {}.",
            join_arabic(&options)
        )
    }
}

fn allowed_phrase(category: IntentCategory) -> Option<&'static str> {
    match category {
        IntentCategory::CallContact => Some("تتصل بحد"),
        IntentCategory::SendMessage => Some("تبعت رسالة"),
        IntentCategory::SetAlarm => Some("تظبط منبه"),
        IntentCategory::ReadTime => Some("تسأل عن الساعة"),
        IntentCategory::ReadMissedCalls => Some("تسمع المكالمات الفايتة"),
        IntentCategory::MedicationReminder => Some("تظبط تذكير بالدوا"),
        IntentCategory::AddContact => Some("تضيف رقم"),
        IntentCategory::Emergency => Some("تطلب النجدة"),
        IntentCategory::Unknown => None,
    }
}

fn join_arabic(options: &[&str]) -> String {
    match options {
        [] => String::new(),
        [only] => (*only).to_string(),
        [rest @ .., last] => format!("{} أو {last}", rest.join(" أو ")),
    }
}
