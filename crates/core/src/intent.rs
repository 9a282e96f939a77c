use crate::models::{IntentCategory, NormalizedUtterance};

pub const EMERGENCY_CONFIDENCE: f32 = 0.95;
pub const UNKNOWN_CONFIDENCE: f32 = 0.3;

const EMERGENCY_KEYWORDS: &[&str] = &[
    "نجدة",
    "استغاثة",
    "استغاثه",
    "طوارئ",
    "إسعاف",
    "اسعاف",
    "الحقوني",
    "الحقني",
    "إلحقوني",
    "وقعت",
    "help",
    "emergency",
    "sos",
];

/// Checked in this order after the emergency check. First match wins.
const CATEGORY_RULES: &[(IntentCategory, f32, &[&str])] = &[
    (
        IntentCategory::CallContact,
        0.9,
        &["اتصل", "call", "ring", "dial"],
    ),
    (
        IntentCategory::SendMessage,
        0.85,
        &["أرسل", "رسالة", "واتساب", "مسج", "whatsapp", "message", "sms"],
    ),
    (
        IntentCategory::SetAlarm,
        0.85,
        &["ذكرني", "منبه", "المنبه", "alarm", "remind"],
    ),
    (
        IntentCategory::ReadTime,
        0.8,
        &["الساعة كام", "الساعه كام", "كام الساعة", "الوقت", "what time"],
    ),
    (
        IntentCategory::ReadMissedCalls,
        0.8,
        &["فايتة", "فايتات", "فايته", "المكالمات", "مكالمات", "missed"],
    ),
    (
        IntentCategory::MedicationReminder,
        0.75,
        &["دوا", "دواء", "علاج", "حباية", "برشام", "medicine", "medication"],
    ),
    (
        IntentCategory::AddContact,
        0.75,
        &["ضيف رقم", "احفظ رقم", "سجل رقم", "جهة اتصال جديدة", "add contact"],
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Keyword classification. The emergency check runs first and also looks
    /// at the raw text, so no normalization rule can hide a call for help.
    pub fn classify(&self, utterance: &NormalizedUtterance) -> (IntentCategory, f32) {
        let canonical = utterance.canonical().to_lowercase();

        if is_emergency_text(&canonical) || is_emergency_text(&utterance.raw().to_lowercase()) {
            return (IntentCategory::Emergency, EMERGENCY_CONFIDENCE);
        }

        CATEGORY_RULES
            .iter()
            .find(|(_, _, keywords)| contains_any(&canonical, keywords))
            .map(|(category, confidence, _)| (*category, *confidence))
            .unwrap_or((IntentCategory::Unknown, UNKNOWN_CONFIDENCE))
    }
}

pub fn is_emergency_text(text: &str) -> bool {
    contains_any(text, EMERGENCY_KEYWORDS)
}

/// Keyword scan used on free-text model output; no confidence attached.
pub fn categorize_keywords(text: &str) -> IntentCategory {
    let lower = text.to_lowercase();
    if is_emergency_text(&lower) {
        return IntentCategory::Emergency;
    }

    CATEGORY_RULES
        .iter()
        .find(|(_, _, keywords)| contains_any(&lower, keywords))
        .map(|(category, _, _)| *category)
        .unwrap_or(IntentCategory::Unknown)
}

fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}
