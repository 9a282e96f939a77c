use serde::{Deserialize, Serialize};

use crate::normalize::clean;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationResult {
    Confirmed,
    Denied,
    TimedOut,
}

/// Checked before the affirmatives: "مش كويس" must never read as "كويس".
const NEGATIVE_PHRASES: &[&str] = &[
    "مش كويس",
    "مش كويسة",
    "مش تمام",
    "مش بخير",
    "مش قادر",
    "مش قادرة",
    "لا",
    "لأ",
    "لاء",
    "تعبان",
    "تعبانة",
    "الحقوني",
    "الحقني",
    "نجدة",
    "وقعت",
    "بيوجعني",
    "no",
    "help",
    "not ok",
];

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "أنا كويس",
    "انا كويس",
    "كويس",
    "كويسة",
    "تمام",
    "أيوة",
    "ايوة",
    "أيوه",
    "ايوه",
    "الحمد لله",
    "الحمدلله",
    "نعم",
    "أكيد",
    "بخير",
    "yes",
    "ok",
    "okay",
    "fine",
];

/// Reads a spoken yes/no reply. Silence is `TimedOut`; anything that is not
/// clearly affirmative is `Denied`, so an unclear answer never stands the
/// escalation down.
pub fn classify_reply(reply: Option<&str>) -> ConfirmationResult {
    let Some(text) = reply.map(clean).filter(|text| !text.is_empty()) else {
        return ConfirmationResult::TimedOut;
    };
    let padded = format!(" {text} ");

    if has_phrase(&padded, NEGATIVE_PHRASES) {
        ConfirmationResult::Denied
    } else if has_phrase(&padded, AFFIRMATIVE_PHRASES) {
        ConfirmationResult::Confirmed
    } else {
        ConfirmationResult::Denied
    }
}

fn has_phrase(padded: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| padded.contains(&format!(" {phrase} ")))
}
