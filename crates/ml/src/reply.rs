use std::collections::BTreeMap;

use sanad_core::{bound_confidence, categorize_keywords, IntentCategory, MAX_CONFIDENCE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const PLAIN_TEXT_PENALTY: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFormat {
    Json,
    PlainText,
}

/// What the model said, once parsed. `Unknown` is never an opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOpinion {
    pub category: IntentCategory,
    pub confidence: f32,
    pub entities: BTreeMap<String, String>,
    pub format: ReplyFormat,
}

/// Parses a model reply. JSON may be wrapped in chatter; anything that is not
/// valid JSON degrades to keyword extraction over the reply text. Returns
/// `None` when no category other than `Unknown` can be read.
pub fn parse_model_reply(reply: &str) -> Option<ModelOpinion> {
    let opinion = parse_json_reply(reply).or_else(|| parse_plain_reply(reply))?;
    if opinion.category == IntentCategory::Unknown {
        debug!(format = ?opinion.format, "model reply carried no usable intent");
        return None;
    }
    Some(opinion)
}

/// Heuristic score for replies that carry no confidence of their own.
pub fn default_confidence(reply: &str) -> f32 {
    let lower = reply.to_lowercase();
    let mut confidence = 0.7_f32;
    if ["call", "contact", "اتصل", "كلم"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        confidence += 0.15;
    }
    if !["unknown", "not sure", "غير معروف"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        confidence += 0.15;
    }
    confidence.min(MAX_CONFIDENCE)
}

fn parse_json_reply(reply: &str) -> Option<ModelOpinion> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = match serde_json::from_str(&reply[start..=end]) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "model reply is not valid json");
            return None;
        }
    };
    let object = value.as_object()?;

    let category = object
        .get("intent")
        .and_then(Value::as_str)
        .and_then(IntentCategory::parse_label)
        .unwrap_or(IntentCategory::Unknown);

    let entities = object
        .get("entities")
        .and_then(Value::as_object)
        .map(|entities| {
            entities
                .iter()
                .filter_map(|(key, value)| {
                    let text = match value {
                        Value::String(text) => text.trim().to_string(),
                        Value::Number(number) => number.to_string(),
                        _ => return None,
                    };
                    (!text.is_empty()).then(|| (entity_key(key).to_string(), text))
                })
                .collect()
        })
        .unwrap_or_default();

    let confidence = object
        .get("confidence")
        .and_then(|value| match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|score| score.is_finite())
        .map(|score| bound_confidence(score as f32))
        .unwrap_or_else(|| default_confidence(reply));

    Some(ModelOpinion {
        category,
        confidence,
        entities,
        format: ReplyFormat::Json,
    })
}

fn parse_plain_reply(reply: &str) -> Option<ModelOpinion> {
    let category = reply
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.contains('_') || token.chars().all(|c| c.is_ascii_uppercase()))
        .find_map(IntentCategory::parse_label)
        .unwrap_or_else(|| categorize_keywords(reply));

    Some(ModelOpinion {
        category,
        confidence: bound_confidence(default_confidence(reply) * PLAIN_TEXT_PENALTY),
        entities: BTreeMap::new(),
        format: ReplyFormat::PlainText,
    })
}

fn entity_key(key: &str) -> &str {
    match key {
        "person_name" | "person" | "name" | "contact_name" => "contact",
        "time_expression" | "when" => "time",
        "medicine" | "drug" => "medication",
        "text" | "body" => "message",
        other => other,
    }
}
