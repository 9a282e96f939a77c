mod prompt;
mod reply;

use async_trait::async_trait;
use sanad_core::{categorize_keywords, normalize, IntentCategory};
use thiserror::Error;

pub use prompt::{build_classification_prompt, PROMPT_LABELS};
pub use reply::{default_confidence, parse_model_reply, ModelOpinion, ReplyFormat};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
    #[error("model inference failed: {0}")]
    Inference(String),
}

/// Heavy intent model consulted when rule confidence is too low. Replies are
/// either a JSON object `{intent, entities, confidence}` or free text.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn infer(&self, prompt: &str, max_tokens: u32) -> Result<String, ModelError>;
}

/// Offline backend answering in free text from the keyword tables. Lets the
/// fallback path run end to end where no inference engine is wired in.
#[derive(Debug, Default)]
pub struct KeywordBackend;

#[async_trait]
impl ModelBackend for KeywordBackend {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn infer(&self, prompt: &str, _max_tokens: u32) -> Result<String, ModelError> {
        let command = prompt::command_from_prompt(prompt)
            .ok_or_else(|| ModelError::Inference("prompt carries no command".to_string()))?;
        let category = categorize_keywords(normalize(command).canonical());
        Ok(match category {
            IntentCategory::Unknown => "not sure".to_string(),
            category => format!("Intent: {}", category.as_code().to_uppercase()),
        })
    }
}
