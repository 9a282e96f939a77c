use std::time::Duration;

use sanad_core::{classify_reply, ConfirmationResult};
use sanad_observability::AppMetrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::{guarded, SpeechCapability};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Heard(String),
    Silent,
    Cancelled,
}

/// Speaks `prompt`, then waits until `deadline` for one reply. Cancelling the
/// token ends the wait at once with `Cancelled`. A failed or hung speech
/// capability counts as silence.
pub async fn listen_for_reply(
    speech: &dyn SpeechCapability,
    prompt: &str,
    deadline: Instant,
    speak_timeout: Duration,
    cancel: &CancellationToken,
    metrics: &AppMetrics,
) -> Reply {
    if cancel.is_cancelled() {
        return Reply::Cancelled;
    }

    tokio::select! {
        () = cancel.cancelled() => return Reply::Cancelled,
        _ = guarded("speech.speak", speak_timeout, metrics, speech.speak(prompt)) => {}
    }

    let window = deadline.saturating_duration_since(Instant::now());
    tokio::select! {
        () = cancel.cancelled() => Reply::Cancelled,
        heard = tokio::time::timeout_at(deadline, speech.listen(window)) => match heard {
            Ok(Ok(Some(text))) if !text.trim().is_empty() => Reply::Heard(text),
            Ok(Ok(_)) => Reply::Silent,
            Ok(Err(err)) => {
                metrics.inc_capability_failure();
                warn!(error = %err, "listening failed, treating as silence");
                Reply::Silent
            }
            Err(_) => {
                debug!(window_ms = window.as_millis() as u64, "no reply before deadline");
                Reply::Silent
            }
        },
    }
}

/// Yes/no round. `None` means the round was cancelled.
pub async fn wait_for_confirmation(
    speech: &dyn SpeechCapability,
    prompt: &str,
    deadline: Instant,
    speak_timeout: Duration,
    cancel: &CancellationToken,
    metrics: &AppMetrics,
) -> Option<ConfirmationResult> {
    match listen_for_reply(speech, prompt, deadline, speak_timeout, cancel, metrics).await {
        Reply::Heard(text) => Some(classify_reply(Some(&text))),
        Reply::Silent => Some(ConfirmationResult::TimedOut),
        Reply::Cancelled => None,
    }
}
