use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sanad_core::{EscalationTrigger, GeoPoint};
use sanad_observability::AppMetrics;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capability failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SpeechCapability: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CapabilityError>;

    async fn speak(&self, text: &str) -> Result<(), CapabilityError>;

    /// Captures one spoken reply and returns its transcript, or `None` when the
    /// user stayed silent for `max_wait`.
    async fn listen(&self, max_wait: Duration) -> Result<Option<String>, CapabilityError>;
}

#[async_trait]
pub trait EmergencyDispatcher: Send + Sync {
    async fn dispatch(&self, trigger: EscalationTrigger) -> Result<(), CapabilityError>;

    async fn stand_down(&self) -> Result<(), CapabilityError>;
}

#[async_trait]
pub trait EmergencyNotifier: Send + Sync {
    async fn notify_emergency_contacts(&self, details: &str) -> Result<(), CapabilityError>;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// `Ok(None)` when no fix is known. Missing permission is an error the
    /// caller degrades to "no location".
    async fn last_known_location(&self) -> Result<Option<GeoPoint>, CapabilityError>;
}

/// Location provider for devices without location permission.
#[derive(Debug, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn last_known_location(&self) -> Result<Option<GeoPoint>, CapabilityError> {
        Ok(None)
    }
}

/// External collaborators the guardian runtime drives.
#[derive(Clone)]
pub struct Capabilities {
    pub speech: Arc<dyn SpeechCapability>,
    pub dispatcher: Arc<dyn EmergencyDispatcher>,
    pub notifier: Arc<dyn EmergencyNotifier>,
    pub location: Arc<dyn LocationProvider>,
}

/// Runs one capability call under `limit`. Failures and timeouts are logged,
/// counted and turned into `None`; they never reach the caller as errors.
pub async fn guarded<T, F>(
    capability: &'static str,
    limit: Duration,
    metrics: &AppMetrics,
    call: F,
) -> Option<T>
where
    F: Future<Output = Result<T, CapabilityError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            metrics.inc_capability_failure();
            warn!(capability, error = %err, "capability call failed");
            None
        }
        Err(_) => {
            metrics.inc_capability_failure();
            warn!(
                capability,
                timeout_ms = limit.as_millis() as u64,
                "capability call timed out"
            );
            None
        }
    }
}
