pub mod config;
pub mod confirmation;
pub mod escalation;
pub mod fall;
pub mod gate;
pub mod intent;
pub mod models;
pub mod normalize;
pub mod schedule;

pub use config::{env_pairs, ConfigError, EngineConfig, MAX_WINDOW_MS};
pub use confirmation::{classify_reply, ConfirmationResult};
pub use escalation::{
    compose_alert_details, EscalationConfig, EscalationController, EscalationEffect, ListenPurpose,
};
pub use fall::{FallConfig, FallMonitor, FallTimer, FallTransition};
pub use gate::{GateVerdict, SeniorGate};
pub use intent::{categorize_keywords, is_emergency_text, RuleClassifier};
pub use models::*;
pub use normalize::{
    extract_contact_name, extract_medication, extract_message, extract_time_expression, normalize,
    normalize_contact_name,
};
pub use schedule::DeadlineQueue;
