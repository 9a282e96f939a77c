pub mod capabilities;
pub mod clock;
pub mod guardian;
pub mod listen;
pub mod orchestrator;
pub mod session;

pub use capabilities::{
    guarded, Capabilities, CapabilityError, EmergencyDispatcher, EmergencyNotifier,
    LocationProvider, NoLocation, SpeechCapability,
};
pub use clock::{Clock, MonotonicClock};
pub use guardian::{GuardianError, GuardianEvent, GuardianHandle, GuardianRuntime, GuardianSnapshot};
pub use listen::{listen_for_reply, wait_for_confirmation, Reply};
pub use orchestrator::HybridOrchestrator;
pub use session::{AgentSession, CommandOutcome, ASK_TO_REPEAT};
