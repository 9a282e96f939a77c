use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sanad_agents::{
    CapabilityError, EmergencyDispatcher, EmergencyNotifier, LocationProvider, SpeechCapability,
};
use sanad_core::{EscalationTrigger, GeoPoint};

/// Terminal stand-in for the device speech stack. Spoken text is printed and
/// every `listen` consumes the next scripted reply; an empty script is silence.
pub struct ConsoleSpeech {
    replies: Mutex<VecDeque<String>>,
}

impl ConsoleSpeech {
    pub fn new(replies: impl IntoIterator<Item = String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SpeechCapability for ConsoleSpeech {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CapabilityError> {
        String::from_utf8(audio.to_vec())
            .map_err(|_| CapabilityError::Failed("console audio must be utf-8 text".to_string()))
    }

    async fn speak(&self, text: &str) -> Result<(), CapabilityError> {
        println!("[speak] {text}");
        Ok(())
    }

    async fn listen(&self, max_wait: Duration) -> Result<Option<String>, CapabilityError> {
        let reply = self.replies.lock().pop_front();
        match &reply {
            Some(text) => println!("[listen] heard {text:?}"),
            None => println!("[listen] silence (waited up to {} ms)", max_wait.as_millis()),
        }
        Ok(reply)
    }
}

pub struct ConsoleDispatcher {
    contacts: Vec<String>,
}

impl ConsoleDispatcher {
    pub fn new(contacts: Vec<String>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl EmergencyDispatcher for ConsoleDispatcher {
    async fn dispatch(&self, trigger: EscalationTrigger) -> Result<(), CapabilityError> {
        if self.contacts.is_empty() {
            return Err(CapabilityError::Unavailable(
                "no guardian contacts configured".to_string(),
            ));
        }
        println!("[dispatch] {trigger:?} alert to {}", self.contacts.join(", "));
        Ok(())
    }

    async fn stand_down(&self) -> Result<(), CapabilityError> {
        println!("[dispatch] stand down");
        Ok(())
    }
}

pub struct ConsoleNotifier {
    contacts: Vec<String>,
}

impl ConsoleNotifier {
    pub fn new(contacts: Vec<String>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl EmergencyNotifier for ConsoleNotifier {
    async fn notify_emergency_contacts(&self, details: &str) -> Result<(), CapabilityError> {
        if self.contacts.is_empty() {
            return Err(CapabilityError::Unavailable(
                "no guardian contacts configured".to_string(),
            ));
        }
        for contact in &self.contacts {
            println!("[notify] {contact}: {details}");
        }
        Ok(())
    }
}

/// Fixed coordinates passed on the command line.
pub struct FixedLocation(pub GeoPoint);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn last_known_location(&self) -> Result<Option<GeoPoint>, CapabilityError> {
        Ok(Some(self.0))
    }
}
