pub const PROMPT_LABELS: [&str; 9] = [
    "CALL_CONTACT",
    "SEND_MESSAGE",
    "SET_ALARM",
    "READ_TIME",
    "READ_MISSED_CALLS",
    "EMERGENCY",
    "MEDICATION_REMINDER",
    "ADD_CONTACT",
    "UNKNOWN",
];

const COMMAND_OPEN: &str = "Command: \"";
const COMMAND_CLOSE: &str = "\". Response:";

pub fn build_classification_prompt(text: &str) -> String {
    format!(
        "Egyptian Arabic voice assistant. Classify the command into one of: {}. \
         Answer with JSON holding \"intent\", \"entities\" (contact, time, medication, message) \
         and \"confidence\" between 0 and 1. {COMMAND_OPEN}{}{COMMAND_CLOSE}",
        PROMPT_LABELS.join(", "),
        text.replace('"', "'"),
    )
}

pub(crate) fn command_from_prompt(prompt: &str) -> Option<&str> {
    let start = prompt.rfind(COMMAND_OPEN)? + COMMAND_OPEN.len();
    let end = prompt.rfind(COMMAND_CLOSE)?;
    prompt.get(start..end)
}
