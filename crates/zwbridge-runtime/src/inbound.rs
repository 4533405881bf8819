//! Classification of inbound message-bus traffic.
//!
//! A payload that starts with `---` is a YAML document; anything else is
//! JSON.  The semantic topic comes from the payload's own `topic` field when
//! it has one, otherwise from the second segment of the message topic
//! (`gohome/command/lock.front` → `command`).

use serde_json::Value;
use zwbridge_middleware::InboundMessage;
use zwbridge_types::{BridgeError, CommandIntent, DesiredState, DeviceId};

const YAML_MARKER: &[u8] = b"---";

/// What an inbound message asks the bridge to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A full device-mapping document.
    Config(Value),
    Command(CommandIntent),
}

/// Decode `payload` into a JSON value, whichever syntax it was written in.
pub fn parse_document(payload: &[u8]) -> Result<Value, BridgeError> {
    if payload.starts_with(YAML_MARKER) {
        serde_yaml::from_slice(payload)
            .map_err(|e| BridgeError::Unrecognized(format!("invalid YAML payload: {e}")))
    } else {
        serde_json::from_slice(payload)
            .map_err(|e| BridgeError::Unrecognized(format!("invalid JSON payload: {e}")))
    }
}

/// Classify `message`.
///
/// # Errors
///
/// Returns [`BridgeError::Unrecognized`] for unparseable payloads, unknown
/// semantic topics, and commands missing `device` or `command`.
pub fn parse(message: &InboundMessage) -> Result<Inbound, BridgeError> {
    let doc = parse_document(&message.payload)?;

    let topic = match doc.get("topic").and_then(Value::as_str) {
        Some(topic) => topic.to_string(),
        None => message
            .topic
            .split('/')
            .nth(1)
            .unwrap_or_default()
            .to_string(),
    };

    match topic.as_str() {
        "config" => Ok(Inbound::Config(doc)),
        "command" => {
            let device = string_field(&doc, "device")?;
            let command = string_field(&doc, "command")?;
            Ok(Inbound::Command(CommandIntent {
                device: DeviceId::new(device),
                desired: DesiredState::from_command(command),
            }))
        }
        other => Err(BridgeError::Unrecognized(format!(
            "unknown topic '{other}' on {}",
            message.topic
        ))),
    }
}

fn string_field<'a>(doc: &'a Value, field: &str) -> Result<&'a str, BridgeError> {
    doc.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Unrecognized(format!("command without '{field}'")))
}
