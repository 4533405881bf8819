use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier of a logical device as the outside world knows it,
/// e.g. `"lock.front"` or `"pir.hall"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The instance suffix: everything after the last `.`, or the whole id
    /// when it has no namespace.
    pub fn suffix(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Re-home this device under `namespace`, keeping the instance suffix.
    ///
    /// `"sensor.hall".in_namespace("pir")` → `"pir.hall"`.
    pub fn in_namespace(&self, namespace: &str) -> DeviceId {
        DeviceId(format!("{namespace}.{}", self.suffix()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier the device bus assigned to a physical radio node. Volatile:
/// re-pairing a device gives it a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw value carried by a device-bus report or write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Payload {
    /// Truthiness as the device bus reports it: non-zero numbers are `true`.
    pub fn as_bool(&self) -> bool {
        match *self {
            Payload::Bool(b) => b,
            Payload::Int(n) => n != 0,
            Payload::Float(x) => x != 0.0,
        }
    }

    /// Integer code, for labels whose payload is a lookup key. Floats are
    /// accepted only when they carry no fractional part.
    pub fn as_code(&self) -> Option<i64> {
        match *self {
            Payload::Int(n) => Some(n),
            Payload::Float(x) if x.fract() == 0.0 && x.is_finite() => Some(x as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Payload::Bool(b) => f64::from(u8::from(b)),
            Payload::Int(n) => n as f64,
            Payload::Float(x) => x,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bool(b) => write!(f, "{b}"),
            Payload::Int(n) => write!(f, "{n}"),
            Payload::Float(x) => write!(f, "{x}"),
        }
    }
}

/// A value change delivered by the device bus.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueReport {
    pub node: NodeId,
    /// Semantic kind of the value, e.g. `"Alarm Type"` or `"Temperature"`.
    pub label: String,
    pub payload: Payload,
    pub unit: Option<String>,
}

impl ValueReport {
    pub fn new(node: NodeId, label: impl Into<String>, payload: Payload) -> Self {
        Self {
            node,
            label: label.into(),
            payload,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Command classes a node may advertise. Only the ones the bridge acts on
/// get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandClass {
    Basic,
    DoorLock,
    SwitchBinary,
    SensorBinary,
    SensorMultilevel,
    Alarm,
    Battery,
    Other(String),
}

impl CommandClass {
    pub fn as_str(&self) -> &str {
        match self {
            CommandClass::Basic => "COMMAND_CLASS_BASIC",
            CommandClass::DoorLock => "COMMAND_CLASS_DOOR_LOCK",
            CommandClass::SwitchBinary => "COMMAND_CLASS_SWITCH_BINARY",
            CommandClass::SensorBinary => "COMMAND_CLASS_SENSOR_BINARY",
            CommandClass::SensorMultilevel => "COMMAND_CLASS_SENSOR_MULTILEVEL",
            CommandClass::Alarm => "COMMAND_CLASS_ALARM",
            CommandClass::Battery => "COMMAND_CLASS_BATTERY",
            CommandClass::Other(name) => name,
        }
    }
}

impl FromStr for CommandClass {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "COMMAND_CLASS_BASIC" => CommandClass::Basic,
            "COMMAND_CLASS_DOOR_LOCK" => CommandClass::DoorLock,
            "COMMAND_CLASS_SWITCH_BINARY" => CommandClass::SwitchBinary,
            "COMMAND_CLASS_SENSOR_BINARY" => CommandClass::SensorBinary,
            "COMMAND_CLASS_SENSOR_MULTILEVEL" => CommandClass::SensorMultilevel,
            "COMMAND_CLASS_ALARM" | "COMMAND_CLASS_NOTIFICATION" => CommandClass::Alarm,
            "COMMAND_CLASS_BATTERY" => CommandClass::Battery,
            other => CommandClass::Other(other.to_string()),
        })
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of command classes a node advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<CommandClass>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, class: &CommandClass) -> bool {
        self.0.contains(class)
    }

    pub fn insert(&mut self, class: CommandClass) {
        self.0.insert(class);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandClass> {
        self.0.iter()
    }
}

impl FromIterator<CommandClass> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CommandClass>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter()
            .map(|s| s.parse::<CommandClass>().unwrap_or_else(|never| match never {}))
            .collect()
    }
}

/// Desired state carried by an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    On,
    Off,
}

impl DesiredState {
    /// `"on"` means on; every other command word means off.
    pub fn from_command(command: &str) -> Self {
        if command == "on" {
            DesiredState::On
        } else {
            DesiredState::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == DesiredState::On
    }
}

/// A normalized inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandIntent {
    pub device: DeviceId,
    pub desired: DesiredState,
}

/// A write handed to the device bus.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub node: NodeId,
    pub label: String,
    pub value: Payload,
}

/// The state vocabulary published for switch, sensor, lock and motion
/// devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateCommand {
    On,
    Off,
    Jammed,
    Battery,
}

impl StateCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StateCommand::On => "on",
            StateCommand::Off => "off",
            StateCommand::Jammed => "jammed",
            StateCommand::Battery => "battery",
        }
    }
}

impl From<bool> for StateCommand {
    fn from(on: bool) -> Self {
        if on { StateCommand::On } else { StateCommand::Off }
    }
}

/// Second segment of every outbound topic: `<prefix>/<semantic>/<device>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticTopic {
    /// Switch state echoed back after a write.
    Ack,
    Sensor,
    Lock,
    Pir,
    Temp,
    Lux,
    /// Generic device-bus telemetry (battery level).
    Openzwave,
}

impl SemanticTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticTopic::Ack => "ack",
            SemanticTopic::Sensor => "sensor",
            SemanticTopic::Lock => "lock",
            SemanticTopic::Pir => "pir",
            SemanticTopic::Temp => "temp",
            SemanticTopic::Lux => "lux",
            SemanticTopic::Openzwave => "openzwave",
        }
    }
}

impl fmt::Display for SemanticTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event says: a state word or a typed measurement. Serialized
/// flattened into the outbound message under the field name shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventBody {
    #[serde(rename = "command")]
    Command(StateCommand),
    /// Degrees Celsius.
    #[serde(rename = "temp")]
    Temperature(f64),
    #[serde(rename = "lux")]
    Illuminance(Payload),
    /// Percent.
    #[serde(rename = "battery")]
    BatteryLevel(Payload),
}

/// The unit the bridge publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub topic: SemanticTopic,
    pub device: DeviceId,
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn state(topic: SemanticTopic, device: DeviceId, command: StateCommand) -> Self {
        Self::new(topic, device, EventBody::Command(command))
    }

    pub fn new(topic: SemanticTopic, device: DeviceId, body: EventBody) -> Self {
        use chrono::SubsecRound;
        Self {
            topic,
            device,
            body,
            timestamp: Utc::now().trunc_subsecs(3),
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS.mmm`, UTC.
pub mod timestamp_millis {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Every failure the bridge can detect. None of them are fatal to the
/// engine; the runtime logs them where they are detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Device not found: {0}")]
    NotFound(DeviceId),

    #[error("Unsupported device {device} (node {node}): no writable capability")]
    Unsupported { device: DeviceId, node: NodeId },

    #[error("Malformed config entry {entry}: {reason}")]
    ConfigMalformed { entry: String, reason: String },

    #[error("Unrecognized: {0}")]
    Unrecognized(String),

    #[error("Device bus error: {0}")]
    DeviceBus(String),

    #[error("Message bus error: {0}")]
    MessageBus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_namespace_remap_keeps_suffix() {
        let id = DeviceId::from("sensor.hall");
        assert_eq!(id.suffix(), "hall");
        assert_eq!(id.in_namespace("pir"), DeviceId::from("pir.hall"));

        let nested = DeviceId::from("house.upstairs.bedroom");
        assert_eq!(nested.in_namespace("temp").as_str(), "temp.bedroom");

        let bare = DeviceId::from("porch");
        assert_eq!(bare.in_namespace("lux").as_str(), "lux.porch");
    }

    #[test]
    fn payload_conversions() {
        assert!(Payload::Int(255).as_bool());
        assert!(!Payload::Int(0).as_bool());
        assert_eq!(Payload::Float(19.0).as_code(), Some(19));
        assert_eq!(Payload::Float(19.5).as_code(), None);
        assert_eq!(Payload::Bool(true).as_code(), None);
        assert!((Payload::Int(3).as_f64() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn command_class_parsing() {
        let caps: CapabilitySet = ["COMMAND_CLASS_DOOR_LOCK", "COMMAND_CLASS_VERSION"]
            .into_iter()
            .collect();
        assert!(caps.contains(&CommandClass::DoorLock));
        assert!(caps.contains(&CommandClass::Other("COMMAND_CLASS_VERSION".into())));
        assert!(!caps.contains(&CommandClass::SwitchBinary));
        assert_eq!(CommandClass::SwitchBinary.to_string(), "COMMAND_CLASS_SWITCH_BINARY");
    }

    #[test]
    fn desired_state_from_command_word() {
        assert_eq!(DesiredState::from_command("on"), DesiredState::On);
        assert_eq!(DesiredState::from_command("off"), DesiredState::Off);
        assert_eq!(DesiredState::from_command("toggle"), DesiredState::Off);
    }

    #[test]
    fn state_event_wire_shape() {
        let event = NormalizedEvent::state(
            SemanticTopic::Lock,
            DeviceId::from("lock.front"),
            StateCommand::Jammed,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["topic"], "lock");
        assert_eq!(value["device"], "lock.front");
        assert_eq!(value["command"], "jammed");
        assert!(value.get("temp").is_none());
    }

    #[test]
    fn measurement_event_roundtrip() {
        let event = NormalizedEvent::new(
            SemanticTopic::Openzwave,
            DeviceId::from("sensor.porch"),
            EventBody::BatteryLevel(Payload::Int(87)),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""battery":87"#), "{json}");
        let back: NormalizedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let event = NormalizedEvent::state(SemanticTopic::Pir, "pir.hall".into(), StateCommand::On);
        let stamp = timestamp_millis::format(&event.timestamp);
        // "YYYY-MM-DD HH:MM:SS.mmm"
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[10..11], " ");
        assert_eq!(&stamp[19..20], ".");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::NotFound("lock.back".into());
        assert!(err.to_string().contains("lock.back"));

        let err = BridgeError::Unsupported {
            device: "sensor.attic".into(),
            node: NodeId(7),
        };
        assert!(err.to_string().contains("node 7"));
    }
}
