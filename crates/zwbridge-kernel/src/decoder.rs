//! [`ValueDecoder`] – label-keyed translation of device-bus value reports
//! into [`NormalizedEvent`]s.
//!
//! The decoder is a table from exact label text to a decode function,
//! assembled once in [`ValueDecoder::new`].  A label with no entry is not an
//! error: vendors report plenty of values the bridge does not understand
//! yet, and those reports are logged at `warn` and produce nothing.
//!
//! | Label | Topic | Published device | Payload |
//! |---|---|---|---|
//! | `Switch` | `ack` | mapped id | `command` on/off |
//! | `Sensor` | `sensor` | mapped id | `command` on/off |
//! | `Alarm Type` | `lock` | mapped id | `command` from the lock table (door-lock nodes only) |
//! | `Access Control` | `sensor` | mapped id | `command` open/closed (nodes without binary-sensor capability) |
//! | `Temperature` | `temp` | `temp.<suffix>` | `temp` in °C |
//! | `Luminance` | `lux` | `lux.<suffix>` | `lux` |
//! | `Battery Level` | `openzwave` | mapped id | `battery` |
//! | `Burglar` | `pir` | `pir.<suffix>` | `command` on, plus a deferred off |
//!
//! Decoding is pure: the deferred motion auto-off is returned as a
//! [`Deferred`] for the caller to arm on its timer set.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use zwbridge_types::{
    BridgeError, CapabilitySet, CommandClass, DeviceId, EventBody, NormalizedEvent, SemanticTopic,
    StateCommand, ValueReport,
};

use crate::codes::{self, BurglarEvent};

/// What the decoder knows about the reporting node.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub device: &'a DeviceId,
    pub capabilities: &'a CapabilitySet,
}

/// Follow-up work a decode asks the caller to schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Publish `off` for this (already remapped) device once the motion
    /// window elapses, unless another motion report re-arms it first.
    MotionOff(DeviceId),
}

/// Result of decoding one report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decoded {
    pub events: Vec<NormalizedEvent>,
    pub deferred: Option<Deferred>,
}

impl Decoded {
    pub fn none() -> Self {
        Self::default()
    }

    fn event(event: NormalizedEvent) -> Self {
        Self {
            events: vec![event],
            deferred: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.deferred.is_none()
    }
}

type DecodeFn = fn(&DecodeContext<'_>, &ValueReport) -> Result<Decoded, BridgeError>;

/// Label → decode function table.
pub struct ValueDecoder {
    table: HashMap<&'static str, DecodeFn>,
}

impl Default for ValueDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueDecoder {
    pub fn new() -> Self {
        let mut table: HashMap<&'static str, DecodeFn> = HashMap::new();
        table.insert("Switch", decode_switch);
        table.insert("Sensor", decode_sensor);
        table.insert("Alarm Type", decode_alarm_type);
        table.insert("Access Control", decode_access_control);
        table.insert("Temperature", decode_temperature);
        table.insert("Luminance", decode_luminance);
        table.insert("Battery Level", decode_battery_level);
        table.insert("Burglar", decode_burglar);
        Self { table }
    }

    /// Whether `label` has a decoder.
    pub fn knows(&self, label: &str) -> bool {
        self.table.contains_key(label)
    }

    /// Decode `report` for the device described by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unrecognized`] when a known label carries a
    /// code outside its table or a payload of the wrong shape.  Unknown
    /// labels are `Ok` with nothing decoded.
    pub fn decode(
        &self,
        ctx: &DecodeContext<'_>,
        report: &ValueReport,
    ) -> Result<Decoded, BridgeError> {
        match self.table.get(report.label.as_str()) {
            Some(decode) => decode(ctx, report),
            None => {
                warn!(label = %report.label, "Unrecognized label, report ignored");
                Ok(Decoded::none())
            }
        }
    }

    /// Decode a basic-set node event: 255 is on, anything else off.
    pub fn decode_basic(device: &DeviceId, value: i64) -> NormalizedEvent {
        let state = StateCommand::from(value == 255);
        info!(state = state.as_str(), "Basic sensor update");
        NormalizedEvent::state(SemanticTopic::Sensor, device.clone(), state)
    }
}

fn code_of(report: &ValueReport) -> Result<i64, BridgeError> {
    report.payload.as_code().ok_or_else(|| {
        BridgeError::Unrecognized(format!(
            "{} payload {} is not a code",
            report.label, report.payload
        ))
    })
}

fn decode_switch(ctx: &DecodeContext<'_>, report: &ValueReport) -> Result<Decoded, BridgeError> {
    let state = StateCommand::from(report.payload.as_bool());
    info!(state = state.as_str(), "Switch update");
    Ok(Decoded::event(NormalizedEvent::state(
        SemanticTopic::Ack,
        ctx.device.clone(),
        state,
    )))
}

fn decode_sensor(ctx: &DecodeContext<'_>, report: &ValueReport) -> Result<Decoded, BridgeError> {
    let state = StateCommand::from(report.payload.as_bool());
    info!(state = state.as_str(), "Sensor update");
    Ok(Decoded::event(NormalizedEvent::state(
        SemanticTopic::Sensor,
        ctx.device.clone(),
        state,
    )))
}

fn decode_alarm_type(
    ctx: &DecodeContext<'_>,
    report: &ValueReport,
) -> Result<Decoded, BridgeError> {
    // Alarm Type only means lock state on door locks.
    if !ctx.capabilities.contains(&CommandClass::DoorLock) {
        return Ok(Decoded::none());
    }
    let code = code_of(report)?;
    let alarm = codes::lock_alarm(code)
        .ok_or_else(|| BridgeError::Unrecognized(format!("Lock update unknown: {code}")))?;
    info!(code, "Lock update: {}", alarm.description);
    Ok(match alarm.state {
        Some(state) => Decoded::event(NormalizedEvent::state(
            SemanticTopic::Lock,
            ctx.device.clone(),
            state,
        )),
        None => Decoded::none(),
    })
}

fn decode_access_control(
    ctx: &DecodeContext<'_>,
    report: &ValueReport,
) -> Result<Decoded, BridgeError> {
    // Nodes with a binary sensor already report open/close through `Sensor`.
    if ctx.capabilities.contains(&CommandClass::SensorBinary) {
        return Ok(Decoded::none());
    }
    let code = code_of(report)?;
    let (description, state) = codes::access_control(code)
        .ok_or_else(|| BridgeError::Unrecognized(format!("Access control unknown: {code}")))?;
    info!(state = state.as_str(), "Access control update: {description}");
    Ok(Decoded::event(NormalizedEvent::state(
        SemanticTopic::Sensor,
        ctx.device.clone(),
        state,
    )))
}

/// Convert a temperature reading to Celsius. Only `"F"` is converted; any
/// other unit (or none) is taken as Celsius already.
pub fn to_celsius(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some("F") => (value - 32.0) * 5.0 / 9.0,
        _ => value,
    }
}

fn decode_temperature(
    ctx: &DecodeContext<'_>,
    report: &ValueReport,
) -> Result<Decoded, BridgeError> {
    let celsius = to_celsius(report.payload.as_f64(), report.unit.as_deref());
    debug!("Temperature: {celsius:.1}C");
    Ok(Decoded::event(NormalizedEvent::new(
        SemanticTopic::Temp,
        ctx.device.in_namespace("temp"),
        EventBody::Temperature(celsius),
    )))
}

fn decode_luminance(
    ctx: &DecodeContext<'_>,
    report: &ValueReport,
) -> Result<Decoded, BridgeError> {
    Ok(Decoded::event(NormalizedEvent::new(
        SemanticTopic::Lux,
        ctx.device.in_namespace("lux"),
        EventBody::Illuminance(report.payload.clone()),
    )))
}

fn decode_battery_level(
    ctx: &DecodeContext<'_>,
    report: &ValueReport,
) -> Result<Decoded, BridgeError> {
    Ok(Decoded::event(NormalizedEvent::new(
        SemanticTopic::Openzwave,
        ctx.device.clone(),
        EventBody::BatteryLevel(report.payload.clone()),
    )))
}

fn decode_burglar(ctx: &DecodeContext<'_>, report: &ValueReport) -> Result<Decoded, BridgeError> {
    let code = code_of(report)?;
    let event = BurglarEvent::from_code(code)
        .ok_or_else(|| BridgeError::Unrecognized(format!("Burglar unknown: {code}")))?;
    info!("motion update: {}", event.description());

    match event {
        BurglarEvent::Motion => {
            let pir = ctx.device.in_namespace("pir");
            Ok(Decoded {
                events: vec![NormalizedEvent::state(
                    SemanticTopic::Pir,
                    pir.clone(),
                    StateCommand::On,
                )],
                deferred: Some(Deferred::MotionOff(pir)),
            })
        }
        BurglarEvent::RemovedFromWall => Ok(Decoded::none()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use zwbridge_types::{NodeId, Payload};

    fn lock_caps() -> CapabilitySet {
        ["COMMAND_CLASS_DOOR_LOCK", "COMMAND_CLASS_ALARM"].into_iter().collect()
    }

    fn sensor_caps() -> CapabilitySet {
        ["COMMAND_CLASS_SENSOR_BINARY", "COMMAND_CLASS_ALARM"].into_iter().collect()
    }

    fn decode(
        device: &str,
        caps: &CapabilitySet,
        report: ValueReport,
    ) -> Result<Decoded, BridgeError> {
        let device = DeviceId::from(device);
        let ctx = DecodeContext {
            device: &device,
            capabilities: caps,
        };
        ValueDecoder::new().decode(&ctx, &report)
    }

    fn report(label: &str, payload: Payload) -> ValueReport {
        ValueReport::new(NodeId(1), label, payload)
    }

    fn only_event(decoded: Decoded) -> NormalizedEvent {
        assert_eq!(decoded.events.len(), 1, "{decoded:?}");
        decoded.events.into_iter().next().unwrap()
    }

    #[test]
    fn unknown_label_is_a_noop() {
        let report = report("Power Level", Payload::Int(3));
        let decoded = decode("sensor.x", &sensor_caps(), report).unwrap();
        assert!(decoded.is_empty());
        assert!(!ValueDecoder::new().knows("Power Level"));
    }

    /// Collects formatted log output for one test.
    #[derive(Clone, Default)]
    struct LogSink(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unknown_label_is_logged_at_warn() {
        let sink = LogSink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let report = report("Power Level", Payload::Int(3));
            let decoded = decode("sensor.x", &sensor_caps(), report).unwrap();
            assert!(decoded.is_empty());
        });

        let output = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("Power Level"), "{output}");
    }

    #[test]
    fn switch_passes_boolean_through() {
        let decoded =
            decode("switch.fan", &CapabilitySet::new(), report("Switch", Payload::Bool(true)));
        let event = only_event(decoded.unwrap());
        assert_eq!(event.topic, SemanticTopic::Ack);
        assert_eq!(event.device.as_str(), "switch.fan");
        assert_eq!(event.body, EventBody::Command(StateCommand::On));
    }

    #[test]
    fn sensor_passes_boolean_through() {
        let event = only_event(
            decode("door.back", &sensor_caps(), report("Sensor", Payload::Bool(false))).unwrap(),
        );
        assert_eq!(event.topic, SemanticTopic::Sensor);
        assert_eq!(event.body, EventBody::Command(StateCommand::Off));
    }

    #[test]
    fn alarm_type_19_on_lock_is_on() {
        let event = only_event(
            decode("lock.front", &lock_caps(), report("Alarm Type", Payload::Int(19))).unwrap(),
        );
        assert_eq!(event.topic, SemanticTopic::Lock);
        assert_eq!(event.device.as_str(), "lock.front");
        assert_eq!(event.body, EventBody::Command(StateCommand::On));
    }

    #[test]
    fn alarm_type_without_door_lock_capability_is_ignored() {
        let decoded =
            decode("sensor.hall", &sensor_caps(), report("Alarm Type", Payload::Int(19))).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn alarm_type_unknown_code_is_unrecognized() {
        let result = decode("lock.front", &lock_caps(), report("Alarm Type", Payload::Int(250)));
        assert!(matches!(result, Err(BridgeError::Unrecognized(_))));
    }

    #[test]
    fn alarm_type_informational_code_publishes_nothing() {
        let decoded =
            decode("lock.front", &lock_caps(), report("Alarm Type", Payload::Int(161))).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn alarm_type_jammed_and_battery() {
        let jammed = decode("lock.front", &lock_caps(), report("Alarm Type", Payload::Int(9)));
        assert_eq!(only_event(jammed.unwrap()).body, EventBody::Command(StateCommand::Jammed));
        let battery = decode("lock.front", &lock_caps(), report("Alarm Type", Payload::Int(168)));
        let battery = only_event(battery.unwrap());
        assert_eq!(battery.body, EventBody::Command(StateCommand::Battery));
    }

    #[test]
    fn access_control_on_sensorless_node() {
        let caps: CapabilitySet = ["COMMAND_CLASS_ALARM"].into_iter().collect();
        let decoded = decode("door.garage", &caps, report("Access Control", Payload::Int(22)));
        let event = only_event(decoded.unwrap());
        assert_eq!(event.topic, SemanticTopic::Sensor);
        assert_eq!(event.body, EventBody::Command(StateCommand::On));

        let unknown = decode("door.garage", &caps, report("Access Control", Payload::Int(5)));
        assert!(matches!(unknown, Err(BridgeError::Unrecognized(_))));
    }

    #[test]
    fn access_control_skipped_when_node_has_binary_sensor() {
        let report = report("Access Control", Payload::Int(22));
        let decoded = decode("door.back", &sensor_caps(), report).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn temperature_fahrenheit_is_converted_and_remapped() {
        let event = only_event(
            decode(
                "multi.kitchen",
                &CapabilitySet::new(),
                report("Temperature", Payload::Float(98.6)).with_unit("F"),
            )
            .unwrap(),
        );
        assert_eq!(event.topic, SemanticTopic::Temp);
        assert_eq!(event.device.as_str(), "temp.kitchen");
        match event.body {
            EventBody::Temperature(c) => assert!((c - 37.0).abs() < 1e-6, "got {c}"),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn temperature_celsius_passes_through() {
        assert!((to_celsius(20.0, Some("C")) - 20.0).abs() < f64::EPSILON);
        assert!((to_celsius(20.0, None) - 20.0).abs() < f64::EPSILON);
        assert!((to_celsius(32.0, Some("F"))).abs() < f64::EPSILON);
    }

    #[test]
    fn luminance_is_remapped_to_lux_namespace() {
        let report = report("Luminance", Payload::Float(16.0));
        let event = only_event(decode("multi.kitchen", &CapabilitySet::new(), report).unwrap());
        assert_eq!(event.topic, SemanticTopic::Lux);
        assert_eq!(event.device.as_str(), "lux.kitchen");
        assert_eq!(event.body, EventBody::Illuminance(Payload::Float(16.0)));
    }

    #[test]
    fn battery_level_keeps_device_id() {
        let report = report("Battery Level", Payload::Int(100));
        let event = only_event(decode("multi.kitchen", &CapabilitySet::new(), report).unwrap());
        assert_eq!(event.topic, SemanticTopic::Openzwave);
        assert_eq!(event.device.as_str(), "multi.kitchen");
        assert_eq!(event.body, EventBody::BatteryLevel(Payload::Int(100)));
    }

    #[test]
    fn motion_emits_on_and_defers_off() {
        let report = report("Burglar", Payload::Int(8));
        let decoded = decode("multi.hall", &CapabilitySet::new(), report).unwrap();
        assert_eq!(decoded.deferred, Some(Deferred::MotionOff("pir.hall".into())));
        let event = only_event(decoded);
        assert_eq!(event.topic, SemanticTopic::Pir);
        assert_eq!(event.device.as_str(), "pir.hall");
        assert_eq!(event.body, EventBody::Command(StateCommand::On));
    }

    #[test]
    fn burglar_tamper_is_logged_only() {
        let tamper = report("Burglar", Payload::Int(3));
        assert!(decode("multi.hall", &CapabilitySet::new(), tamper).unwrap().is_empty());
        let unknown = report("Burglar", Payload::Int(0));
        let unknown = decode("multi.hall", &CapabilitySet::new(), unknown);
        assert!(matches!(unknown, Err(BridgeError::Unrecognized(_))));
    }

    #[test]
    fn basic_event_255_is_on() {
        let device = DeviceId::from("sensor.porch");
        let on = ValueDecoder::decode_basic(&device, 255);
        assert_eq!(on.body, EventBody::Command(StateCommand::On));
        assert_eq!(on.topic, SemanticTopic::Sensor);
        let off = ValueDecoder::decode_basic(&device, 0);
        assert_eq!(off.body, EventBody::Command(StateCommand::Off));
    }
}
