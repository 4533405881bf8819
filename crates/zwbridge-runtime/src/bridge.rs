//! [`Bridge`] – the event reactor.
//!
//! Two sources drive the bridge: device-bus events (value reports, node
//! notifications) and inbound message-bus traffic (configuration documents
//! and commands).  Both are serialized through one exclusion domain that
//! covers the [`DeviceRegistry`] and the timer set, so a reconfiguration can
//! never interleave with a decode or a dispatch, and timer callbacks take the
//! same lock before they touch either.
//!
//! # Timers
//!
//! | Key | Armed by | Fires after | Action |
//! |---|---|---|---|
//! | [`TimerKey::MotionOff`] | motion report | `motion_off` (60 s) | publish `off` on `pir` |
//! | [`TimerKey::Repeat`] | successful command | `repeat_delay` (5 s) | re-issue the write, up to `max_repeats` times |
//!
//! Any value report from a mapped node cancels that device's pending repeat:
//! the device has spoken, which is the only confirmation the mesh gives.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{Span, debug, info, warn};
use zwbridge_hal::{CommandDispatcher, DeviceBus, DeviceBusEvent, DeviceRegistry, NodeInfo};
use zwbridge_kernel::{DecodeContext, Deferred, TimerSet, TimerToken, ValueDecoder};
use zwbridge_middleware::{EventPublisher, InboundMessage};
use zwbridge_types::{
    BridgeError, CommandIntent, DeviceId, NodeId, SemanticTopic, StateCommand, ValueReport,
    WriteRequest,
};

use crate::inbound::{self, Inbound};

/// Timing knobs for the two timer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    pub motion_off: Duration,
    pub repeat_delay: Duration,
    /// How many times a command write is re-issued.  `0` disables repeats.
    pub max_repeats: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            motion_off: Duration::from_secs(60),
            repeat_delay: Duration::from_secs(5),
            max_repeats: 1,
        }
    }
}

/// Timer slots.  Motion and repeat timers for the same device never share
/// a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Repeat(DeviceId),
    MotionOff(DeviceId),
}

struct BridgeState {
    registry: DeviceRegistry,
    timers: TimerSet<TimerKey>,
    ready: BTreeSet<NodeId>,
    accepting: bool,
}

struct Inner {
    state: Mutex<BridgeState>,
    decoder: ValueDecoder,
    device_bus: Arc<dyn DeviceBus>,
    publisher: EventPublisher,
    settings: BridgeSettings,
}

/// Cheaply cloneable handle to the bridge engine.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    /// Create a bridge mapping `<protocol>.<node>` sources, with an empty
    /// device mapping until the first configuration arrives.
    pub fn new(
        protocol: impl Into<String>,
        device_bus: Arc<dyn DeviceBus>,
        publisher: EventPublisher,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BridgeState {
                    registry: DeviceRegistry::new(protocol),
                    timers: TimerSet::new(),
                    ready: BTreeSet::new(),
                    accepting: true,
                }),
                decoder: ValueDecoder::new(),
                device_bus,
                publisher,
                settings,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.inner.publisher
    }

    pub fn settings(&self) -> BridgeSettings {
        self.inner.settings
    }

    // ── Reactor ─────────────────────────────────────────────────────────────

    /// Drive the bridge until `shutdown` flips to `true` (or its sender is
    /// dropped), or both event sources close.
    pub async fn run(
        &self,
        mut device_events: mpsc::UnboundedReceiver<DeviceBusEvent>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("bridge running");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = device_events.recv() => self.handle_device_event(event),
                Some(message) = inbound.recv() => self.handle_inbound(&message),
                else => break,
            }
        }
        info!("bridge loop stopped");
    }

    /// Stop accepting events, cancel every pending timer, and stop the
    /// device bus.  Returns how many timers were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = {
            let mut state = self.state();
            state.accepting = false;
            state.timers.cancel_all()
        };
        self.inner.device_bus.stop();
        info!(cancelled, "bridge stopped");
        cancelled
    }

    // ── Device-bus side ─────────────────────────────────────────────────────

    pub fn handle_device_event(&self, event: DeviceBusEvent) {
        let mut state = self.state();
        if !state.accepting {
            debug!("bridge stopped, device event dropped");
            return;
        }
        match event {
            DeviceBusEvent::Value(report) => self.on_value(&mut state, &report),
            DeviceBusEvent::NodeEvent { node, value } => self.on_node_event(&state, node, value),
            DeviceBusEvent::NodeReady(info) => on_node_ready(&mut state, info),
        }
    }

    fn on_value(&self, state: &mut BridgeState, report: &ValueReport) {
        let mapping = state.registry.current();
        let span = mapping.routes().route(report.node).clone();
        let _enter = span.enter();

        let Some(device) = mapping.device_for(report.node) else {
            warn!(node = report.node.0, label = %report.label, "report from unmapped node");
            return;
        };
        if state.timers.cancel(&TimerKey::Repeat(device.clone())) {
            debug!("device reported, pending repeat cancelled");
        }

        let capabilities = self
            .inner
            .device_bus
            .capabilities(report.node)
            .unwrap_or_default();
        let ctx = DecodeContext {
            device,
            capabilities: &capabilities,
        };
        match self.inner.decoder.decode(&ctx, report) {
            Ok(decoded) => {
                for event in decoded.events {
                    self.inner.publisher.publish(event);
                }
                if let Some(Deferred::MotionOff(pir)) = decoded.deferred {
                    self.arm_motion_off(state, pir, span.clone());
                }
            }
            Err(e) => warn!(label = %report.label, "{e}"),
        }
    }

    fn on_node_event(&self, state: &BridgeState, node: NodeId, value: i64) {
        let mapping = state.registry.current();
        let _enter = mapping.routes().route(node).enter();
        match mapping.device_for(node) {
            Some(device) => self
                .inner
                .publisher
                .publish(ValueDecoder::decode_basic(device, value)),
            None => warn!(node = node.0, value, "node event from unmapped node"),
        }
    }

    fn arm_motion_off(&self, state: &mut BridgeState, device: DeviceId, span: Span) {
        let key = TimerKey::MotionOff(device);
        let fire_key = key.clone();
        let bridge = self.clone();
        state
            .timers
            .arm(key, self.inner.settings.motion_off, move |token| async move {
                bridge.fire_motion_off(&fire_key, token, &span);
            });
    }

    fn fire_motion_off(&self, key: &TimerKey, token: TimerToken, span: &Span) {
        let _enter = span.enter();
        let mut state = self.state();
        if !state.timers.claim(key, token) {
            return;
        }
        if let TimerKey::MotionOff(device) = key {
            info!(device = %device, "motion cleared");
            self.inner
                .publisher
                .publish_state(SemanticTopic::Pir, device.clone(), StateCommand::Off);
        }
    }

    // ── Message-bus side ────────────────────────────────────────────────────

    /// Classify and act on one inbound message.  Every failure is logged and
    /// the message dropped.
    pub fn handle_inbound(&self, message: &InboundMessage) {
        if !self.state().accepting {
            debug!(topic = %message.topic, "bridge stopped, message dropped");
            return;
        }
        match inbound::parse(message) {
            Ok(Inbound::Config(doc)) => {
                if let Err(e) = self.load_config(&doc) {
                    warn!(topic = %message.topic, "{e}");
                }
            }
            Ok(Inbound::Command(intent)) => {
                info!(device = %intent.device, desired = ?intent.desired, "Command received");
                if let Err(e) = self.command(&intent) {
                    warn!(device = %intent.device, "{e}");
                }
            }
            Err(e) => warn!(topic = %message.topic, "{e}"),
        }
    }

    /// Replace the device mapping.  See [`DeviceRegistry::load_config`].
    pub fn load_config(&self, doc: &Value) -> Result<Vec<BridgeError>, BridgeError> {
        self.state().registry.load_config(doc)
    }

    /// Dispatch `intent` and arm its repeat.
    ///
    /// # Errors
    ///
    /// Whatever [`CommandDispatcher::dispatch`] reports; no timer is armed
    /// in that case.
    pub fn command(&self, intent: &CommandIntent) -> Result<WriteRequest, BridgeError> {
        let mut state = self.state();
        let mapping = state.registry.current();
        let request =
            CommandDispatcher::dispatch(&mapping, self.inner.device_bus.as_ref(), intent)?;
        let span = mapping.routes().route(request.node).clone();
        self.arm_repeat(
            &mut state,
            intent.device.clone(),
            request.clone(),
            self.inner.settings.max_repeats,
            span,
        );
        Ok(request)
    }

    fn arm_repeat(
        &self,
        state: &mut BridgeState,
        device: DeviceId,
        request: WriteRequest,
        remaining: u32,
        span: Span,
    ) {
        let key = TimerKey::Repeat(device);
        if remaining == 0 {
            state.timers.cancel(&key);
            return;
        }
        let fire_key = key.clone();
        let bridge = self.clone();
        state
            .timers
            .arm(key, self.inner.settings.repeat_delay, move |token| async move {
                bridge.fire_repeat(&fire_key, token, request, remaining, span);
            });
    }

    fn fire_repeat(
        &self,
        key: &TimerKey,
        token: TimerToken,
        request: WriteRequest,
        remaining: u32,
        span: Span,
    ) {
        let mut state = self.state();
        if !state.timers.claim(key, token) {
            return;
        }
        let TimerKey::Repeat(device) = key else {
            return;
        };
        let _enter = span.enter();
        if state.registry.lookup_node(device) != Some(request.node) {
            debug!("mapping changed since the command, repeat dropped");
            return;
        }
        info!(label = %request.label, value = %request.value, "re-asserting write");
        if let Err(e) = self.inner.device_bus.write(request.clone()) {
            warn!("repeat write failed: {e}");
            return;
        }
        self.arm_repeat(&mut state, device.clone(), request, remaining - 1, span.clone());
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    pub fn lookup_node(&self, device: &DeviceId) -> Option<NodeId> {
        self.state().registry.lookup_node(device)
    }

    pub fn lookup_device(&self, node: NodeId) -> Option<DeviceId> {
        self.state().registry.lookup_device(node)
    }

    pub fn generation(&self) -> u64 {
        self.state().registry.current().generation()
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.state().timers.is_armed(key)
    }

    pub fn pending_timers(&self) -> usize {
        self.state().timers.len()
    }

    pub fn is_ready(&self, node: NodeId) -> bool {
        self.state().ready.contains(&node)
    }
}

fn on_node_ready(state: &mut BridgeState, info: NodeInfo) {
    let mapping = state.registry.current();
    let _enter = mapping.routes().route(info.node).enter();
    let classes: Vec<&str> = info.capabilities.iter().map(|c| c.as_str()).collect();
    info!(
        product = %info.product,
        manufacturer = %info.manufacturer,
        "Node ready"
    );
    info!("- command classes: {}", classes.join(", "));
    state.ready.insert(info.node);
}
