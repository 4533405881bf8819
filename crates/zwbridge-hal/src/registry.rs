//! [`DeviceRegistry`] – the bijection between logical device ids and
//! device-bus node ids.
//!
//! The mapping is derived entirely from the configuration document that
//! arrives on the message bus:
//!
//! ```yaml
//! ---
//! devices:
//!   lock.front:
//!     source: zwave.5
//!   pir.hall:
//!     source: zwave.12
//!   light.porch:
//!     source: hue.3        # other protocol, ignored by this bridge
//! ```
//!
//! Each load builds a complete new [`DeviceMapping`] generation and swaps it
//! in wholesale.  Readers hold an `Arc` to the generation they started with,
//! so a lookup never sees a mix of old and new entries.
//!
//! Every generation also carries its own log routes: one `tracing` span per
//! mapped node, with a shared `bridge` span for nodes it does not know.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{Span, debug, info, info_span, warn};
use zwbridge_types::{BridgeError, DeviceId, NodeId};

/// Per-node log spans for one configuration generation.
#[derive(Debug)]
pub struct LogRoutes {
    spans: HashMap<NodeId, Span>,
    fallback: Span,
}

impl LogRoutes {
    fn new() -> Self {
        Self {
            spans: HashMap::new(),
            fallback: info_span!("bridge"),
        }
    }

    fn insert(&mut self, node: NodeId, device: &DeviceId) {
        self.spans
            .insert(node, info_span!("device", device = %device, node = node.0));
    }

    /// The span to log under for `node`; unknown nodes get the fallback.
    pub fn route(&self, node: NodeId) -> &Span {
        self.spans.get(&node).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &Span {
        &self.fallback
    }
}

/// One immutable configuration generation.
#[derive(Debug)]
pub struct DeviceMapping {
    generation: u64,
    node_to_device: HashMap<NodeId, DeviceId>,
    device_to_node: HashMap<DeviceId, NodeId>,
    routes: LogRoutes,
}

impl DeviceMapping {
    /// An empty generation, used before any configuration has arrived.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            node_to_device: HashMap::new(),
            device_to_node: HashMap::new(),
            routes: LogRoutes::new(),
        }
    }

    /// Build a generation from a configuration document.
    ///
    /// Only entries whose `source` is `"<protocol>.<node-id>"` are mapped.
    /// Entries without a `source`, or with another protocol, are skipped
    /// silently.  Entries that claim `protocol` but are otherwise unusable are
    /// skipped and reported in the returned issue list; the rest of the
    /// document still takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigMalformed`] only when the document has no
    /// `devices` mapping at all.
    pub fn from_config(
        doc: &Value,
        protocol: &str,
        generation: u64,
    ) -> Result<(Self, Vec<BridgeError>), BridgeError> {
        let devices = doc
            .get("devices")
            .and_then(Value::as_object)
            .ok_or_else(|| BridgeError::ConfigMalformed {
                entry: "devices".to_string(),
                reason: "document has no `devices` mapping".to_string(),
            })?;

        let prefix = format!("{protocol}.");
        let mut mapping = Self {
            generation,
            ..Self::empty()
        };
        let mut issues = Vec::new();

        // serde_json's map iterates in key order, so collisions resolve
        // deterministically: the first DeviceId wins.
        for (id, entry) in devices {
            let Some(source) = entry.get("source") else {
                continue;
            };
            let Some(source) = source.as_str() else {
                issues.push(BridgeError::ConfigMalformed {
                    entry: id.clone(),
                    reason: "`source` is not a string".to_string(),
                });
                continue;
            };
            let Some(raw_node) = source.strip_prefix(&prefix) else {
                continue;
            };
            let node = match raw_node.trim().parse::<u32>() {
                Ok(n) => NodeId(n),
                Err(_) => {
                    issues.push(BridgeError::ConfigMalformed {
                        entry: id.clone(),
                        reason: format!("`{source}` does not end in a node id"),
                    });
                    continue;
                }
            };
            if let Some(existing) = mapping.node_to_device.get(&node) {
                issues.push(BridgeError::ConfigMalformed {
                    entry: id.clone(),
                    reason: format!("node {node} already mapped to {existing}"),
                });
                continue;
            }

            let device = DeviceId::new(id.as_str());
            mapping.routes.insert(node, &device);
            mapping.device_to_node.insert(device.clone(), node);
            mapping.node_to_device.insert(node, device);
        }

        Ok((mapping, issues))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device_for(&self, node: NodeId) -> Option<&DeviceId> {
        self.node_to_device.get(&node)
    }

    pub fn node_for(&self, device: &DeviceId) -> Option<NodeId> {
        self.device_to_node.get(device).copied()
    }

    pub fn routes(&self) -> &LogRoutes {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.node_to_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_to_device.is_empty()
    }

    /// All `(node, device)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &DeviceId)> {
        self.node_to_device.iter().map(|(n, d)| (*n, d))
    }
}

/// Owner of the current [`DeviceMapping`] generation.
#[derive(Debug)]
pub struct DeviceRegistry {
    protocol: String,
    current: Arc<DeviceMapping>,
}

impl DeviceRegistry {
    /// Create an empty registry that maps `source` entries of `protocol`.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            current: Arc::new(DeviceMapping::empty()),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Replace the mapping with one built from `doc`.
    ///
    /// Malformed entries are logged at `warn` and skipped; they are also
    /// returned so callers can inspect them.  The new generation (and its log
    /// routes) replaces the old one atomically.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigMalformed`] when the document has no
    /// `devices` mapping; the previous generation stays in place.
    pub fn load_config(&mut self, doc: &Value) -> Result<Vec<BridgeError>, BridgeError> {
        let next = self.current.generation() + 1;
        let (mapping, issues) = DeviceMapping::from_config(doc, &self.protocol, next)?;
        for issue in &issues {
            warn!(error = %issue, "skipping config entry");
        }
        for (node, device) in mapping.iter() {
            debug!(node = node.0, device = %device, "mapped");
        }
        info!(
            generation = next,
            devices = mapping.len(),
            skipped = issues.len(),
            "Configured devices"
        );
        self.current = Arc::new(mapping);
        Ok(issues)
    }

    /// The current generation.  Hold the `Arc` for a consistent view.
    pub fn current(&self) -> Arc<DeviceMapping> {
        Arc::clone(&self.current)
    }

    pub fn lookup_device(&self, node: NodeId) -> Option<DeviceId> {
        self.current.device_for(node).cloned()
    }

    pub fn lookup_node(&self, device: &DeviceId) -> Option<NodeId> {
        self.current.node_for(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "devices": {
                "lock.front": { "source": "zwave.5", "name": "Front door" },
                "pir.hall": { "source": "zwave.12" },
                "light.porch": { "source": "hue.3" },
                "virtual.scene": { "name": "no source" }
            }
        })
    }

    #[test]
    fn lookups_are_mutual_inverses() {
        let mut registry = DeviceRegistry::new("zwave");
        let issues = registry.load_config(&sample_doc()).unwrap();
        assert!(issues.is_empty());

        let mapping = registry.current();
        assert_eq!(mapping.len(), 2);
        for (node, device) in mapping.iter() {
            assert_eq!(mapping.node_for(device), Some(node));
            assert_eq!(mapping.device_for(node), Some(device));
        }
        assert_eq!(registry.lookup_node(&"lock.front".into()), Some(NodeId(5)));
        assert_eq!(registry.lookup_device(NodeId(12)), Some("pir.hall".into()));
    }

    #[test]
    fn other_protocols_and_sourceless_entries_are_ignored() {
        let mut registry = DeviceRegistry::new("zwave");
        registry.load_config(&sample_doc()).unwrap();
        assert_eq!(registry.lookup_node(&"light.porch".into()), None);
        assert_eq!(registry.lookup_node(&"virtual.scene".into()), None);
        assert_eq!(registry.lookup_device(NodeId(3)), None);
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let doc = json!({
            "devices": {
                "lock.front": { "source": "zwave.five" },
                "switch.fan": { "source": "zwave.9" },
                "sensor.odd": { "source": 42 }
            }
        });
        let mut registry = DeviceRegistry::new("zwave");
        let issues = registry.load_config(&doc).unwrap();

        assert_eq!(issues.len(), 2);
        assert!(
            issues
                .iter()
                .all(|e| matches!(e, BridgeError::ConfigMalformed { .. }))
        );
        assert_eq!(registry.lookup_node(&"switch.fan".into()), Some(NodeId(9)));
        assert_eq!(registry.lookup_node(&"lock.front".into()), None);
    }

    #[test]
    fn duplicate_node_keeps_first_device_in_key_order() {
        let doc = json!({
            "devices": {
                "b.second": { "source": "zwave.4" },
                "a.first": { "source": "zwave.4" }
            }
        });
        let mut registry = DeviceRegistry::new("zwave");
        let issues = registry.load_config(&doc).unwrap();

        assert_eq!(issues.len(), 1);
        assert_eq!(registry.lookup_device(NodeId(4)), Some("a.first".into()));
        assert_eq!(registry.lookup_node(&"b.second".into()), None);
    }

    #[test]
    fn reload_replaces_whole_generation() {
        let mut registry = DeviceRegistry::new("zwave");
        registry.load_config(&sample_doc()).unwrap();
        let old = registry.current();

        registry
            .load_config(&json!({ "devices": { "switch.fan": { "source": "zwave.5" } } }))
            .unwrap();

        // The old generation is untouched for anyone still holding it.
        assert_eq!(old.generation(), 1);
        assert_eq!(old.device_for(NodeId(5)), Some(&"lock.front".into()));

        let new = registry.current();
        assert_eq!(new.generation(), 2);
        assert_eq!(new.device_for(NodeId(5)), Some(&"switch.fan".into()));
        assert_eq!(new.node_for(&"pir.hall".into()), None);
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn document_without_devices_keeps_previous_generation() {
        let mut registry = DeviceRegistry::new("zwave");
        registry.load_config(&sample_doc()).unwrap();

        let result = registry.load_config(&json!({ "rooms": [] }));
        assert!(matches!(result, Err(BridgeError::ConfigMalformed { .. })));
        assert_eq!(registry.current().generation(), 1);
        assert_eq!(registry.lookup_device(NodeId(5)), Some("lock.front".into()));
    }

    #[test]
    fn unknown_node_routes_to_fallback_span() {
        let mut registry = DeviceRegistry::new("zwave");
        registry.load_config(&sample_doc()).unwrap();
        let mapping = registry.current();
        let routes = mapping.routes();
        // Without a subscriber spans are disabled, so compare identity of the
        // fallback reference rather than metadata.
        assert!(std::ptr::eq(routes.route(NodeId(99)), routes.fallback()));
        assert!(!std::ptr::eq(routes.route(NodeId(5)), routes.fallback()));
    }

    #[test]
    fn node_dropped_by_reload_falls_back_to_bridge_span() {
        let mut registry = DeviceRegistry::new("zwave");
        registry
            .load_config(&json!({ "devices": { "switch.fan": { "source": "zwave.7" } } }))
            .unwrap();
        let first = registry.current();
        assert!(!std::ptr::eq(first.routes().route(NodeId(7)), first.routes().fallback()));

        registry
            .load_config(&json!({ "devices": { "lock.front": { "source": "zwave.5" } } }))
            .unwrap();
        let second = registry.current();
        assert!(std::ptr::eq(second.routes().route(NodeId(7)), second.routes().fallback()));
        assert!(!std::ptr::eq(second.routes().route(NodeId(5)), second.routes().fallback()));

        // The earlier generation still routes node 7 to its device span.
        assert!(!std::ptr::eq(first.routes().route(NodeId(7)), first.routes().fallback()));
    }
}
