//! `ModuleConfig`: post-handshake state for a module — its normalized
//! config sets and the fulfillments bound to each requirement.

use std::collections::HashMap;

use ev_core::{Fulfillment, Value};
use serde_json::json;

use crate::error::{ModuleModelError, ModuleModelResult};
use crate::module::Module;

/// Post-handshake state: config values plus the concrete fulfillment for
/// each requirement, as returned by the manager's `say_hello`.
#[derive(Default)]
pub struct ModuleConfig {
    config_sets: Value,
    connections: HashMap<String, Vec<Fulfillment>>,
    setup_done: bool,
}

impl ModuleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_sets: json!({}),
            connections: HashMap::new(),
            setup_done: false,
        }
    }

    /// Populate this config from the manager's response to `say_hello`.
    ///
    /// `module_setup` is `{"config": {...}, "connections": {<req_id>: [{module_id, implementation_id}, ...]}}`.
    /// Validates `min_connections <= |connections[req_id]| <= max_connections`
    /// for every requirement declared by `module`, and rejects fulfillment
    /// blocks for unknown requirement ids.
    pub fn setup(&mut self, module: &Module, module_setup: &Value) -> ModuleModelResult<()> {
        if self.setup_done {
            return Err(ModuleModelError::SetupAlreadyDone);
        }

        let connections_json = module_setup.get("connections").cloned().unwrap_or_else(|| json!({}));
        let connections_obj = connections_json.as_object().cloned().unwrap_or_default();

        let mut connections = HashMap::new();
        for (req_id, requirement) in &module.manifest.requirements {
            let fulfillments_json = connections_obj
                .get(req_id)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let count = fulfillments_json.len();

            if (count as u32) < requirement.min_connections {
                return Err(ModuleModelError::TooFewFulfillments(count, req_id.clone(), requirement.min_connections));
            }
            if (count as u32) > requirement.max_connections {
                return Err(ModuleModelError::TooManyFulfillments(count, req_id.clone(), requirement.max_connections));
            }

            let mut fulfillments = Vec::with_capacity(count);
            for entry in &fulfillments_json {
                let module_id = entry.get("module_id").and_then(Value::as_str).unwrap_or_default();
                let implementation_id = entry.get("implementation_id").and_then(Value::as_str).unwrap_or_default();
                fulfillments.push(Fulfillment::new(module_id, implementation_id));
            }
            connections.insert(req_id.clone(), fulfillments);
        }

        for key in connections_obj.keys() {
            if !module.manifest.requirements.contains_key(key) {
                return Err(ModuleModelError::UnknownFulfillmentRequirement(key.clone()));
            }
        }

        self.connections = connections;
        self.config_sets = module_setup.get("config").cloned().unwrap_or_else(|| json!({}));
        self.setup_done = true;
        Ok(())
    }

    pub fn get_config_sets(&self) -> ModuleModelResult<&Value> {
        if !self.setup_done {
            return Err(ModuleModelError::SetupNotDone);
        }
        Ok(&self.config_sets)
    }

    pub fn get_fulfillments(&self, requirement_id: &str) -> ModuleModelResult<&[Fulfillment]> {
        if !self.setup_done {
            return Err(ModuleModelError::SetupNotDone);
        }
        self.connections
            .get(requirement_id)
            .map(Vec::as_slice)
            .ok_or_else(|| ModuleModelError::NoFulfillmentForRequirement(requirement_id.to_string()))
    }

    #[must_use]
    pub fn is_setup(&self) -> bool {
        self.setup_done
    }
}
