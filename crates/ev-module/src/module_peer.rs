use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ev_core::{Arguments, ErrorCode, EvError, EvResult, Fulfillment, Value};
use ev_module_model::{Module, ModuleConfig};
use ev_peer::{CommandHandler, Disposer, Handler, Peer};
use ev_schema::SchemaValidator;
use ev_transport::Transport;

use crate::error::ModuleError;
use crate::state::BootstrapState;

fn check_schema(validator: &SchemaValidator, value: &Value) -> EvResult<()> {
    let result = validator.validate(value);
    if result.ok() {
        Ok(())
    } else {
        Err(EvError::SchemaValidation {
            code: ErrorCode::SchemaInvalidPayload,
            pointer: result.pointer,
            message: result.error.unwrap_or_default(),
        })
    }
}

fn missing_fulfillment(requirement_id: &str, index: usize) -> EvError {
    EvError::topology(
        ErrorCode::TopologyMissingTarget,
        format!("no fulfillment at index {index} for requirement '{requirement_id}'"),
    )
}

/// A handle to the background IO poll thread, returned by
/// [`ModulePeer::spawn_io_sync_thread`]. Resolves when the thread exits —
/// which only happens once the owning `ModulePeer` is dropped.
pub struct IoSyncHandle {
    join_handle: std::thread::JoinHandle<()>,
}

impl IoSyncHandle {
    /// Block until the IO sync thread exits.
    pub fn join(self) -> std::thread::Result<()> {
        self.join_handle.join()
    }
}

/// The bootstrap state machine and schema-validated command/variable
/// surface built on top of a [`Peer`].
///
/// Holds the module's resolved manifest (`Module`), the post-handshake
/// `ModuleConfig`, and the monotonic `Constructed -> Booted -> Initialized`
/// state. Every publish/call/implement/subscribe method here validates its
/// payload against the relevant interface schema before it reaches the
/// wire (outgoing) or the user's handler (incoming).
pub struct ModulePeer<T: Transport> {
    module: Arc<Module>,
    transport: Arc<T>,
    peer: Arc<Peer<T>>,
    config: Mutex<ModuleConfig>,
    state: Mutex<BootstrapState>,
    bypassed: Mutex<bool>,
    sync_running: Arc<AtomicBool>,
    sync_spawned: AtomicBool,
}

impl<T: Transport + 'static> ModulePeer<T> {
    #[must_use]
    pub fn new(module: Module, transport: Arc<T>) -> Self {
        let peer = Arc::new(Peer::new(module.id.clone(), Arc::clone(&transport)));
        Self {
            module: Arc::new(module),
            transport,
            peer,
            config: Mutex::new(ModuleConfig::new()),
            state: Mutex::new(BootstrapState::Constructed),
            bypassed: Mutex::new(false),
            sync_running: Arc::new(AtomicBool::new(false)),
            sync_spawned: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn get_module(&self) -> &Module {
        &self.module
    }

    #[must_use]
    pub fn state(&self) -> BootstrapState {
        *self.state.lock().expect("module peer state mutex poisoned")
    }

    /// Spawn the dedicated IO poll thread, driving `transport.sync(50)` in a
    /// loop until this `ModulePeer` is dropped. Must be called at most once.
    pub fn spawn_io_sync_thread(&self) -> Result<IoSyncHandle, ModuleError> {
        if self.sync_spawned.swap(true, Ordering::SeqCst) {
            return Err(ModuleError::IoSyncAlreadyRunning);
        }
        self.sync_running.store(true, Ordering::SeqCst);

        let transport = Arc::clone(&self.transport);
        let running = Arc::clone(&self.sync_running);
        let join_handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                transport.sync(50);
            }
        });

        Ok(IoSyncHandle { join_handle })
    }

    /// Short-circuit the manager handshake with a locally-supplied config.
    /// Can be called at most once, and only before `say_hello`.
    pub fn bypass(&self, bypass_data: &Value) -> EvResult<()> {
        let mut bypassed = self.bypassed.lock().expect("bypass mutex poisoned");
        if *bypassed {
            return Err(ModuleError::AlreadyBypassed.into());
        }
        *bypassed = true;
        self.config
            .lock()
            .expect("config mutex poisoned")
            .setup(&self.module, bypass_data)
            .map_err(ModuleError::from)?;
        Ok(())
    }

    /// Perform the manager handshake (or apply the bypassed config).
    /// Requires state `Constructed`; transitions to `Booted`.
    pub fn say_hello(&self) -> EvResult<()> {
        {
            let state = *self.state.lock().expect("module peer state mutex poisoned");
            if state != BootstrapState::Constructed {
                return Err(ModuleError::WrongStateForHello(state).into());
            }
        }

        let bypassed = *self.bypassed.lock().expect("bypass mutex poisoned");
        if !bypassed {
            if !self.sync_running.load(Ordering::SeqCst) {
                return Err(ModuleError::IoSyncNotRunning.into());
            }

            let mut args = Arguments::new();
            args.insert("module_id".to_string(), Value::from(self.module.id.clone()));
            let module_setup = self
                .peer
                .call_command("manager", "", "say_hello", args)
                .map_err(ModuleError::from)?;
            self.config
                .lock()
                .expect("config mutex poisoned")
                .setup(&self.module, &module_setup)
                .map_err(ModuleError::from)?;
        }

        *self.state.lock().expect("module peer state mutex poisoned") = BootstrapState::Booted;
        Ok(())
    }

    /// Finish initialization. Requires state `Booted`; transitions to
    /// `Initialized`. Blocks on the manager's `ready` variable unless
    /// bypassed.
    pub fn init_done(&self) -> EvResult<()> {
        {
            let state = *self.state.lock().expect("module peer state mutex poisoned");
            if state != BootstrapState::Booted {
                return Err(ModuleError::WrongStateForInitDone(state).into());
            }
        }

        let bypassed = *self.bypassed.lock().expect("bypass mutex poisoned");
        if bypassed {
            *self.state.lock().expect("module peer state mutex poisoned") = BootstrapState::Initialized;
            return Ok(());
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<()>(1);
        let disposer = self.peer.subscribe_variable(
            "manager",
            "",
            "ready",
            Arc::new(move |_value: &Value| {
                let _ = ready_tx.try_send(());
            }),
        );

        let mut args = Arguments::new();
        args.insert("module_id".to_string(), Value::from(self.module.id.clone()));
        self.peer
            .call_command("manager", "", "init_done", args)
            .map_err(ModuleError::from)?;

        ready_rx
            .recv()
            .map_err(|_| EvError::state("ready channel disconnected before delivery"))?;
        disposer.dispose();

        *self.state.lock().expect("module peer state mutex poisoned") = BootstrapState::Initialized;
        Ok(())
    }

    #[must_use]
    pub fn is_bypassed(&self) -> bool {
        *self.bypassed.lock().expect("bypass mutex poisoned")
    }

    pub fn config_sets(&self) -> EvResult<Value> {
        self.config
            .lock()
            .expect("config mutex poisoned")
            .get_config_sets()
            .cloned()
            .map_err(|e| ModuleError::from(e).into())
    }

    pub fn fulfillments(&self, requirement_id: &str) -> EvResult<Vec<Fulfillment>> {
        self.config
            .lock()
            .expect("config mutex poisoned")
            .get_fulfillments(requirement_id)
            .map(<[Fulfillment]>::to_vec)
            .map_err(|e| ModuleError::from(e).into())
    }

    /// Publish a variable, validated against its own interface's schema.
    pub fn publish_variable(&self, implementation_id: &str, variable_name: &str, value: Value) -> EvResult<()> {
        let variable_type = self
            .module
            .get_variable_type_for_implementation(implementation_id, variable_name)
            .map_err(ModuleError::from)?;
        check_schema(&variable_type.0, &value)?;
        self.peer
            .publish_variable(implementation_id, variable_name, &value)
            .map_err(ModuleError::from)?;
        Ok(())
    }

    /// Call a command bound to `requirement_id`'s `fulfillment_index`'th
    /// fulfillment. Arguments are validated against the requirement's
    /// interface before the call is made; the result is validated against
    /// the same interface's return type before being handed back — an
    /// invalid inbound result surfaces as an error, it does not panic.
    pub fn call_command(
        &self,
        requirement_id: &str,
        fulfillment_index: usize,
        command_name: &str,
        args: Arguments,
    ) -> EvResult<Value> {
        let command_type = self
            .module
            .get_command_type_for_requirement(requirement_id, command_name)
            .map_err(ModuleError::from)?;

        for (name, validator) in &command_type.arguments {
            if let Some(value) = args.get(name) {
                check_schema(validator, value)?;
            }
        }

        let fulfillment = {
            let config = self.config.lock().expect("config mutex poisoned");
            let fulfillments = config.get_fulfillments(requirement_id).map_err(ModuleError::from)?;
            fulfillments
                .get(fulfillment_index)
                .cloned()
                .ok_or_else(|| missing_fulfillment(requirement_id, fulfillment_index))?
        };

        let result = self
            .peer
            .call_command(&fulfillment.module_id, &fulfillment.implementation_id, command_name, args)
            .map_err(ModuleError::from)?;

        check_schema(&command_type.return_type, &result)?;
        Ok(result)
    }

    /// Implement a command, validating incoming arguments against this
    /// implementation's interface before the handler runs. A handler is
    /// never invoked with arguments that failed validation; instead an
    /// error payload is published as the result and the event is logged.
    pub fn implement_command(&self, implementation_id: &str, command_name: &str, handler: CommandHandler) -> EvResult<()> {
        // fail fast if this implementation doesn't actually have the command
        self.module
            .get_command_type_for_implementation(implementation_id, command_name)
            .map_err(ModuleError::from)?;

        let module = Arc::clone(&self.module);
        let impl_id_owned = implementation_id.to_string();
        let command_name_owned = command_name.to_string();

        let wrapped: CommandHandler = Arc::new(move |params: Value| {
            let Ok(command_type) = module.get_command_type_for_implementation(&impl_id_owned, &command_name_owned) else {
                tracing::error!("interface disappeared between registration and dispatch");
                return Value::Null;
            };

            if let Value::Object(map) = &params {
                for (name, validator) in &command_type.arguments {
                    if let Some(value) = map.get(name) {
                        if !validator.is_valid(value) {
                            tracing::error!(
                                implementation = %impl_id_owned,
                                command = %command_name_owned,
                                argument = %name,
                                "incoming command argument failed schema validation, handler not invoked"
                            );
                            return serde_json::json!({
                                "error": format!("argument '{name}' failed schema validation"),
                            });
                        }
                    }
                }
            }

            handler(params)
        });

        self.peer
            .implement_command(implementation_id, command_name, wrapped)
            .map_err(ModuleError::from)?;
        Ok(())
    }

    /// Subscribe to a variable bound to `requirement_id`'s
    /// `fulfillment_index`'th fulfillment. Incoming values that fail
    /// schema validation are logged and dropped, never handed to `handler`.
    pub fn subscribe_variable(
        &self,
        requirement_id: &str,
        fulfillment_index: usize,
        variable_name: &str,
        handler: Handler<Value>,
    ) -> EvResult<Disposer> {
        self.module
            .get_variable_type_for_requirement(requirement_id, variable_name)
            .map_err(ModuleError::from)?;

        let fulfillment = {
            let config = self.config.lock().expect("config mutex poisoned");
            let fulfillments = config.get_fulfillments(requirement_id).map_err(ModuleError::from)?;
            fulfillments
                .get(fulfillment_index)
                .cloned()
                .ok_or_else(|| missing_fulfillment(requirement_id, fulfillment_index))?
        };

        let module = Arc::clone(&self.module);
        let requirement_id_owned = requirement_id.to_string();
        let variable_name_owned = variable_name.to_string();

        let wrapped: Handler<Value> = Arc::new(move |value: &Value| {
            let Ok(variable_type) = module.get_variable_type_for_requirement(&requirement_id_owned, &variable_name_owned)
            else {
                tracing::error!("interface disappeared between subscription and dispatch");
                return;
            };
            if !variable_type.0.is_valid(value) {
                tracing::error!(
                    requirement = %requirement_id_owned,
                    variable = %variable_name_owned,
                    "incoming subscription value failed schema validation, dropping"
                );
                return;
            }
            handler(value);
        });

        Ok(self
            .peer
            .subscribe_variable(&fulfillment.module_id, &fulfillment.implementation_id, variable_name, wrapped))
    }

    /// Subscribe to a raw, non-`everest`-rooted broker topic. Not
    /// schema-validated.
    pub fn mqtt_subscribe(&self, topic: &str, handler: Handler<String>) -> Disposer {
        self.peer.mqtt_subscribe(topic, handler)
    }

    /// Publish raw bytes to an arbitrary broker topic. Not schema-validated.
    pub fn mqtt_publish(&self, topic: &str, data: &[u8]) {
        self.peer.mqtt_publish(topic, data);
    }
}

impl<T: Transport> Drop for ModulePeer<T> {
    fn drop(&mut self) {
        self.sync_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_module_model::ModuleBuilder;
    use ev_schema::{Implementation, Requirement, parse_interface};
    use ev_transport::MockTransport;

    fn evse_interface() -> ev_schema::Interface {
        parse_interface(
            r#"{
                "cmds": {
                    "start": { "arguments": { "power": { "type": "integer" } }, "result": { "type": "boolean" } }
                },
                "vars": {
                    "temperature": { "type": "number" }
                }
            }"#,
        )
        .unwrap()
    }

    fn sample_module() -> Module {
        let mut builder = ModuleBuilder::new("mod_a", "hash1");
        builder
            .add_implementation(
                "main",
                Implementation {
                    interface: "evse".into(),
                    config_schemas: std::collections::HashMap::new(),
                },
                evse_interface(),
            )
            .unwrap();
        builder
            .add_requirement(
                "power_path",
                Requirement {
                    interface: "evse".into(),
                    min_connections: 1,
                    max_connections: 1,
                },
                evse_interface(),
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn starts_constructed_and_transitions_to_booted_via_bypass() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        assert_eq!(module_peer.state(), BootstrapState::Constructed);

        module_peer
            .bypass(&serde_json::json!({
                "config": {},
                "connections": { "power_path": [{ "module_id": "mod_server", "implementation_id": "main" }] }
            }))
            .unwrap();
        module_peer.say_hello().unwrap();
        assert_eq!(module_peer.state(), BootstrapState::Booted);

        module_peer.init_done().unwrap();
        assert_eq!(module_peer.state(), BootstrapState::Initialized);
    }

    #[test]
    fn double_bypass_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        module_peer.bypass(&serde_json::json!({"connections": {}})).unwrap();
        let err = module_peer.bypass(&serde_json::json!({"connections": {}})).unwrap_err();
        assert_eq!(err.code(), ev_core::ErrorCode::StateViolation);
    }

    #[test]
    fn say_hello_without_bypass_requires_io_sync_thread_running() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        let err = module_peer.say_hello().unwrap_err();
        assert_eq!(err.code(), ev_core::ErrorCode::StateViolation);
    }

    #[test]
    fn say_hello_in_wrong_state_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        module_peer.bypass(&serde_json::json!({"connections": {}})).unwrap();
        module_peer.say_hello().unwrap();
        let err = module_peer.say_hello().unwrap_err();
        assert_eq!(err.code(), ev_core::ErrorCode::StateViolation);
    }

    #[test]
    fn publish_variable_rejects_value_failing_schema() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        let err = module_peer
            .publish_variable("main", "temperature", Value::from("not-a-number"))
            .unwrap_err();
        assert_eq!(err.code(), ev_core::ErrorCode::SchemaInvalidPayload);
    }

    #[test]
    fn publish_variable_accepts_value_matching_schema() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = ModulePeer::new(sample_module(), transport);
        module_peer.publish_variable("main", "temperature", Value::from(21.5)).unwrap();
    }

    #[test]
    fn implement_command_skips_handler_on_invalid_argument() {
        let transport = Arc::new(MockTransport::new());
        let module_peer = Arc::new(ModulePeer::new(sample_module(), Arc::clone(&transport)));

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = Arc::clone(&invoked);
        module_peer
            .implement_command(
                "main",
                "start",
                Arc::new(move |_| {
                    invoked_clone.store(true, Ordering::SeqCst);
                    Value::Bool(true)
                }),
            )
            .unwrap();

        transport.inject(
            "everest/mod_a/main/cmd/start",
            serde_json::to_vec(&serde_json::json!({
                "params": {"power": "not-an-integer"},
                "peer": "mod_b",
                "id": 1,
            }))
            .unwrap(),
        );
        transport.sync(50);
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(!invoked.load(Ordering::SeqCst));
    }
}
