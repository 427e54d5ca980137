use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ev_config::DeploymentConfig;
use ev_core::Value;
use ev_peer::Peer;
use ev_transport::Transport;
use serde_json::json;

use crate::error::{ManagerError, ManagerResult};
use crate::state::ModuleState;
use crate::supervisor::{ChildHandle, ChildSupervisor, ExitStatusKind};

/// One module's handshake state and, if the manager spawned it, the handle
/// to its subprocess.
struct ModuleHandle {
    state: ModuleState,
    child: Option<ChildHandle>,
}

struct ManagerState<S: ChildSupervisor> {
    deployment: DeploymentConfig,
    supervisor: S,
    module_handles: Mutex<HashMap<String, ModuleHandle>>,
    initialized_count: AtomicUsize,
    teardown_started: AtomicBool,
}

fn build_setup_response(deployment: &DeploymentConfig, module_id: &str) -> Value {
    let resolved = deployment.module(module_id).expect("module handle implies a resolved entry");
    let connections: serde_json::Map<String, Value> = resolved
        .connections
        .iter()
        .map(|(req_id, fulfillments)| {
            let entries: Vec<Value> = fulfillments
                .iter()
                .map(|f| json!({ "module_id": f.module_id, "implementation_id": f.implementation_id }))
                .collect();
            (req_id.clone(), Value::Array(entries))
        })
        .collect();

    json!({
        "config": { "module": resolved.config_module, "implementations": resolved.config_implementations },
        "connections": connections,
    })
}

fn handle_say_hello<S: ChildSupervisor>(state: &ManagerState<S>, args: &Value) -> Value {
    let Some(module_id) = args.get("module_id").and_then(Value::as_str) else {
        return json!({ "error": "missing module_id" });
    };

    let mut handles = state.module_handles.lock().expect("manager state poisoned");
    let Some(handle) = handles.get_mut(module_id) else {
        return json!({ "error": "Sorry, I do not know you." });
    };

    match handle.state {
        ModuleState::NotStarted => json!({ "error": "Do you time travel?" }),
        ModuleState::NotSeen => {
            handle.state = ModuleState::SaidHello;
            drop(handles);
            build_setup_response(&state.deployment, module_id)
        }
        ModuleState::SaidHello | ModuleState::InitFinished => json!({ "error": "You already said hello." }),
    }
}

fn handle_init_done<T: Transport, S: ChildSupervisor>(state: &ManagerState<S>, peer: &Peer<T>, args: &Value) -> Value {
    let Some(module_id) = args.get("module_id").and_then(Value::as_str) else {
        return json!({ "error": "missing module_id" });
    };

    let total = {
        let mut handles = state.module_handles.lock().expect("manager state poisoned");
        let Some(handle) = handles.get_mut(module_id) else {
            return json!({ "error": "Sorry, I do not know you." });
        };

        if handle.state != ModuleState::SaidHello {
            return json!({ "error": "I did not expect you tell me that you are done with init." });
        }

        handle.state = ModuleState::InitFinished;
        handles.len()
    };

    let done = state.initialized_count.fetch_add(1, Ordering::SeqCst) + 1;
    if done == total {
        if let Err(error) = peer.publish_variable("", "ready", &Value::Null) {
            tracing::error!(%error, "failed to publish ready variable");
        }
    }

    Value::Null
}

/// Runs the `say_hello`/`init_done` handshake, tracks every module's
/// bootstrap state, and spawns/reaps/tears down module subprocesses.
pub struct Manager<T: Transport, S: ChildSupervisor> {
    state: Arc<ManagerState<S>>,
    peer: Arc<Peer<T>>,
    transport: Arc<T>,
}

impl<T: Transport + 'static, S: ChildSupervisor + 'static> Manager<T, S> {
    #[must_use]
    pub fn new(deployment: DeploymentConfig, transport: Arc<T>, supervisor: S) -> Self {
        let module_handles = deployment
            .modules
            .keys()
            .map(|id| (id.clone(), ModuleHandle { state: ModuleState::NotStarted, child: None }))
            .collect();

        let state = Arc::new(ManagerState {
            deployment,
            supervisor,
            module_handles: Mutex::new(module_handles),
            initialized_count: AtomicUsize::new(0),
            teardown_started: AtomicBool::new(false),
        });

        let peer = Arc::new(Peer::new("manager", Arc::clone(&transport)));

        let hello_state = Arc::clone(&state);
        peer.implement_command(
            "",
            "say_hello",
            Arc::new(move |args: Value| handle_say_hello(&hello_state, &args)),
        )
        .expect("say_hello registered exactly once per manager");

        let done_state = Arc::clone(&state);
        let done_peer = Arc::clone(&peer);
        peer.implement_command(
            "",
            "init_done",
            Arc::new(move |args: Value| handle_init_done(&done_state, &done_peer, &args)),
        )
        .expect("init_done registered exactly once per manager");

        Self { state, peer, transport }
    }

    #[must_use]
    pub fn peer(&self) -> &Peer<T> {
        &self.peer
    }

    /// Spawn one subprocess per non-standalone module and move every
    /// module's state from `NotStarted` to `NotSeen`.
    pub fn spawn_modules(&self, modules_path: &Path, logging_config_path: &Path) -> ManagerResult<()> {
        let mut handles = self.state.module_handles.lock().expect("manager state poisoned");
        for (module_id, handle) in handles.iter_mut() {
            let resolved = self
                .state
                .deployment
                .module(module_id)
                .ok_or_else(|| ManagerError::UnknownModule(module_id.clone()))?;

            if !resolved.standalone {
                let exec_path = modules_path.join(&resolved.module_type).join(&resolved.module_type);
                let args = vec![module_id.clone(), logging_config_path.display().to_string()];
                let child = self.state.supervisor.spawn(module_id, &exec_path, &args)?;
                handle.child = Some(child);
            }

            handle.state = ModuleState::NotSeen;
        }
        Ok(())
    }

    /// Non-blocking: reap any module subprocess that has exited, and on the
    /// first unexpected exit, tear down every other still-running module.
    pub fn check_subprocesses(&self) {
        let exits = self.state.supervisor.reap_exited();
        if exits.is_empty() {
            return;
        }

        let mut handles = self.state.module_handles.lock().expect("manager state poisoned");
        for exit in &exits {
            let Some((module_id, handle)) = handles.iter_mut().find(|(_, h)| h.child == Some(exit.handle)) else {
                tracing::error!(handle = ?exit.handle, "unknown child exited");
                continue;
            };
            match exit.status {
                ExitStatusKind::Exited(code) => tracing::info!(%module_id, code, "module exited"),
                ExitStatusKind::Signaled(signal) => tracing::warn!(%module_id, signal, "module was signaled"),
            }
            handle.child = None;
        }

        if !self.state.teardown_started.swap(true, Ordering::SeqCst) {
            for (module_id, handle) in handles.iter() {
                let Some(child) = handle.child else { continue };
                if let Err(error) = self.state.supervisor.terminate(child) {
                    tracing::error!(%module_id, %error, "SIGTERM failed, escalating to SIGKILL");
                    if let Err(error) = self.state.supervisor.kill(child) {
                        tracing::error!(%module_id, %error, "SIGKILL also failed");
                    }
                }
            }
        }
    }

    /// One iteration: reap exited children, then pump the transport for up
    /// to 50ms.
    pub fn tick(&self) {
        self.check_subprocesses();
        self.transport.sync(50);
    }

    /// Drive `tick` until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::mock::MockSupervisor;
    use ev_config::{MockManifestSource, load};
    use ev_transport::MockTransport;
    use serde_json::json;

    fn manifest_text() -> &'static str {
        r#"{
            "metadata": { "authors": [], "license": "MIT" },
            "implements": { "main": { "interface": "evse" } }
        }"#
    }

    fn interface_text() -> &'static str {
        r#"{"cmds": {}, "vars": {}}"#
    }

    fn deployment(standalone: &[String]) -> DeploymentConfig {
        let sources = MockManifestSource::new()
            .with_manifest("evse_module", manifest_text())
            .with_interface("evse", interface_text());
        let doc = json!({
            "charger": { "module": "evse_module" },
            "other": { "module": "evse_module" }
        });
        load(&doc, &sources, standalone).unwrap()
    }

    fn manager() -> (Manager<MockTransport, MockSupervisor>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let manager = Manager::new(deployment(&[]), Arc::clone(&transport), MockSupervisor::new());
        (manager, transport)
    }

    fn say_hello(transport: &MockTransport, module_id: &str) -> Value {
        transport.inject(
            "everest/manager/cmd/say_hello",
            serde_json::to_vec(&json!({
                "params": { "module_id": module_id },
                "peer": module_id,
                "id": 1,
            }))
            .unwrap(),
        );
        transport.sync(50);
        let reply = transport
            .publishes()
            .into_iter()
            .rev()
            .find(|p| p.topic == format!("everest/{module_id}/result"))
            .expect("say_hello reply published");
        serde_json::from_slice(&reply.payload).unwrap()
    }

    #[test]
    fn say_hello_from_unknown_module_is_rejected() {
        let (manager, transport) = manager();
        let reply = say_hello(&transport, "ghost");
        assert_eq!(reply["result"]["error"], "Sorry, I do not know you.");
        drop(manager);
    }

    #[test]
    fn say_hello_before_spawn_is_time_travel() {
        let (manager, transport) = manager();
        let reply = say_hello(&transport, "charger");
        assert_eq!(reply["result"]["error"], "Do you time travel?");
        drop(manager);
    }

    #[test]
    fn say_hello_after_spawn_returns_setup_and_advances_state() {
        let (manager, transport) = manager();
        manager
            .spawn_modules(Path::new("/modules"), Path::new("/logging.ini"))
            .unwrap();

        let reply = say_hello(&transport, "charger");
        assert!(reply["result"]["config"].is_object());

        let second = say_hello(&transport, "charger");
        assert_eq!(second["result"]["error"], "You already said hello.");
    }

    #[test]
    fn ready_is_published_once_every_module_finishes_init() {
        let (manager, transport) = manager();
        manager
            .spawn_modules(Path::new("/modules"), Path::new("/logging.ini"))
            .unwrap();

        for module_id in ["charger", "other"] {
            say_hello(&transport, module_id);
        }

        for module_id in ["charger", "other"] {
            transport.inject(
                "everest/manager/cmd/init_done",
                serde_json::to_vec(&json!({
                    "params": { "module_id": module_id },
                    "peer": module_id,
                    "id": 2,
                }))
                .unwrap(),
            );
            transport.sync(50);
        }

        assert!(transport
            .publishes()
            .iter()
            .any(|p| p.topic == "everest/manager/var/ready"));
    }

    #[test]
    fn standalone_modules_are_not_spawned_but_still_move_to_not_seen() {
        let transport = Arc::new(MockTransport::new());
        let manager = Manager::new(deployment(&["charger".to_string()]), Arc::clone(&transport), MockSupervisor::new());
        manager
            .spawn_modules(Path::new("/modules"), Path::new("/logging.ini"))
            .unwrap();

        let reply = say_hello(&transport, "charger");
        assert!(reply["result"]["config"].is_object());
    }

    #[test]
    fn unexpected_exit_tears_down_remaining_modules() {
        let (manager, _transport) = manager();
        manager
            .spawn_modules(Path::new("/modules"), Path::new("/logging.ini"))
            .unwrap();

        let handles = manager.state.module_handles.lock().unwrap();
        let charger_child = handles["charger"].child.unwrap();
        let other_child = handles["other"].child.unwrap();
        drop(handles);

        let supervisor = &manager.state.supervisor;
        supervisor.simulate_exit(charger_child, ExitStatusKind::Exited(1));
        manager.check_subprocesses();

        assert!(supervisor.was_terminated(other_child));
    }
}
