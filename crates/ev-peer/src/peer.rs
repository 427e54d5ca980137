use std::sync::{Arc, Mutex};
use std::time::Duration;

use ev_core::{Arguments, Value};
use ev_topic::{TopicInfo, TopicType};
use ev_transport::{Qos, RawMessage, Transport};
use ev_worker::{Handler, RegisteredHandlers};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::calls::ExecutedCalls;
use crate::disposer::Disposer;
use crate::error::{PeerError, PeerResult};

/// Default `call_command` deadline, per the bootstrap/transport defaults.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(3000);

/// A command implementation callback: takes the call's `params` and returns
/// the value published back as `result`.
pub type CommandHandler = Arc<dyn Fn(Value) -> Value + Send + Sync + 'static>;

fn string_to_seed(value: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn subscription_key(peer_id: &str, impl_id: &str) -> String {
    if impl_id.is_empty() {
        format!("var/{peer_id}")
    } else {
        format!("var/{peer_id}/{impl_id}")
    }
}

fn command_key(impl_id: &str) -> String {
    if impl_id.is_empty() {
        "cmd/".to_string()
    } else {
        format!("cmd/{impl_id}")
    }
}

struct PeerState<T: Transport> {
    peer_id: String,
    transport: Arc<T>,
    calls: ExecutedCalls,
    json_handlers: RegisteredHandlers<Value>,
    string_handlers: RegisteredHandlers<String>,
}

/// One endpoint on the broker: owns the inbound routing for its own result
/// topic plus whatever variable/command topics it has subscribed to or
/// implemented.
///
/// Cloning a `Peer` is not supported — construct one per logical module
/// identity and share it behind an `Arc` if multiple threads need it.
pub struct Peer<T: Transport> {
    state: Arc<PeerState<T>>,
    rng: Mutex<StdRng>,
}

impl<T: Transport + 'static> Peer<T> {
    /// Install the raw-message handler and subscribe to `everest/<peer_id>/result`
    /// at QoS1.
    pub fn new(peer_id: impl Into<String>, transport: Arc<T>) -> Self {
        let peer_id = peer_id.into();
        let seed = string_to_seed(&peer_id);

        let state = Arc::new(PeerState {
            peer_id: peer_id.clone(),
            transport: Arc::clone(&transport),
            calls: ExecutedCalls::new(),
            json_handlers: RegisteredHandlers::new(),
            string_handlers: RegisteredHandlers::new(),
        });

        let handler_state = Arc::clone(&state);
        transport.set_handler(Arc::new(move |raw: &RawMessage| {
            dispatch_raw_message(&handler_state, raw);
        }));

        transport.subscribe(&ev_topic::build_result_topic(&peer_id), Qos::AtLeastOnce);

        Self {
            state,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.state.peer_id
    }

    /// Publish `value` on the variable topic at QoS2.
    pub fn publish_variable(&self, implementation_id: &str, variable_name: &str, value: &Value) -> PeerResult<()> {
        let topic = ev_topic::build_var_topic(&self.state.peer_id, implementation_id, variable_name);
        let payload = serde_json::to_vec(value)?;
        self.state.transport.publish(&topic, &payload, Qos::ExactlyOnce);
        Ok(())
    }

    /// Call a command on another peer with the default 3000ms timeout.
    pub fn call_command(
        &self,
        other_peer_id: &str,
        implementation_id: &str,
        command_name: &str,
        arguments: Arguments,
    ) -> PeerResult<Value> {
        self.call_command_with_timeout(
            other_peer_id,
            implementation_id,
            command_name,
            arguments,
            DEFAULT_CALL_TIMEOUT,
        )
    }

    /// Call a command on another peer, blocking the caller until a result
    /// arrives or `timeout` elapses. The transport's IO sync loop must be
    /// running on another thread or this deadlocks.
    pub fn call_command_with_timeout(
        &self,
        other_peer_id: &str,
        implementation_id: &str,
        command_name: &str,
        arguments: Arguments,
        timeout: Duration,
    ) -> PeerResult<Value> {
        let (call_id, rx) = {
            let mut rng = self.rng.lock().expect("peer rng mutex poisoned");
            self.state.calls.get(&mut *rng)
        };

        let call_json = serde_json::json!({
            "params": Value::Object(arguments),
            "peer": self.state.peer_id,
            "id": call_id,
        });

        let topic = ev_topic::build_cmd_topic(other_peer_id, implementation_id, command_name);
        let payload = serde_json::to_vec(&call_json)?;
        self.state.transport.publish(&topic, &payload, Qos::ExactlyOnce);

        let outcome = rx.recv_timeout(timeout);
        self.state.calls.release(call_id);

        outcome.map_err(|_| PeerError::Timeout {
            path: topic,
            elapsed_ms: timeout.as_millis() as u64,
        })
    }

    /// Register `handler` for `other_peer`'s variable, subscribing on the
    /// broker the first time a given variable gains a handler.
    pub fn subscribe_variable(
        &self,
        other_peer_id: &str,
        implementation_id: &str,
        variable_name: &str,
        handler: Handler<Value>,
    ) -> Disposer {
        let topic = ev_topic::build_var_topic(other_peer_id, implementation_id, variable_name);
        let key = subscription_key(other_peer_id, implementation_id);
        let worker = self.state.json_handlers.get(&key);

        let (was_empty, token) = worker.add_handler(variable_name.to_string(), handler);
        if was_empty {
            self.state.transport.subscribe(&topic, Qos::ExactlyOnce);
        }

        let transport = Arc::clone(&self.state.transport);
        let variable_name = variable_name.to_string();
        Disposer::new(move || {
            let now_empty = worker.remove_handler(&variable_name, token);
            if now_empty {
                transport.unsubscribe(&topic);
            }
        })
    }

    /// Implement a command at `implementation_id`. Rejects a second
    /// implementation of the same `command_name`.
    pub fn implement_command(
        &self,
        implementation_id: &str,
        command_name: &str,
        handler: CommandHandler,
    ) -> PeerResult<()> {
        let key = command_key(implementation_id);
        let worker = self.state.json_handlers.get(&key);

        if worker.handler_count(command_name) != 0 {
            return Err(PeerError::AlreadyImplemented(command_name.to_string()));
        }

        let topic = ev_topic::build_cmd_topic(&self.state.peer_id, implementation_id, command_name);
        self.state.transport.subscribe(&topic, Qos::ExactlyOnce);

        let transport = Arc::clone(&self.state.transport);
        let wrapped: Handler<Value> = Arc::new(move |msg: &Value| {
            // frame format already checked by handle_command before this runs
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            let result = handler(params);

            let (Some(id), Some(caller_peer)) = (msg.get("id").cloned(), msg.get("peer").and_then(Value::as_str))
            else {
                tracing::error!("command envelope lost its id/peer before dispatch");
                return;
            };

            let reply = serde_json::json!({ "id": id, "result": result });
            match serde_json::to_vec(&reply) {
                Ok(payload) => {
                    let result_topic = ev_topic::build_result_topic(caller_peer);
                    // QoS1 is enough: the caller drops duplicate results once its
                    // completion slot is already filled.
                    transport.publish(&result_topic, &payload, Qos::AtLeastOnce);
                }
                Err(error) => tracing::error!(%error, "failed to encode command result"),
            }
        });

        worker.add_handler(command_name.to_string(), wrapped);
        Ok(())
    }

    /// Subscribe to a raw, non-`everest`-rooted broker topic.
    pub fn mqtt_subscribe(&self, topic: &str, handler: Handler<String>) -> Disposer {
        let worker = self.state.string_handlers.get("mqtt");
        let (was_empty, token) = worker.add_handler(topic.to_string(), handler);
        if was_empty {
            self.state.transport.subscribe(topic, Qos::ExactlyOnce);
        }

        let transport = Arc::clone(&self.state.transport);
        let topic = topic.to_string();
        Disposer::new(move || {
            let now_empty = worker.remove_handler(&topic, token);
            if now_empty {
                transport.unsubscribe(&topic);
            }
        })
    }

    /// Publish raw bytes to an arbitrary broker topic at QoS2.
    pub fn mqtt_publish(&self, topic: &str, data: &[u8]) {
        self.state.transport.publish(topic, data, Qos::ExactlyOnce);
    }
}

fn dispatch_raw_message<T: Transport>(state: &Arc<PeerState<T>>, raw: &RawMessage) {
    let topic_info = ev_topic::parse_topic(&raw.topic);

    match topic_info.topic_type {
        TopicType::Invalid => {
            tracing::error!(topic = %raw.topic, "received data on invalid topic");
        }
        TopicType::Other => {
            let payload = String::from_utf8_lossy(&raw.payload).into_owned();
            handle_external_mqtt(state, &raw.topic, payload);
        }
        TopicType::Result | TopicType::Var | TopicType::Cmd => {
            let message: Value = match serde_json::from_slice(&raw.payload) {
                Ok(message) => message,
                Err(_) => {
                    tracing::warn!(topic = %raw.topic, "received unparseable message");
                    return;
                }
            };

            match topic_info.topic_type {
                TopicType::Result => handle_result(state, message),
                TopicType::Var => handle_subscription(state, message, &topic_info),
                TopicType::Cmd => handle_command(state, message, &topic_info),
                TopicType::Invalid | TopicType::Other => unreachable!("handled above"),
            }
        }
    }
}

fn handle_result<T: Transport>(state: &Arc<PeerState<T>>, message: Value) {
    let Some(object) = message.as_object() else {
        tracing::warn!("received invalid result message");
        return;
    };

    let Some(call_id) = object.get("id").and_then(Value::as_u64).and_then(|id| u32::try_from(id).ok()) else {
        tracing::warn!("received invalid result message");
        return;
    };

    let result = object.get("result").cloned().unwrap_or(Value::Null);
    if !state.calls.set_result(call_id, result) {
        tracing::warn!(call_id, peer = %state.peer_id, "invalid call id referenced");
    }
}

fn handle_subscription<T: Transport>(state: &Arc<PeerState<T>>, message: Value, topic_info: &TopicInfo) {
    let key = subscription_key(&topic_info.peer_id, &topic_info.impl_id);
    let Some(worker) = state.json_handlers.find(&key) else {
        tracing::error!(%key, "received on a subscription topic we never subscribed to");
        return;
    };
    worker.add_work(topic_info.name.clone(), message);
}

fn handle_command<T: Transport>(state: &Arc<PeerState<T>>, message: Value, topic_info: &TopicInfo) {
    let has_frame = message
        .as_object()
        .is_some_and(|o| o.contains_key("peer") && o.contains_key("id"));
    if !has_frame {
        tracing::warn!("received invalid call message");
        return;
    }

    let key = command_key(&topic_info.impl_id);
    let Some(worker) = state.json_handlers.find(&key) else {
        tracing::error!(%key, "received on a command topic we never subscribed to");
        return;
    };
    worker.add_work(topic_info.name.clone(), message);
}

fn handle_external_mqtt<T: Transport>(state: &Arc<PeerState<T>>, topic: &str, payload: String) {
    let Some(worker) = state.string_handlers.find("mqtt") else {
        tracing::error!(topic, "received external mqtt message with no subscriber");
        return;
    };
    worker.add_work(topic.to_string(), payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_transport::MockTransport;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn construction_subscribes_to_own_result_topic() {
        let transport = Arc::new(MockTransport::new());
        let _peer = Peer::new("mod_a", Arc::clone(&transport));

        let subs = transport.subscriptions();
        assert!(subs.iter().any(|s| matches!(
            s,
            ev_transport::SubscriptionRecord::Subscribe { topic, .. } if topic == "everest/mod_a/result"
        )));
    }

    #[test]
    fn publish_variable_sends_encoded_value_at_qos2() {
        let transport = Arc::new(MockTransport::new());
        let peer = Peer::new("mod_a", Arc::clone(&transport));

        peer.publish_variable("main", "temperature", &Value::from(21.5)).unwrap();

        let publishes = transport.publishes();
        let publish = publishes
            .iter()
            .find(|p| p.topic == "everest/mod_a/main/var/temperature")
            .expect("publish recorded");
        assert_eq!(publish.qos, Qos::ExactlyOnce);
        assert_eq!(publish.payload, serde_json::to_vec(&Value::from(21.5)).unwrap());
    }

    #[test]
    fn implement_command_rejects_double_registration() {
        let transport = Arc::new(MockTransport::new());
        let peer = Peer::new("mod_a", Arc::clone(&transport));

        peer.implement_command("main", "start", Arc::new(|_| Value::Null)).unwrap();
        let second = peer.implement_command("main", "start", Arc::new(|_| Value::Null));
        assert!(matches!(second, Err(PeerError::AlreadyImplemented(name)) if name == "start"));
    }

    #[test]
    fn implement_command_publishes_result_on_caller_result_topic() {
        let transport = Arc::new(MockTransport::new());
        let peer = Peer::new("mod_a", Arc::clone(&transport));

        peer.implement_command("main", "start", Arc::new(|params| params)).unwrap();

        transport.inject(
            "everest/mod_a/main/cmd/start",
            serde_json::to_vec(&serde_json::json!({
                "params": {"power": 11},
                "peer": "mod_b",
                "id": 42,
            }))
            .unwrap(),
        );
        transport.sync(50);

        assert!(wait_until(|| {
            transport
                .publishes()
                .iter()
                .any(|p| p.topic == "everest/mod_b/result")
        }));

        let reply = transport
            .publishes()
            .into_iter()
            .find(|p| p.topic == "everest/mod_b/result")
            .unwrap();
        let decoded: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(decoded["id"], 42);
        assert_eq!(decoded["result"]["power"], 11);
    }

    #[test]
    fn call_command_times_out_when_no_result_arrives() {
        let transport = Arc::new(MockTransport::new());
        let peer = Peer::new("mod_a", Arc::clone(&transport));

        let result = peer.call_command_with_timeout(
            "mod_b",
            "main",
            "start",
            Arguments::new(),
            Duration::from_millis(20),
        );

        assert!(matches!(result, Err(PeerError::Timeout { .. })));
    }

    #[test]
    fn call_command_completes_when_result_is_injected() {
        let transport = Arc::new(MockTransport::new());
        let peer = Arc::new(Peer::new("mod_a", Arc::clone(&transport)));

        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = Arc::clone(&completed);
        let peer_clone = Arc::clone(&peer);
        let handle = std::thread::spawn(move || {
            let result = peer_clone
                .call_command("mod_b", "main", "start", Arguments::new())
                .unwrap();
            completed_clone.store(true, Ordering::SeqCst);
            result
        });

        assert!(wait_until(|| !transport.publishes().is_empty()));
        let call_publish = transport
            .publishes()
            .into_iter()
            .find(|p| p.topic == "everest/mod_b/main/cmd/start")
            .expect("call published");
        let call_json: Value = serde_json::from_slice(&call_publish.payload).unwrap();
        let call_id = call_json["id"].as_u64().unwrap();

        transport.inject(
            "everest/mod_a/result",
            serde_json::to_vec(&serde_json::json!({"id": call_id, "result": "ok"})).unwrap(),
        );
        transport.sync(50);

        let result = handle.join().unwrap();
        assert_eq!(result, Value::from("ok"));
        assert!(completed.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_result_delivery_is_dropped_silently() {
        let transport = Arc::new(MockTransport::new());
        let peer = Arc::new(Peer::new("mod_a", Arc::clone(&transport)));

        let peer_clone = Arc::clone(&peer);
        let handle = std::thread::spawn(move || {
            peer_clone
                .call_command("mod_b", "main", "start", Arguments::new())
                .unwrap()
        });

        assert!(wait_until(|| !transport.publishes().is_empty()));
        let call_json: Value = serde_json::from_slice(
            &transport
                .publishes()
                .into_iter()
                .find(|p| p.topic == "everest/mod_b/main/cmd/start")
                .unwrap()
                .payload,
        )
        .unwrap();
        let call_id = call_json["id"].as_u64().unwrap();

        let result_msg = serde_json::to_vec(&serde_json::json!({"id": call_id, "result": "first"})).unwrap();
        transport.inject("everest/mod_a/result", result_msg.clone());
        transport.inject("everest/mod_a/result", result_msg);
        transport.sync(50);

        let result = handle.join().unwrap();
        assert_eq!(result, Value::from("first"));
    }

    #[test]
    fn subscribe_variable_unsubscribes_when_last_disposer_runs() {
        let transport = Arc::new(MockTransport::new());
        let peer = Peer::new("mod_a", Arc::clone(&transport));

        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let disposer = peer.subscribe_variable(
            "mod_b",
            "main",
            "temperature",
            Arc::new(move |v: &Value| received_clone.lock().unwrap().push(v.clone())),
        );

        transport.inject(
            "everest/mod_b/main/var/temperature",
            serde_json::to_vec(&Value::from(10)).unwrap(),
        );
        transport.sync(50);
        assert!(wait_until(|| !received.lock().unwrap().is_empty()));

        disposer.dispose();

        let subs = transport.subscriptions();
        assert!(subs.iter().any(|s| matches!(
            s,
            ev_transport::SubscriptionRecord::Unsubscribe { topic } if topic == "everest/mod_b/main/var/temperature"
        )));
    }

    #[test]
    fn invalid_topic_is_logged_and_does_not_panic() {
        let transport = Arc::new(MockTransport::new());
        let _peer = Peer::new("mod_a", Arc::clone(&transport));
        transport.inject("everest/mod_a/var/", b"1".to_vec());
        transport.sync(50);
    }
}
