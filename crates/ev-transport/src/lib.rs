// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The broker transport boundary.
//!
//! The MQTT client itself is out of scope for this runtime — what matters
//! here is the contract a [`Peer`](../ev_peer/struct.Peer.html) needs from
//! it: publish/subscribe/unsubscribe at a given quality of service, a
//! single raw-message callback, and a synchronous poll-and-deliver step
//! (`sync`) driven by the caller's own IO thread. A real MQTT 3.1.1 client
//! would implement [`Transport`]; [`MockTransport`] is the in-memory
//! double used by every other crate's tests.

use std::sync::{Arc, Mutex};

/// MQTT quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qos {
    /// At most once delivery.
    AtMostOnce,
    /// At least once delivery.
    AtLeastOnce,
    /// Exactly once delivery.
    ExactlyOnce,
}

/// A broker server address, resolved from environment variables with
/// defaults matching §6 of the runtime specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub location: String,
    pub port: u16,
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            location: "mqtt-server".to_string(),
            port: 1883,
        }
    }
}

impl ServerAddress {
    /// Resolve from `MQTT_SERVER_ADDRESS` / `MQTT_SERVER_PORT`, falling
    /// back to the default on an unset or unparseable value. An invalid
    /// port string is ignored (the default port is kept), not an error.
    #[must_use]
    pub fn from_env() -> Self {
        let mut addr = Self::default();
        if let Ok(location) = std::env::var("MQTT_SERVER_ADDRESS") {
            addr.location = location;
        }
        if let Ok(port_str) = std::env::var("MQTT_SERVER_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                addr.port = port;
            }
        }
        addr
    }
}

/// Keep-alive interval the transport should negotiate with the broker.
pub const KEEP_ALIVE_SECS: u32 = 400;

/// An inbound message as delivered by the transport, before any topic
/// parsing or JSON decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The callback a [`Transport`] invokes for every inbound message.
pub type MessageHandler = Arc<dyn Fn(&RawMessage) + Send + Sync + 'static>;

/// The abstract broker transport a `Peer` drives.
///
/// `sync` is the only method expected to block; a caller drives it from a
/// dedicated IO thread on a fixed poll interval (50 ms, per the bootstrap
/// state machine). All other methods are expected to return promptly.
pub trait Transport: Send + Sync {
    /// Install the single raw-message handler. Called once, at construction.
    fn set_handler(&self, handler: MessageHandler);

    /// Subscribe to `topic` at `qos`.
    fn subscribe(&self, topic: &str, qos: Qos);

    /// Unsubscribe from `topic`.
    fn unsubscribe(&self, topic: &str);

    /// Publish `data` to `topic` at `qos`.
    fn publish(&self, topic: &str, data: &[u8], qos: Qos);

    /// Pump the transport's IO for up to `timeout_ms`, delivering any
    /// received messages to the installed handler. Returns `true` if any
    /// work was done.
    fn sync(&self, timeout_ms: u32) -> bool;
}

/// One recorded call to [`MockTransport::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

/// One recorded subscribe/unsubscribe transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRecord {
    Subscribe { topic: String, qos: Qos },
    Unsubscribe { topic: String },
}

struct MockState {
    handler: Option<MessageHandler>,
    publishes: Vec<PublishRecord>,
    subscriptions: Vec<SubscriptionRecord>,
    inbox: Vec<RawMessage>,
}

/// An in-memory [`Transport`] double: records every publish/subscribe
/// call and lets a test inject inbound messages via [`MockTransport::inject`].
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                handler: None,
                publishes: Vec::new(),
                subscriptions: Vec::new(),
                inbox: Vec::new(),
            })),
        }
    }

    /// Queue a raw message to be delivered to the installed handler on the
    /// next call to `sync`.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().expect("mock transport mutex poisoned");
        state.inbox.push(RawMessage {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    #[must_use]
    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.state.lock().expect("mock transport mutex poisoned").publishes.clone()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.state
            .lock()
            .expect("mock transport mutex poisoned")
            .subscriptions
            .clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn set_handler(&self, handler: MessageHandler) {
        self.state.lock().expect("mock transport mutex poisoned").handler = Some(handler);
    }

    fn subscribe(&self, topic: &str, qos: Qos) {
        self.state
            .lock()
            .expect("mock transport mutex poisoned")
            .subscriptions
            .push(SubscriptionRecord::Subscribe { topic: topic.to_string(), qos });
    }

    fn unsubscribe(&self, topic: &str) {
        self.state
            .lock()
            .expect("mock transport mutex poisoned")
            .subscriptions
            .push(SubscriptionRecord::Unsubscribe { topic: topic.to_string() });
    }

    fn publish(&self, topic: &str, data: &[u8], qos: Qos) {
        self.state
            .lock()
            .expect("mock transport mutex poisoned")
            .publishes
            .push(PublishRecord {
                topic: topic.to_string(),
                payload: data.to_vec(),
                qos,
            });
    }

    fn sync(&self, _timeout_ms: u32) -> bool {
        let (handler, pending) = {
            let mut state = self.state.lock().expect("mock transport mutex poisoned");
            let pending = std::mem::take(&mut state.inbox);
            (state.handler.clone(), pending)
        };

        let Some(handler) = handler else { return false };
        let did_work = !pending.is_empty();
        for message in pending {
            handler(&message);
        }
        did_work
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_address_matches_spec_defaults() {
        let addr = ServerAddress::default();
        assert_eq!(addr.location, "mqtt-server");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn mock_transport_records_publish_calls() {
        let transport = MockTransport::new();
        transport.publish("everest/p/var/x", b"1", Qos::ExactlyOnce);
        let records = transport.publishes();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "everest/p/var/x");
        assert_eq!(records[0].qos, Qos::ExactlyOnce);
    }

    #[test]
    fn mock_transport_delivers_injected_messages_on_sync() {
        let transport = MockTransport::new();
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        transport.set_handler(Arc::new(move |msg: &RawMessage| {
            received_clone.lock().unwrap().push(msg.topic.clone());
        }));

        transport.inject("everest/p/var/x", b"\"ping\"".to_vec());
        let did_work = transport.sync(50);
        assert!(did_work);
        assert_eq!(received.lock().unwrap().as_slice(), ["everest/p/var/x"]);
    }
}
