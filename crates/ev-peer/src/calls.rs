use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, SyncSender};

use ev_core::Value;
use rand::RngCore;

/// Outstanding `call_command` invocations, keyed by a call id drawn from the
/// peer's own PRNG. Each slot is a one-shot channel of capacity 1: a second
/// result for the same id (possible under QoS1 redelivery) finds the buffer
/// already full and is silently dropped.
pub(crate) struct ExecutedCalls {
    inner: Mutex<HashMap<u32, SyncSender<Value>>>,
}

impl ExecutedCalls {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh call id and its completion slot, rerolling on the
    /// negligibly rare collision with a still-outstanding call.
    pub(crate) fn get(&self, rng: &mut dyn RngCore) -> (u32, Receiver<Value>) {
        let mut guard = self.inner.lock().expect("executed calls mutex poisoned");
        loop {
            let id = rng.next_u32();
            if let Entry::Vacant(slot) = guard.entry(id) {
                let (tx, rx) = mpsc::sync_channel(1);
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    pub(crate) fn release(&self, id: u32) {
        self.inner.lock().expect("executed calls mutex poisoned").remove(&id);
    }

    /// Deliver `result` to the call identified by `id`. Returns `false` if
    /// the id is unknown, or if a result was already delivered for it.
    pub(crate) fn set_result(&self, id: u32, result: Value) -> bool {
        let guard = self.inner.lock().expect("executed calls mutex poisoned");
        match guard.get(&id) {
            Some(tx) => tx.try_send(result).is_ok(),
            None => false,
        }
    }
}
