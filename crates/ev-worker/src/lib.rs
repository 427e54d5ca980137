// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Per-topic handler registration and a single background dispatcher
//! thread that serializes delivery.
//!
//! Every public operation on [`MessageWorker`] acquires the worker's mutex
//! for its entire duration and releases it before returning — the "locked
//! access" pattern of the original, just expressed as ordinary
//! lock-guard-scoped methods instead of a separate handle type. The
//! invariant that matters: no handler ever runs while that mutex is held,
//! so a handler is free to call back into `add_work`/`add_handler`/
//! `remove_handler` without deadlocking.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A registered callback. Boxed behind an `Arc` so the dispatcher can
/// clone the cache of handlers for a topic cheaply while holding the lock,
/// then invoke them after releasing it.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Opaque token returned by [`MessageWorker::add_handler`], required to
/// remove that specific handler later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

struct Topic<T> {
    handlers: Vec<(u64, Handler<T>)>,
    cached: Vec<Handler<T>>,
    dirty: bool,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            cached: Vec::new(),
            dirty: false,
        }
    }
}

struct Shared<T> {
    topics: HashMap<String, Topic<T>>,
    queue: VecDeque<(String, T)>,
    next_token: u64,
    running: bool,
}

/// Generic per-topic handler registry with single-thread serialized
/// dispatch.
///
/// Messages for a topic are enqueued via [`MessageWorker::add_work`] even
/// if no handler is registered; if no handler is registered *when the
/// dispatcher pops the message*, it is silently dropped — a handler
/// registered afterward does not receive buffered messages.
pub struct MessageWorker<T: Send + 'static> {
    state: Arc<Mutex<Shared<T>>>,
    cv: Arc<Condvar>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> MessageWorker<T> {
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(Shared {
            topics: HashMap::new(),
            queue: VecDeque::new(),
            next_token: 0,
            running: true,
        }));
        let cv = Arc::new(Condvar::new());

        let thread_state = Arc::clone(&state);
        let thread_cv = Arc::clone(&cv);
        let thread = std::thread::spawn(move || Self::dispatch_loop(&thread_state, &thread_cv));

        Self {
            state,
            cv,
            thread: Some(thread),
        }
    }

    fn dispatch_loop(state: &Arc<Mutex<Shared<T>>>, cv: &Condvar) {
        loop {
            let mut guard = state.lock().expect("worker mutex poisoned");
            while guard.running && guard.queue.is_empty() {
                guard = cv.wait(guard).expect("worker mutex poisoned");
            }

            if !guard.running {
                return;
            }

            let (topic_id, payload) = guard.queue.pop_front().expect("queue non-empty");

            let handlers = match guard.topics.get_mut(&topic_id) {
                None => {
                    drop(guard);
                    continue;
                }
                Some(topic) => {
                    if topic.dirty {
                        topic.cached = topic.handlers.iter().map(|(_, h)| Arc::clone(h)).collect();
                        topic.dirty = false;
                    }
                    topic.cached.clone()
                }
            };

            drop(guard);

            for handler in &handlers {
                handler(&payload);
            }
        }
    }

    /// Enqueue `payload` for `topic_id`. Notifies the dispatcher thread.
    pub fn add_work(&self, topic_id: impl Into<String>, payload: T) {
        let mut guard = self.state.lock().expect("worker mutex poisoned");
        guard.queue.push_back((topic_id.into(), payload));
        self.cv.notify_all();
    }

    /// Register `handler` for `topic_id`.
    ///
    /// Returns `(list_was_empty, token)`: `list_was_empty` is `true` iff
    /// this call transitioned the topic from zero to one handlers.
    pub fn add_handler(&self, topic_id: impl Into<String>, handler: Handler<T>) -> (bool, HandlerToken) {
        let mut guard = self.state.lock().expect("worker mutex poisoned");
        let token = guard.next_token;
        guard.next_token += 1;

        let topic = guard.topics.entry(topic_id.into()).or_default();
        let was_empty = topic.handlers.is_empty();
        topic.handlers.push((token, handler));
        topic.dirty = true;

        (was_empty, HandlerToken(token))
    }

    /// Remove the handler identified by `token` from `topic_id`.
    ///
    /// Returns `true` iff the topic's handler list is now empty.
    pub fn remove_handler(&self, topic_id: &str, token: HandlerToken) -> bool {
        let mut guard = self.state.lock().expect("worker mutex poisoned");
        let Some(topic) = guard.topics.get_mut(topic_id) else {
            return true;
        };
        topic.handlers.retain(|(id, _)| *id != token.0);
        topic.dirty = true;
        topic.handlers.is_empty()
    }

    /// Number of handlers currently registered for `topic_id` (0 if unknown).
    #[must_use]
    pub fn handler_count(&self, topic_id: &str) -> usize {
        let guard = self.state.lock().expect("worker mutex poisoned");
        guard.topics.get(topic_id).map_or(0, |t| t.handlers.len())
    }
}

impl<T: Send + 'static> Default for MessageWorker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for MessageWorker<T> {
    fn drop(&mut self) {
        {
            let mut guard = self.state.lock().expect("worker mutex poisoned");
            guard.running = false;
        }
        self.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Maps a string key (e.g. `"var/<peer_id>"` or `"cmd/<impl_id>"`) to an
/// owned [`MessageWorker`], created on first access.
pub struct RegisteredHandlers<T: Send + 'static> {
    map: Mutex<HashMap<String, Arc<MessageWorker<T>>>>,
}

impl<T: Send + 'static> RegisteredHandlers<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { map: Mutex::new(HashMap::new()) }
    }

    /// Get or create the worker for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Arc<MessageWorker<T>> {
        let mut guard = self.map.lock().expect("registry mutex poisoned");
        Arc::clone(guard.entry(key.to_string()).or_insert_with(|| Arc::new(MessageWorker::new())))
    }

    /// Look up the worker for `key` without creating it.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<Arc<MessageWorker<T>>> {
        let guard = self.map.lock().expect("registry mutex poisoned");
        guard.get(key).cloned()
    }
}

impl<T: Send + 'static> Default for RegisteredHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn dispatches_work_to_registered_handler() {
        let worker: MessageWorker<String> = MessageWorker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let (was_empty, _token) = worker.add_handler(
            "topic",
            Arc::new(move |_msg: &String| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(was_empty);

        worker.add_work("topic", "hello".to_string());

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn work_with_no_handlers_is_dropped_not_buffered() {
        let worker: MessageWorker<String> = MessageWorker::new();
        worker.add_work("topic", "lost".to_string());
        std::thread::sleep(Duration::from_millis(50));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        worker.add_handler(
            "topic",
            Arc::new(move |_msg: &String| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let worker: MessageWorker<String> = MessageWorker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order_clone = Arc::clone(&order);
            worker.add_handler(
                "topic",
                Arc::new(move |_msg: &String| {
                    order_clone.lock().unwrap().push(i);
                }),
            );
        }

        worker.add_work("topic", "x".to_string());
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn remove_handler_reports_whether_list_is_now_empty() {
        let worker: MessageWorker<String> = MessageWorker::new();
        let (_, token) = worker.add_handler("topic", Arc::new(|_: &String| {}));
        assert_eq!(worker.handler_count("topic"), 1);
        let now_empty = worker.remove_handler("topic", token);
        assert!(now_empty);
        assert_eq!(worker.handler_count("topic"), 0);
    }

    #[test]
    fn handler_may_reregister_without_deadlock() {
        let worker: Arc<MessageWorker<String>> = Arc::new(MessageWorker::new());
        let worker_clone = Arc::clone(&worker);
        let reentered = Arc::new(AtomicUsize::new(0));
        let reentered_clone = Arc::clone(&reentered);

        worker.add_handler(
            "topic",
            Arc::new(move |_msg: &String| {
                reentered_clone.fetch_add(1, Ordering::SeqCst);
                worker_clone.add_work("topic", "again".to_string());
            }),
        );

        worker.add_work("topic", "start".to_string());
        std::thread::sleep(Duration::from_millis(100));
        assert!(reentered.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn registered_handlers_creates_worker_on_demand() {
        let registry: RegisteredHandlers<String> = RegisteredHandlers::new();
        assert!(registry.find("var/peer_a").is_none());
        let worker = registry.get("var/peer_a");
        worker.add_handler("name", Arc::new(|_: &String| {}));
        assert!(registry.find("var/peer_a").is_some());
    }
}
