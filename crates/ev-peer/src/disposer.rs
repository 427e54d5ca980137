/// A one-shot unsubscription token returned by `subscribe_variable` and
/// `mqtt_subscribe`. Calling [`Disposer::dispose`] removes the handler and,
/// if it was the last one registered for that topic, unsubscribes from the
/// broker. The contract is the caller's: dispose at most once.
pub struct Disposer {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposer {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(f)),
        }
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.dispose.take() {
            f();
        }
    }
}
