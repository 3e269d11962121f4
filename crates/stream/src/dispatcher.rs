//! Per-tag event dispatch with log buffering.
//!
//! [`Dispatcher`] parses inbound frames, routes each envelope to the
//! handlers subscribed to its tag, unwraps `batch` envelopes, and
//! buffers high-frequency `log` envelopes for interval-based delivery.
//!
//! Handlers receive a slice of envelopes: every tag except `log`
//! delivers exactly one envelope per call, while `log` delivers the
//! whole group accumulated since the last flush. Handlers run
//! synchronously in registration order; a handler returning `Err` is
//! logged and does not stop the remaining handlers. Subscribing or
//! unsubscribing from inside a handler is allowed -- dispatch iterates
//! over a snapshot of the registered set, never the live map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::messages::{parse_envelope, Envelope, EventTag};

/// Callback invoked with the envelopes delivered for one dispatch.
pub type Handler = Arc<dyn Fn(&[Envelope]) -> anyhow::Result<()> + Send + Sync>;

/// Proof of a subscription; pass back to [`Dispatcher::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    tag: EventTag,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Handlers per tag, in registration order.
    handlers: HashMap<EventTag, Vec<(u64, Handler)>>,
}

/// Routes parsed envelopes to tag subscribers.
pub struct Dispatcher {
    registry: Mutex<Registry>,
    log_buffer: Mutex<Vec<Envelope>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler for one tag. Returns a token for removal.
    pub fn subscribe(&self, tag: EventTag, handler: Handler) -> SubscriptionToken {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.entry(tag).or_default().push((id, handler));
        SubscriptionToken { tag, id }
    }

    /// Remove a previously registered handler.
    ///
    /// Unknown or already-removed tokens are a no-op, so unsubscribing
    /// from inside a handler (including the handler itself) is safe.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(handlers) = registry.handlers.get_mut(&token.tag) {
            handlers.retain(|(id, _)| *id != token.id);
        }
    }

    /// Parse and dispatch one raw text frame.
    ///
    /// Malformed frames and unknown tags are logged and dropped; they
    /// never propagate out of the dispatch path.
    pub fn dispatch_frame(&self, text: &str) {
        match parse_envelope(text) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => {
                tracing::warn!(error = %e, raw_frame = %text, "Dropping unparseable frame");
            }
        }
    }

    /// Route one envelope to its subscribers.
    ///
    /// `batch` envelopes are delivered to batch subscribers as a unit
    /// and then each inner envelope is dispatched in order. `log`
    /// envelopes are buffered until the next [`flush_logs`](Self::flush_logs).
    pub fn dispatch(&self, envelope: &Envelope) {
        match envelope {
            Envelope::Batch(batch) => {
                self.invoke(EventTag::Batch, std::slice::from_ref(envelope));
                for inner in &batch.events {
                    self.dispatch(inner);
                }
            }
            Envelope::Log(_) => {
                self.log_buffer.lock().unwrap().push(envelope.clone());
            }
            other => {
                self.invoke(other.tag(), std::slice::from_ref(envelope));
            }
        }
    }

    /// Deliver all buffered `log` envelopes as one group, in arrival
    /// order, then clear the buffer. No-op when the buffer is empty.
    ///
    /// The connection task calls this on a fixed interval while the
    /// socket is open, bounding consumer wakeups independent of the
    /// server's send rate.
    pub fn flush_logs(&self) {
        let buffered = std::mem::take(&mut *self.log_buffer.lock().unwrap());
        if buffered.is_empty() {
            return;
        }
        self.invoke(EventTag::Log, &buffered);
    }

    /// Number of log envelopes currently buffered.
    pub fn buffered_log_count(&self) -> usize {
        self.log_buffer.lock().unwrap().len()
    }

    /// Invoke every handler registered for `tag`, in registration
    /// order, over a snapshot taken before the first call.
    fn invoke(&self, tag: EventTag, envelopes: &[Envelope]) {
        let snapshot: Vec<(u64, Handler)> = {
            let registry = self.registry.lock().unwrap();
            match registry.handlers.get(&tag) {
                Some(handlers) => handlers.clone(),
                None => return,
            }
        };

        for (id, handler) in snapshot {
            if let Err(e) = handler(envelopes) {
                tracing::warn!(?tag, handler_id = id, error = %e, "Event handler failed");
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
