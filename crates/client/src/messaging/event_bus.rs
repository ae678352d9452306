//! Typed publish/subscribe bus between the connection manager and consumers.
//!
//! Subscribers register callbacks per topic and are invoked synchronously
//! within the emitting turn. Emissions that find no subscriber land in a
//! bounded backlog so a late-mounting consumer still observes the last few
//! events that arrived during initialization. Retained topics (the status
//! channel) replay their current value to every new subscriber instead.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Maximum number of undelivered `{topic, payload}` pairs kept for types with
/// no current subscriber; the oldest entry is evicted first.
pub const BACKLOG_CAPACITY: usize = 32;

type Handler = Box<dyn FnMut(Value) + Send + 'static>;

struct HandlerEntry {
    id: u64,
    callback: Arc<Mutex<Handler>>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<String, Vec<HandlerEntry>>,
    backlog: VecDeque<(String, Value)>,
    retained: HashMap<String, Value>,
}

/// Event bus with per-topic subscriptions, a bounded backlog, and retained
/// current-value topics.
///
/// The bus holds strong references to handlers, so they persist until
/// explicitly unsubscribed or the last bus handle is dropped. A handler that
/// panics is isolated: the panic is caught and logged, the remaining handlers
/// for the topic still run, and the emitter never observes it.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic.
    ///
    /// Any backlog recorded for the topic is drained into the new handler
    /// synchronously, in original emission order, before this returns. For
    /// retained topics the current value is delivered instead.
    pub fn on(
        &self,
        topic: impl Into<String>,
        handler: impl FnMut(Value) + Send + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let callback: Arc<Mutex<Handler>> = Arc::new(Mutex::new(Box::new(handler)));

        let (id, pending) = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let id = inner.next_id;
            inner.next_id += 1;

            let pending = if let Some(current) = inner.retained.get(&topic).cloned() {
                vec![current]
            } else {
                drain_backlog(&mut inner.backlog, &topic)
            };

            inner
                .handlers
                .entry(topic.clone())
                .or_default()
                .push(HandlerEntry {
                    id,
                    callback: Arc::clone(&callback),
                });
            (id, pending)
        };

        for payload in pending {
            invoke(&topic, &callback, payload);
        }

        Subscription {
            inner: Arc::clone(&self.inner),
            topic,
            id,
        }
    }

    /// Deliver a payload to every current subscriber of `topic`.
    ///
    /// With no subscriber the pair is appended to the backlog (unless the
    /// topic is retained, which has its own replay path).
    pub fn emit(&self, topic: &str, payload: Value) {
        let targets = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let targets = subscribers(&inner, topic);
            if targets.is_empty() && !inner.retained.contains_key(topic) {
                if inner.backlog.len() == BACKLOG_CAPACITY {
                    inner.backlog.pop_front();
                }
                inner.backlog.push_back((topic.to_string(), payload));
                return;
            }
            targets
        };

        for callback in &targets {
            invoke(topic, callback, payload.clone());
        }
    }

    /// Deliver a payload and retain it as the topic's current value, replayed
    /// to every future subscriber. Retained topics never touch the backlog.
    pub fn emit_retained(&self, topic: &str, payload: Value) {
        let targets = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.retained.insert(topic.to_string(), payload.clone());
            subscribers(&inner, topic)
        };

        for callback in &targets {
            invoke(topic, callback, payload.clone());
        }
    }

    /// Number of live handlers for a topic.
    pub fn handler_count(&self, topic: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.handlers.get(topic).map_or(0, Vec::len)
    }
}

fn subscribers(inner: &BusInner, topic: &str) -> Vec<Arc<Mutex<Handler>>> {
    inner
        .handlers
        .get(topic)
        .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
        .unwrap_or_default()
}

fn drain_backlog(backlog: &mut VecDeque<(String, Value)>, topic: &str) -> Vec<Value> {
    let mut drained = Vec::new();
    let mut kept = VecDeque::with_capacity(backlog.len());
    for (entry_topic, payload) in backlog.drain(..) {
        if entry_topic == topic {
            drained.push(payload);
        } else {
            kept.push_back((entry_topic, payload));
        }
    }
    *backlog = kept;
    drained
}

/// Invoke one handler, isolating panics so the remaining handlers and the
/// emitter are unaffected.
fn invoke(topic: &str, callback: &Arc<Mutex<Handler>>, payload: Value) {
    let mut cb = callback.lock().unwrap_or_else(|p| p.into_inner());
    if panic::catch_unwind(AssertUnwindSafe(|| (*cb)(payload))).is_err() {
        tracing::warn!(topic, "subscriber panicked; continuing with remaining handlers");
    }
}

/// Handle returned by [`EventBus::on`]; revokes the registration.
///
/// Dropping the handle without calling [`Subscription::unsubscribe`] leaves
/// the handler registered, matching the bus owning its subscribers.
pub struct Subscription {
    inner: Arc<Mutex<BusInner>>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entries) = inner.handlers.get_mut(&self.topic) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                inner.handlers.remove(&self.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn collector() -> (Arc<Mutex<Vec<Value>>>, impl FnMut(Value) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn emit_reaches_every_subscriber() {
        let bus = EventBus::new();
        let (seen_a, handler_a) = collector();
        let (seen_b, handler_b) = collector();
        let _a = bus.on("t", handler_a);
        let _b = bus.on("t", handler_b);

        bus.emit("t", json!(1));

        assert_eq!(*seen_a.lock().unwrap(), vec![json!(1)]);
        assert_eq!(*seen_b.lock().unwrap(), vec![json!(1)]);
    }

    #[test]
    fn backlog_drains_in_order_exactly_once() {
        let bus = EventBus::new();
        bus.emit("t", json!("a"));
        bus.emit("t", json!("b"));
        bus.emit("other", json!("x"));

        let (seen, handler) = collector();
        let _sub = bus.on("t", handler);
        assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!("b")]);

        // A second subscriber gets nothing: the backlog drains once.
        let (late, handler) = collector();
        let _late = bus.on("t", handler);
        assert!(late.lock().unwrap().is_empty());

        // The unrelated topic's entry is still there for its own subscriber.
        let (other, handler) = collector();
        let _other = bus.on("other", handler);
        assert_eq!(*other.lock().unwrap(), vec![json!("x")]);
    }

    #[test]
    fn backlog_evicts_oldest_at_capacity() {
        let bus = EventBus::new();
        for i in 0..(BACKLOG_CAPACITY + 1) {
            bus.emit("t", json!(i));
        }

        let (seen, handler) = collector();
        let _sub = bus.on("t", handler);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), BACKLOG_CAPACITY);
        assert_eq!(seen[0], json!(1));
        assert_eq!(seen[BACKLOG_CAPACITY - 1], json!(BACKLOG_CAPACITY));
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let _bad = bus.on("t", |_| panic!("boom"));
        let (seen, handler) = collector();
        let _good = bus.on("t", handler);

        bus.emit("t", json!(1));
        bus.emit("t", json!(2));

        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let sub = bus.on("t", move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit("t", json!(1));
        sub.unsubscribe();
        assert_eq!(bus.handler_count("t"), 0);

        // No subscriber anymore, so this lands in the backlog instead.
        bus.emit("t", json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retained_topic_replays_current_value_to_new_subscribers() {
        let bus = EventBus::new();
        bus.emit_retained("status", json!({ "connected": false }));
        bus.emit_retained("status", json!({ "connected": true }));

        let (seen, handler) = collector();
        let _sub = bus.on("status", handler);
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "connected": true })]);
    }
}
