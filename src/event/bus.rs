//! In-process publish/subscribe with a bounded history.
//!
//! Emission is synchronous and depth-first: a handler that emits runs the
//! nested emission to completion before the outer emission continues. No lock
//! is held while handlers run, so handlers may emit, subscribe or unsubscribe.

use super::Event;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Callback invoked for each matching event. Errors and panics are contained.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by every subscription; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
    owner: Option<String>,
    once: bool,
}

pub struct EventBus {
    /// Exact-type subscriptions, in registration order
    handlers: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    /// Observe-everything subscriptions
    any_handlers: RwLock<Vec<Arc<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    max_events: usize,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EVENTS)
    }

    /// Create a bus retaining at most `max_events` events.
    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            any_handlers: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(max_events.min(4096))),
            max_events,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Subscribe to events whose type equals `event_type` exactly.
    ///
    /// `owner` names the module the handler belongs to; it is attached to the
    /// log record when the handler fails.
    pub fn on<F>(&self, event_type: &str, handler: F, owner: Option<&str>) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(handler), owner, false)
    }

    /// Subscribe for a single delivery; the subscription is dropped before it runs.
    pub fn once<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(handler), None, true)
    }

    /// Remove a subscription. Returns false if it was not registered under `event_type`.
    pub fn off(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Subscribe to every emitted event regardless of type.
    ///
    /// A subscription made with `on("*", ..)` only sees events whose type is
    /// literally "*"; this is the way to observe everything.
    pub fn on_any<F>(&self, handler: F, owner: Option<&str>) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let subscription = Arc::new(Subscription {
            id: self.next_subscription_id(),
            handler: Arc::new(handler),
            owner: owner.map(str::to_string),
            once: false,
        });
        let id = subscription.id;
        self.any_handlers.write().push(subscription);
        id
    }

    pub fn off_any(&self, id: SubscriptionId) -> bool {
        let mut any = self.any_handlers.write();
        let before = any.len();
        any.retain(|s| s.id != id);
        any.len() != before
    }

    /// Number of exact-type subscriptions for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .get(event_type)
            .map_or(0, |list| list.len())
    }

    /// Record an event and deliver it to its subscribers in registration order.
    ///
    /// Exact-type subscribers run first, then observe-everything subscribers.
    pub fn emit(
        &self,
        event_type: &str,
        data: Value,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Event {
        let event = Event::new(event_type, data, source, target);

        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.max_events {
                history.pop_front();
            }
        }

        let subscribers = self.take_subscribers(event_type);
        let observers: Vec<Arc<Subscription>> = self.any_handlers.read().clone();

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
            subscribers = subscribers.len() + observers.len(),
            "Event emitted"
        );

        for subscription in subscribers.iter().chain(observers.iter()) {
            deliver(subscription, &event);
        }

        event
    }

    /// Retained events filtered by type and/or module (source or target).
    pub fn get_events(&self, event_type: Option<&str>, module_id: Option<&str>) -> Vec<Event> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.matches(event_type, module_id))
            .cloned()
            .collect()
    }

    /// Remove matching events from history. No filter clears everything.
    ///
    /// Returns the number of events removed.
    pub fn clear_events(&self, event_type: Option<&str>, module_id: Option<&str>) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|e| !e.matches(event_type, module_id));
        before - history.len()
    }

    fn subscribe(
        &self,
        event_type: &str,
        handler: EventHandler,
        owner: Option<&str>,
        once: bool,
    ) -> SubscriptionId {
        let subscription = Arc::new(Subscription {
            id: self.next_subscription_id(),
            handler,
            owner: owner.map(str::to_string),
            once,
        });
        let id = subscription.id;
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(subscription);
        id
    }

    /// Snapshot subscribers for dispatch, dropping one-shot entries in the same step.
    fn take_subscribers(&self, event_type: &str) -> Vec<Arc<Subscription>> {
        let mut handlers = self.handlers.write();
        let (snapshot, now_empty) = match handlers.get_mut(event_type) {
            Some(list) => {
                let snapshot = list.clone();
                list.retain(|s| !s.once);
                (snapshot, list.is_empty())
            }
            None => return Vec::new(),
        };
        if now_empty {
            handlers.remove(event_type);
        }
        snapshot
    }

    fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(subscription: &Subscription, event: &Event) {
    let owner = subscription.owner.as_deref().unwrap_or("-");
    match panic::catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(
            event_type = %event.event_type,
            event_id = %event.id,
            subscription = subscription.id.0,
            module_id = %owner,
            error = %e,
            "Event handler failed"
        ),
        Err(payload) => error!(
            event_type = %event.event_type,
            event_id = %event.id,
            subscription = subscription.id.0,
            module_id = %owner,
            panic = %panic_message(payload.as_ref()),
            "Event handler panicked"
        ),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
