//! Subscription types for state-change callbacks.
//!
//! A subscription is a side-effect callback fired synchronously inside
//! [`ReactiveCell::set`](super::ReactiveCell::set). Callbacks declare up
//! front whether they want the previous value as well as the new one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::value::Value;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) enum Callback {
    Current(Box<dyn Fn(&Value) + Send + Sync>),
    WithPrevious(Box<dyn Fn(&Value, &Value) + Send + Sync>),
}

/// One registered callback.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: SubscriptionId,
    callback: Callback,
}

impl SubscriptionEntry {
    pub(crate) fn new(callback: Callback) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriptionId::new(),
            callback,
        })
    }

    pub(crate) fn wants_previous_value(&self) -> bool {
        matches!(self.callback, Callback::WithPrevious(_))
    }

    pub(crate) fn invoke(&self, new_value: &Value, old_value: &Value) {
        match &self.callback {
            Callback::Current(f) => f(new_value),
            Callback::WithPrevious(f) => f(new_value, old_value),
        }
    }
}

/// Registration-ordered callbacks of one cell.
pub(crate) type SubscriberList = Mutex<SmallVec<[Arc<SubscriptionEntry>; 4]>>;

/// Handle returned by `subscribe`. Call [`cancel`](Self::cancel) to stop
/// receiving changes.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: SubscriptionId,
    list: Weak<SubscriberList>,
    wants_previous_value: bool,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(entry: &SubscriptionEntry, list: &Arc<SubscriberList>) -> Self {
        Self {
            id: entry.id,
            list: Arc::downgrade(list),
            wants_previous_value: entry.wants_previous_value(),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the callback receives `(new, old)` rather than `(new)`.
    pub fn wants_previous_value(&self) -> bool {
        self.wants_previous_value
    }

    /// Remove the callback. Idempotent.
    pub fn cancel(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(list) = self.list.upgrade() {
            list.lock().retain(|entry| entry.id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("wants_previous_value", &self.wants_previous_value)
            .field("active", &self.is_active())
            .finish()
    }
}
