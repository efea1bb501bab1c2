//! Reactive Cell
//!
//! A [`ReactiveCell`] is a named slot of session state. The cell itself
//! stores nothing but its name, its default, and its subscribers: values
//! live in the [`SessionStore`](crate::session::SessionStore) of whichever
//! session the caller's context addresses. One cell definition can therefore
//! be shared by every session, and each session sees its own value.
//!
//! # How Cells Work
//!
//! 1. `get` resolves the context's store, registers the rendering component
//!    (if any) as a dependent of the cell's name, and returns the stored
//!    value or the default.
//!
//! 2. `set` writes the store, marks the name dirty so the next flush
//!    rebuilds its dependents, then fires every subscription in
//!    registration order.
//!
//! 3. Arithmetic and comparison methods do not read anything. They build a
//!    [`DerivedExpression`] that is evaluated later against a context.
//!
//! # Subscriber Faults
//!
//! A panicking subscriber is caught and logged. The write has already
//! happened, and the remaining subscribers still run.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::error;

use super::context::SessionContext;
use super::expr::DerivedExpression;
use super::subscription::{Callback, SubscriberList, Subscription, SubscriptionEntry};
use crate::error::panic_message;
use crate::value::Value;

struct CellInner {
    name: String,
    default: Value,
    subscribers: Arc<SubscriberList>,
}

/// A named reactive value resolved per session.
///
/// Cloning is cheap and the clones share one subscriber list.
///
/// # Example
///
/// ```rust,ignore
/// let count = ReactiveCell::new("count", 0);
///
/// count.set(&ctx, 5);
/// assert_eq!(count.get(&ctx), Value::Int(5));
///
/// // Builds an expression; nothing is read yet.
/// let doubled = count.mul(2);
/// ```
#[derive(Clone)]
pub struct ReactiveCell {
    inner: Arc<CellInner>,
}

impl ReactiveCell {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                name: name.into(),
                default: default.into(),
                subscribers: Arc::new(SubscriberList::default()),
            }),
        }
    }

    /// State name this cell reads and writes.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn default_value(&self) -> &Value {
        &self.inner.default
    }

    /// Read the value for the context's session.
    ///
    /// If the context has an active component, that component is recorded
    /// as depending on this cell.
    pub fn get(&self, ctx: &SessionContext) -> Value {
        let store = ctx.store();
        if let Some(component) = ctx.component() {
            store.register_dependency(&self.inner.name, component);
        }
        store
            .state(&self.inner.name)
            .unwrap_or_else(|| self.inner.default.clone())
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self, ctx: &SessionContext) -> Value {
        ctx.store()
            .state(&self.inner.name)
            .unwrap_or_else(|| self.inner.default.clone())
    }

    /// Write a new value, mark it dirty, and notify subscribers.
    pub fn set(&self, ctx: &SessionContext, value: impl Into<Value>) {
        let new_value = value.into();
        let store = ctx.store();
        let old_value = store
            .write_state(&self.inner.name, new_value.clone())
            .unwrap_or_else(|| self.inner.default.clone());
        store.mark_dirty(&self.inner.name);

        // Snapshot so callbacks may subscribe or cancel without deadlocking.
        let subscribers: SmallVec<[Arc<SubscriptionEntry>; 4]> =
            self.inner.subscribers.lock().clone();
        for entry in &subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                entry.invoke(&new_value, &old_value);
            }));
            if let Err(payload) = outcome {
                error!(
                    state = %self.inner.name,
                    subscription = ?entry.id,
                    error = %panic_message(payload.as_ref()),
                    "state subscriber panicked"
                );
            }
        }
    }

    /// Read-modify-write. Not atomic with respect to other writers.
    pub fn update<F>(&self, ctx: &SessionContext, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let current = self.get_untracked(ctx);
        self.set(ctx, f(&current));
    }

    /// Call `callback(new)` after every `set`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.push_subscription(Callback::Current(Box::new(callback)))
    }

    /// Call `callback(new, old)` after every `set`.
    ///
    /// `old` is the default when the session had no value yet.
    pub fn subscribe_with_previous<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.push_subscription(Callback::WithPrevious(Box::new(callback)))
    }

    /// Subscribe for the lifetime of the cell.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(callback);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    fn push_subscription(&self, callback: Callback) -> Subscription {
        let entry = SubscriptionEntry::new(callback);
        let subscription = Subscription::new(&entry, &self.inner.subscribers);
        self.inner.subscribers.lock().push(entry);
        subscription
    }

    /// Lift this cell into an expression.
    pub fn expr(&self) -> DerivedExpression {
        DerivedExpression::cell(self.clone())
    }
}

macro_rules! binary_builders {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self, rhs: impl Into<DerivedExpression>) -> DerivedExpression {
                self.expr().$name(rhs)
            }
        )*
    };
}

/// Expression builders. Each returns a [`DerivedExpression`] with this cell
/// as the left operand.
#[allow(clippy::should_implement_trait)]
impl ReactiveCell {
    binary_builders!(
        /// `self + rhs`; concatenates when either side is a string.
        add,
        sub,
        /// `self * rhs`; repeats a string or list by an int.
        mul,
        /// True division.
        div,
        floor_div,
        rem,
        pow,
        equals,
        not_equals,
        less_than,
        less_equal,
        greater_than,
        greater_equal,
        and,
        or,
    );

    pub fn not(&self) -> DerivedExpression {
        self.expr().not()
    }

    pub fn neg(&self) -> DerivedExpression {
        self.expr().neg()
    }
}

impl fmt::Debug for ReactiveCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("name", &self.inner.name)
            .field("default", &self.inner.default)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
