//! Reactive Primitives
//!
//! This module implements session-scoped reactivity: cells, derived
//! expressions, subscriptions, and the dependency tracker that decides
//! which components must be rebuilt after a write.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`ReactiveCell`] names a piece of state. Its value lives in the store
//! of the session the caller's [`SessionContext`] addresses, so one cell
//! serves every session independently. Reading a cell while a component is
//! rendering records that component as a dependent.
//!
//! ## Derived Expressions
//!
//! A [`DerivedExpression`] composes cells with arithmetic, comparison and
//! boolean operators. It is an explicit tree evaluated on demand, never a
//! cached value.
//!
//! ## Subscriptions
//!
//! A [`Subscription`] is a callback fired synchronously by
//! [`ReactiveCell::set`], with the new value and optionally the previous one.
//!
//! # Implementation Notes
//!
//! There is no thread-local "current session". Every read and write takes a
//! [`SessionContext`], and crossing into a worker thread means cloning it.

mod cell;
mod context;
mod expr;
mod subscription;
mod tracker;

pub use cell::ReactiveCell;
pub use context::SessionContext;
pub use expr::{BinaryOp, CompareOp, ComputeFn, DerivedExpression, Expr};
pub use subscription::{Subscription, SubscriptionId};
pub use tracker::DependencyTracker;
