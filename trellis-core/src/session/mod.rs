//! Session Scopes
//!
//! Every connected user gets a private [`SessionStore`] holding its reactive
//! state. Content built before any session exists lives in a single static
//! store. The [`SessionRegistry`] resolves a (possibly absent) session id to
//! the right store and evicts sessions after a period of inactivity.
//!
//! Cells never hold values themselves: the store is the sole owner of value
//! storage, which is what lets one cell definition be shared by every
//! session.

mod cache;
mod ids;
mod registry;
mod store;

pub use cache::TtlCache;
pub use ids::{ComponentId, SessionId};
pub use registry::SessionRegistry;
pub use store::{Action, Builder, SessionStore};
