//! Default dirty renderer.

use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use tracing::{debug, error};

use super::DirtyRenderer;
use crate::error::panic_message;
use crate::reactive::SessionContext;
use crate::session::ComponentId;

/// Rebuilds dirty components with the builders registered in the stores.
///
/// Draining is destructive: the dirty names are taken from the session, so
/// a second call with nothing changed in between renders nothing. Each
/// component's old dependencies are dropped before its builder runs, and
/// the builder runs under a component context so its reads register the
/// fresh set.
///
/// Builders are looked up in the session store first, then in the static
/// store. A dirty component with no builder anywhere is left unregistered.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuilderRenderer;

impl DirtyRenderer for BuilderRenderer {
    fn render_dirty(&self, ctx: &SessionContext) -> IndexMap<ComponentId, String> {
        let store = ctx.store();
        let dirty = store.take_dirty_components();
        if dirty.is_empty() {
            return IndexMap::new();
        }

        let static_store = ctx.registry().static_store();
        let mut rendered = IndexMap::with_capacity(dirty.len());
        for component in dirty {
            store.unregister_component(&component);

            let Some(builder) = store
                .builder(&component)
                .or_else(|| static_store.builder(&component))
            else {
                debug!(component = %component, "dirty component has no builder");
                continue;
            };

            let render_ctx = ctx.for_component(component.clone());
            match panic::catch_unwind(AssertUnwindSafe(|| builder(&render_ctx))) {
                Ok(output) => {
                    rendered.insert(component, output);
                }
                Err(payload) => {
                    error!(
                        component = %component,
                        error = %panic_message(payload.as_ref()),
                        "component builder panicked"
                    );
                }
            }
        }
        rendered
    }
}
