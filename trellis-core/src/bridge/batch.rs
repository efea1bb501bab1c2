//! Rendered update batches.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::session::{ComponentId, SessionId};

/// Re-rendered output of a session's dirty components, in render order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedBatch {
    pub session_id: SessionId,
    pub updates: IndexMap<ComponentId, String>,
}

impl RenderedBatch {
    pub fn new(session_id: SessionId, updates: IndexMap<ComponentId, String>) -> Self {
        Self {
            session_id,
            updates,
        }
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Encode as MessagePack with field names, for the wire.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
