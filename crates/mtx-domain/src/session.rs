//! Durable per-caller session state.
//!
//! A [`Session`] is everything the store persists under
//! `{prefix}session:{id}`: the machine snapshot, per-tool handler state
//! blobs, and bookkeeping timestamps. Its serialized form round-trips
//! exactly through either store backend.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::machine::MachineSnapshot;
use crate::utils::time;

/// Durable session state bound to a caller-supplied id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Caller-supplied or generated session id.
    pub id: String,
    /// State machine snapshot: `{value, context}`.
    pub machine: MachineSnapshot,
    /// Opaque per-tool state blobs, keyed by tool id. This is the only
    /// mechanism by which handlers accumulate cross-call state.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_state: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session in the machine's `idle` state.
    #[must_use]
    pub fn new<S: Into<String>>(id: S) -> Self {
        let now = time::now_utc();
        Self {
            id: id.into(),
            machine: MachineSnapshot::default(),
            tool_state: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp the last-mutation time.
    pub fn touch(&mut self) {
        self.updated_at = time::now_utc();
    }

    /// Handler state blob for a tool, if any prior run stored one.
    #[must_use]
    pub fn tool_state_for(&self, tool_id: &str) -> Option<&Value> {
        self.tool_state.get(tool_id)
    }

    /// Replace a tool's handler state blob.
    pub fn set_tool_state<S: Into<String>>(&mut self, tool_id: S, state: Value) {
        self.tool_state.insert(tool_id.into(), state);
    }
}
