//! Per-session tool lifecycle state machine.
//!
//! Each session owns one [`ToolMachine`] driving the lifecycle
//! `idle → toolSelected → parametersSet → executing → succeeded|failed|cancelled`.
//! Terminal states are left only via `Reset`. The machine itself is pure and
//! synchronous; persistence and handler dispatch are the execution service's
//! concern.
//!
//! Transition policy:
//! - re-selection and parameter replacement are allowed in their own states;
//! - `Execute` anywhere but `parametersSet` is an [`Error::InvalidState`];
//! - completion events (`ReceivedResult`/`Error`) outside `executing` are
//!   ignored — they are late arrivals from a cancelled run;
//! - `Cancel` outside `executing` is ignored;
//! - `Reset` is accepted everywhere and keeps history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::ToolResponse;
use crate::error::{Error, Result};
use crate::utils::canonical::canonical_json;
use crate::utils::{id, time};

/// Default history retention per session; oldest entries drop first.
pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

/// Machine states. Serialized in camelCase to match the persisted wire form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MachineState {
    /// No tool selected.
    Idle,
    /// A tool name has been selected.
    ToolSelected,
    /// Parameters are set; ready to execute.
    ParametersSet,
    /// Handler dispatched, awaiting completion.
    Executing,
    /// Terminal: last run produced a result.
    Succeeded,
    /// Terminal: last run failed.
    Failed,
    /// Terminal: last run was cancelled.
    Cancelled,
}

impl MachineState {
    /// Terminal states are left only via `Reset`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Structured error recorded in the machine context on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error kind label.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Capture kind and detail from a domain error.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind().to_owned(),
            message: err.detail(),
        }
    }
}

/// One completed run, appended on every accepted `ReceivedResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Tool that produced the result.
    pub tool_name: String,
    /// SHA-256 digest of the canonical result payload.
    pub result_digest: String,
    /// ISO-8601 completion timestamp.
    pub timestamp_iso: String,
}

/// Stamp of the last accepted mutation, kept for idempotency diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStamp {
    /// Unique id of the accepted operation.
    pub operation_id: String,
    /// Tool selected at stamp time, if any.
    pub tool_name: Option<String>,
    /// ISO-8601 stamp timestamp.
    pub timestamp_iso: String,
}

/// Extended state carried alongside the machine's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineContext {
    /// Last selected tool name (set even for unknown tools).
    pub tool_name: Option<String>,
    /// Id of the resolved registered tool; `None` when the name is unknown.
    pub selected_tool: Option<String>,
    /// Parameters from the most recent `SetParameters` (replace semantics).
    pub parameters: Option<Map<String, Value>>,
    /// Terminal result envelope of the last successful run.
    pub result: Option<ToolResponse>,
    /// Structured error of the last failed run.
    pub error: Option<ErrorInfo>,
    /// Append-only run history; never contains failed or cancelled runs.
    pub history: VecDeque<HistoryEntry>,
    /// Last accepted mutation stamp.
    pub last_operation: Option<OperationStamp>,
}

/// Events accepted by the machine.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    /// Select a tool by name; `resolved` carries the registry lookup result.
    SelectTool {
        /// Requested tool name.
        name: String,
        /// Id of the registered tool, `None` when unknown.
        resolved: Option<String>,
    },
    /// Replace the parameter map.
    SetParameters(Map<String, Value>),
    /// Dispatch the handler.
    Execute,
    /// Handler completed with a result envelope.
    ReceivedResult(ToolResponse),
    /// Handler failed.
    Error(ErrorInfo),
    /// Cooperative cancellation of an executing run.
    Cancel,
    /// Return to `idle`, clearing everything but history.
    Reset,
}

impl MachineEvent {
    /// Event name used in `InvalidState` diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectTool { .. } => "SELECT_TOOL",
            Self::SetParameters(_) => "SET_PARAMETERS",
            Self::Execute => "EXECUTE",
            Self::ReceivedResult(_) => "RECEIVED_RESULT",
            Self::Error(_) => "ERROR",
            Self::Cancel => "CANCEL",
            Self::Reset => "RESET",
        }
    }
}

/// Outcome of [`ToolMachine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event was accepted; the machine is now in this state.
    Accepted(MachineState),
    /// The event was dropped per the transition policy (late completion,
    /// cancel outside `executing`); the machine is unchanged.
    Ignored,
}

/// Serialized form persisted to the session store: `{value, context}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Current state.
    pub value: MachineState,
    /// Extended state.
    pub context: MachineContext,
}

impl Default for MachineSnapshot {
    fn default() -> Self {
        Self {
            value: MachineState::Idle,
            context: MachineContext::default(),
        }
    }
}

/// The per-session lifecycle machine.
#[derive(Debug, Clone)]
pub struct ToolMachine {
    state: MachineState,
    context: MachineContext,
    history_limit: usize,
}

impl ToolMachine {
    /// Fresh machine in `idle`.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: MachineState::Idle,
            context: MachineContext::default(),
            history_limit,
        }
    }

    /// Restore a machine from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: MachineSnapshot, history_limit: usize) -> Self {
        Self {
            state: snapshot.value,
            context: snapshot.context,
            history_limit,
        }
    }

    /// Serialized form for persistence.
    #[must_use]
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            value: self.state,
            context: self.context.clone(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Extended state.
    #[must_use]
    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    /// Drive the machine with one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the event is illegal in the
    /// current state (e.g. `Execute` outside `parametersSet`). Events the
    /// policy drops silently yield `Ok(Transition::Ignored)` instead.
    pub fn send(&mut self, event: MachineEvent) -> Result<Transition> {
        let outcome = match (self.state, event) {
            (
                MachineState::Idle | MachineState::ToolSelected,
                MachineEvent::SelectTool { name, resolved },
            ) => {
                self.context.tool_name = Some(name);
                self.context.selected_tool = resolved;
                self.context.parameters = None;
                self.context.result = None;
                self.context.error = None;
                self.state = MachineState::ToolSelected;
                Transition::Accepted(self.state)
            }
            (
                MachineState::ToolSelected | MachineState::ParametersSet,
                MachineEvent::SetParameters(params),
            ) => {
                self.context.parameters = Some(params);
                self.state = MachineState::ParametersSet;
                Transition::Accepted(self.state)
            }
            (MachineState::ParametersSet, MachineEvent::Execute) => {
                self.state = MachineState::Executing;
                Transition::Accepted(self.state)
            }
            (MachineState::Executing, MachineEvent::ReceivedResult(result)) => {
                self.push_history(&result);
                self.context.result = Some(result);
                self.context.error = None;
                self.state = MachineState::Succeeded;
                Transition::Accepted(self.state)
            }
            (MachineState::Executing, MachineEvent::Error(info)) => {
                self.context.error = Some(info);
                self.context.result = None;
                self.state = MachineState::Failed;
                Transition::Accepted(self.state)
            }
            (MachineState::Executing, MachineEvent::Cancel) => {
                self.context.result = None;
                self.state = MachineState::Cancelled;
                Transition::Accepted(self.state)
            }
            // Late completions from a cancelled run and stray cancels.
            (_, MachineEvent::ReceivedResult(_) | MachineEvent::Error(_) | MachineEvent::Cancel) => {
                Transition::Ignored
            }
            (_, MachineEvent::Reset) => {
                self.context.tool_name = None;
                self.context.selected_tool = None;
                self.context.parameters = None;
                self.context.result = None;
                self.context.error = None;
                self.state = MachineState::Idle;
                Transition::Accepted(self.state)
            }
            (state, event) => {
                return Err(Error::invalid_state(event.name(), state.to_string()));
            }
        };

        if let Transition::Accepted(_) = outcome {
            self.context.last_operation = Some(OperationStamp {
                operation_id: id::generate().to_string(),
                tool_name: self.context.tool_name.clone(),
                timestamp_iso: time::to_iso(&time::now_utc()),
            });
        }
        Ok(outcome)
    }

    fn push_history(&mut self, result: &ToolResponse) {
        let payload = result.data.clone().unwrap_or(Value::Null);
        self.context.history.push_back(HistoryEntry {
            tool_name: self.context.tool_name.clone().unwrap_or_default(),
            result_digest: id::content_digest(&canonical_json(&payload)),
            timestamp_iso: time::to_iso(&time::now_utc()),
        });
        while self.context.history.len() > self.history_limit {
            self.context.history.pop_front();
        }
    }
}

impl Default for ToolMachine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
