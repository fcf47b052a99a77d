//! Error handling types

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mtx tool execution core
#[derive(Error, Debug)]
pub enum Error {
    /// Parameters or an envelope failed declarative validation
    #[error("Schema violation: {message}")]
    SchemaViolation {
        /// Description of the validation failure
        message: String,
    },

    /// Event is illegal in the machine's current state
    #[error("Invalid state: event {event} not allowed in state {state}")]
    InvalidState {
        /// The rejected event
        event: String,
        /// The state the machine was in
        state: String,
    },

    /// The session lock could not be acquired
    #[error("Lock unavailable for session {session_id}")]
    LockUnavailable {
        /// Session whose lock is held elsewhere
        session_id: String,
    },

    /// A tool handler returned an error or panicked
    #[error("Handler error: {message}")]
    Handler {
        /// Message carried from the handler
        message: String,
    },

    /// A tool handler exceeded the operation timeout
    #[error("Handler timed out after {timeout_ms}ms")]
    HandlerTimeout {
        /// The timeout budget that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Underlying session store or cache backend failed
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Stored session payload cannot be parsed
    #[error("Corrupted session {session_id}: {message}")]
    CorruptedSession {
        /// Session whose payload is unreadable
        session_id: String,
        /// Parse failure detail
        message: String,
    },

    /// Tool or session absent
    #[error("Not found: {resource}")]
    NotFound {
        /// The resource that was not found
        resource: String,
    },

    /// Operation attempted after `disconnect`
    #[error("Store is closed")]
    StoreClosed,

    /// Missing configuration value
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    /// Invalid configuration value
    #[error("Invalid configuration for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key that is invalid
        key: String,
        /// Reason why it is invalid
        message: String,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error
        #[from]
        source: serde_json::Error,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create a schema violation error
    pub fn schema_violation<S: Into<String>>(message: S) -> Self {
        Self::SchemaViolation {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state<E: Into<String>, S: Into<String>>(event: E, state: S) -> Self {
        Self::InvalidState {
            event: event.into(),
            state: state.into(),
        }
    }

    /// Create a lock unavailable error
    pub fn lock_unavailable<S: Into<String>>(session_id: S) -> Self {
        Self::LockUnavailable {
            session_id: session_id.into(),
        }
    }

    /// Create a handler error
    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a corrupted session error
    pub fn corrupted_session<I: Into<String>, S: Into<String>>(session_id: I, message: S) -> Self {
        Self::CorruptedSession {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error kind label, used in envelope messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "SchemaViolation",
            Self::InvalidState { .. } => "InvalidState",
            Self::LockUnavailable { .. } => "LockUnavailable",
            Self::Handler { .. } => "HandlerError",
            Self::HandlerTimeout { .. } => "HandlerTimeout",
            Self::Storage { .. } => "StorageError",
            Self::CorruptedSession { .. } => "CorruptedSession",
            Self::NotFound { .. } => "NotFound",
            Self::StoreClosed => "StoreClosed",
            Self::ConfigMissing(_) | Self::ConfigInvalid { .. } => "ConfigError",
            Self::Json { .. } | Self::Internal { .. } => "InternalError",
        }
    }

    /// Stable status code surfaced in response envelopes
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SchemaViolation { .. } => 422,
            Self::InvalidState { .. } | Self::LockUnavailable { .. } => 409,
            Self::HandlerTimeout { .. } => 504,
            Self::Storage { .. } => 503,
            Self::NotFound { .. } => 404,
            Self::StoreClosed => 410,
            Self::Handler { .. }
            | Self::CorruptedSession { .. }
            | Self::ConfigMissing(_)
            | Self::ConfigInvalid { .. }
            | Self::Json { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Bare failure detail without the kind prefix, used when composing
    /// envelope messages of the form `"<Kind>: <detail>"`.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::SchemaViolation { message }
            | Self::Handler { message }
            | Self::Storage { message, .. }
            | Self::Internal { message } => message.clone(),
            Self::InvalidState { event, state } => {
                format!("event {event} not allowed in state {state}")
            }
            Self::LockUnavailable { session_id } => {
                format!("session {session_id} is locked by another operation")
            }
            Self::HandlerTimeout { timeout_ms } => {
                format!("handler exceeded {timeout_ms}ms")
            }
            Self::CorruptedSession {
                session_id,
                message,
            } => format!("session {session_id}: {message}"),
            Self::NotFound { resource } => resource.clone(),
            Self::StoreClosed => "store is closed".to_owned(),
            Self::ConfigMissing(key) => key.clone(),
            Self::ConfigInvalid { key, message } => format!("{key}: {message}"),
            Self::Json { source } => source.to_string(),
        }
    }

    /// Whether a caller may reasonably retry the failed operation
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::Storage { .. } | Self::HandlerTimeout { .. }
        )
    }
}
