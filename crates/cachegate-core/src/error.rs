use thiserror::Error;

/// Canonical error type for cache, sync, eviction and migration operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key is absent or its deletion is pending.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"entry"`, `"object"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Caller supplied input that can never succeed (empty key, empty patch,
    /// forbidden aggregation stage, malformed payload).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing or unknown access token.
    #[error("unauthorized")]
    Unauthorized,

    /// Storage engine or metadata store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A claimed entry could be neither written to cold storage nor restored
    /// locally. The entry's latest payload may only exist in logs.
    #[error("entry `{key}` is inconsistent: {message}")]
    Inconsistency {
        /// Key of the affected entry.
        key: String,
        /// What failed while restoring it.
        message: String,
    },

    /// Operation is not allowed in the current state (e.g. migration disabled).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error from a local backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidArgument` variant.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates an `Unavailable` variant.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates an `Inconsistency` variant.
    #[must_use]
    pub fn inconsistency(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inconsistency {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
