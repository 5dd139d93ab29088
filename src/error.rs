//! Error types for the Kubexpose controller
//!
//! Errors carry the work-queue key they relate to where one is known, so the
//! error reporter can log a single structured line per failure.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Kubexpose operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Resource store lookup failed
    #[error("store error for {key}: {message}")]
    Store {
        /// Key that was being looked up
        key: String,
        /// Description of what failed
        message: String,
    },

    /// A work-queue key that does not split into namespace/name
    #[error("invalid resource key: {key}")]
    MalformedKey {
        /// The offending key
        key: String,
    },

    /// Invalid Kubexpose spec
    #[error("validation error for {key}: {message}")]
    Validation {
        /// Key of the resource with invalid configuration
        key: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.port")
        field: Option<String>,
    },

    /// An existing dependent diverges from the desired definition
    #[error("conflict on {kind} {namespace}/{name}: {message}")]
    Conflict {
        /// Kind of the conflicting object
        kind: String,
        /// Namespace of the conflicting object
        namespace: String,
        /// Name of the conflicting object
        name: String,
        /// Which owned field diverges
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "worker", "informer")
        context: String,
    },
}

impl Error {
    /// Create a store error for the given key
    pub fn store(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed key error
    pub fn malformed_key(key: impl Into<String>) -> Self {
        Self::MalformedKey { key: key.into() }
    }

    /// Create a validation error with resource key context
    pub fn validation_for(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource key context and field path
    pub fn validation_for_field(
        key: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            key: key.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for an existing object
    pub fn conflict(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is worth retrying with backoff
    ///
    /// Malformed keys, invalid specs, conflicts and serialization failures are
    /// structural: retrying cannot change the outcome. Everything coming from the
    /// store or the API server is treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::Store { .. } => true,
            Error::MalformedKey { .. } => false,
            Error::Validation { .. } => false,
            Error::Conflict { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the work-queue key if this error is associated with one
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::Store { key, .. } => Some(key),
            Error::MalformedKey { key } => Some(key),
            Error::Validation { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Short machine-readable category, used as a metric label
    pub fn category(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Store { .. } => "store",
            Error::MalformedKey { .. } => "malformed_key",
            Error::Validation { .. } => "validation",
            Error::Conflict { .. } => "conflict",
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
        }
    }
}
