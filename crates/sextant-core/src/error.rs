//! Error types shared by every registry backend.

use thiserror::Error;

/// Errors returned by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No backend is installed for the connection string's scheme.
    #[error("no such registry backend: {0}")]
    UnknownBackend(String),

    /// The connection string could not be parsed.
    #[error("invalid connection string {input:?}: {reason}")]
    InvalidConnectionString { input: String, reason: String },

    /// An instance address is not of the form `host:port`.
    #[error("invalid address {0:?}: expected host:port")]
    InvalidAddress(String),

    /// An attribute override could not be parsed into its field's type.
    #[error("invalid value {value:?} for attribute {field}: {reason}")]
    InvalidAttribute {
        field: String,
        value: String,
        reason: String,
    },

    /// The backend refused the request.
    #[error("{backend} rejected {operation}: status {status} ({body})")]
    Rejected {
        backend: &'static str,
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Network or transport failure talking to the backend.
    #[error("{backend} {operation} failed: {message}")]
    Backend {
        backend: &'static str,
        operation: &'static str,
        message: String,
    },

    /// The backend answered with a payload that could not be decoded.
    #[error("malformed {backend} response: {source}")]
    MalformedResponse {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No active registration exists for the instance id.
    #[error("instance not registered: {0}")]
    NotRegistered(String),

    /// The registry has been shut down.
    #[error("registry is shut down")]
    ShutDown,

    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),
}

impl From<figment::Error> for RegistryError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl RegistryError {
    /// Creates a transport failure for `operation` against `backend`.
    #[must_use]
    pub fn backend(
        backend: &'static str,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Backend {
            backend,
            operation,
            message: message.to_string(),
        }
    }

    /// Creates a malformed-response error wrapping the decoder's error.
    #[must_use]
    pub fn malformed(
        backend: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::MalformedResponse {
            backend,
            source: source.into(),
        }
    }

    /// Returns true for failures a later attempt may succeed past: I/O
    /// errors, garbled responses and server-side (5xx) rejections.
    ///
    /// A 4xx rejection means the request itself was wrong and is not transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Backend { .. } | Self::MalformedResponse { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
