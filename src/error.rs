//! Error types for document loading, setup, validation and invocation.

use std::path::PathBuf;

use http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::types::{AccessTier, Operation};

/// Errors while loading or interpreting a resource document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid annotation at {path}: expected string or object, got {actual}")]
    InvalidAnnotationType { path: String, actual: String },

    #[error("unknown access \"{value}\" at {path}: expected client, server, admin, or omit")]
    UnknownAccess { path: String, value: String },

    #[error("invalid resource document: {message}")]
    InvalidDocument { message: String },

    #[error("invalid schema for {context}: {message}")]
    InvalidSchema { context: String, message: String },

    #[error("failed to bundle schema: {message}")]
    BundleError { message: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors raised while building the capability table or synthesizing handlers.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no admin schema for {operation}, but a lower tier defines one")]
    MissingAdminSchema { operation: Operation },

    #[error("{operation} has a callback but no tier defines a schema for it")]
    NoAvailableTier { operation: Operation },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },
}

/// Single validation reason with path context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Prepend a path segment, e.g. `/name` under `body` becomes `/body/name`.
    pub fn nested(mut self, prefix: &str) -> Self {
        self.path = format!("/{}{}", prefix, self.path);
        self
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn join_reasons(errors: &[SchemaError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A value failed schema validation inside the dispatcher.
///
/// This is an assertion-style failure: either the caller bypassed transport
/// validation, or a callback returned malformed data.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed in CRUD handler: {}", join_reasons(.errors))]
pub struct ValidationFailure {
    /// Which step failed, e.g. `Input validation` or `Result server validation`.
    pub stage: String,
    /// The offending value (`None` when it was absent).
    pub value: Option<Value>,
    pub errors: Vec<SchemaError>,
}

/// Failure of a single dispatcher invocation.
#[derive(Debug, Error)]
pub enum CrudError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// Raised by the prepare hook or the operation callback, passed through unchanged.
    #[error(transparent)]
    Business(anyhow::Error),

    /// The caller's identity carries a different tier than the handler runs at.
    #[error("caller tier {actual} does not match handler tier {expected}")]
    TierMismatch {
        expected: AccessTier,
        actual: AccessTier,
    },
}

impl CrudError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CrudError::Validation(_))
    }

    /// The business error, if this is one.
    pub fn business(&self) -> Option<&anyhow::Error> {
        match self {
            CrudError::Business(err) => Some(err),
            _ => None,
        }
    }
}

/// Wrapper for errors raised by a programmatic (direct) invocation.
///
/// Keeps business errors (e.g. [`StatusError`]) from being caught by outer
/// error handling meant for the caller's own errors. Unwrap with
/// [`InvocationError::cause`] before matching on the original error.
#[derive(Debug, Error)]
#[error(
    "error while invoking CRUD handler programmatically; this wraps the original error, see cause(): {cause}"
)]
pub struct InvocationError {
    #[source]
    cause: CrudError,
}

impl InvocationError {
    pub fn new(cause: CrudError) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &CrudError {
        &self.cause
    }

    pub fn into_cause(self) -> CrudError {
        self.cause
    }
}

/// Business error carrying the HTTP status it should surface as.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct StatusError {
    pub status: StatusCode,
    pub message: String,
}

impl StatusError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

/// Errors surfaced by an HTTP route handler.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The request did not match the shape the caller's tier accepts.
    #[error("bad request: {}", join_reasons(.errors))]
    BadRequest { errors: Vec<SchemaError> },

    #[error("access type {tier} is not allowed for this endpoint (allowed: {allowed:?})")]
    AccessTypeNotAllowed {
        tier: AccessTier,
        allowed: Vec<AccessTier>,
    },

    #[error("method {method} not allowed, expected {expected}")]
    MethodNotAllowed {
        method: http::Method,
        expected: http::Method,
    },

    #[error(transparent)]
    Crud(#[from] CrudError),
}

impl RouteError {
    /// HTTP status this error should be answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouteError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            RouteError::AccessTypeNotAllowed { .. } => StatusCode::FORBIDDEN,
            RouteError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RouteError::Crud(CrudError::Validation(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            RouteError::Crud(CrudError::TierMismatch { .. }) => StatusCode::FORBIDDEN,
            RouteError::Crud(CrudError::Business(err)) => err
                .downcast_ref::<StatusError>()
                .map(|e| e.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}
