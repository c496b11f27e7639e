//! Error types for the groupmind-rs engine.
//!
//! Structured error types that preserve context and enable proper error
//! propagation through the store, graph, learner, and engine pipeline.

use std::io;

use thiserror::Error;

/// Main result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Comprehensive error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Contract violations: out-of-universe identity, unknown group/edge id,
    /// malformed snapshot JSON. No partial state change is made.
    #[error("domain error: {message}")]
    Domain {
        /// Human-readable description
        message: String,
        /// Field or id implicated, if any
        field: Option<String>,
    },

    /// Configuration errors (invalid thresholds, non-positive caps, ...).
    #[error("configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// Serialization/deserialization errors for persistence snapshots.
    #[error("serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors encountered while loading/saving a snapshot file.
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Generic internal invariant violation (should not happen; indicates a bug).
    #[error("internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl EngineError {
    /// Create a new domain error.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new domain error naming the offending field/id.
    pub fn domain_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context.
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Attach context to an existing error.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    /// Create an I/O error with context.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors, mirroring `anyhow::Context`
/// but preserving the structured `EngineError` type.
pub trait ResultExt<T> {
    /// Add context to an error result, lazily.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result.
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EngineError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
