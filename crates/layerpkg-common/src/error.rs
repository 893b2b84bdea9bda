//! Unified error types for the layerpkg workspace.
//!
//! Every crate returns [`LayerpkgError`]. Failures deep inside one package's
//! build are wrapped with [`LayerpkgError::in_stage`] and
//! [`LayerpkgError::for_package`] on the way out so the caller can tell which
//! stage of which package broke.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LayerpkgError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The package configuration document could not be parsed.
    #[error("invalid package configuration {path}: {source}")]
    Yaml {
        /// Path of the offending document.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A blob digest did not match its descriptor.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// An external program exited unsuccessfully.
    #[error("`{program}` failed ({status})")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The image does not have a usable top layer.
    #[error("image {image} has {count} layers, expected between 1 and {max}")]
    LayerCount {
        /// Image whose layers were inspected.
        image: String,
        /// Number of layers found.
        count: usize,
        /// Largest accepted layer count.
        max: usize,
    },

    /// A layer blob uses a compression format that cannot be decoded.
    #[error("unsupported layer compression: {format}")]
    UnsupportedCompression {
        /// Detected compression format.
        format: &'static str,
    },

    /// Reading or decoding a layer archive failed.
    #[error("corrupt layer {layer}: {source}")]
    Archive {
        /// Digest of the layer being read.
        layer: String,
        /// Underlying decoding error.
        source: std::io::Error,
    },

    /// A dependency expression could not be parsed.
    #[error("invalid dependency {expression:?}: {reason}")]
    InvalidRelation {
        /// The offending expression, verbatim.
        expression: String,
        /// Why the expression was rejected.
        reason: String,
    },

    /// The dependency scanner wrote bytes that are not UTF-8.
    #[error("`{program}` wrote invalid UTF-8 at byte {offset} of its output")]
    ScannerOutput {
        /// Scanner program.
        program: String,
        /// Offset of the first invalid byte in the combined output.
        offset: usize,
    },

    /// An epoch value is not a non-negative integer.
    #[error("invalid epoch {value:?}: must be a non-negative integer")]
    InvalidEpoch {
        /// The offending literal.
        value: String,
    },

    /// The package serializer rejected the assembled package.
    #[error("package serialization failed: {message}")]
    Serializer {
        /// Message reported by the serializer.
        message: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A build stage failed.
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Name of the failed stage.
        stage: String,
        /// Cause of the failure.
        source: Box<Self>,
    },

    /// Building one package failed.
    #[error("package {package}: {source}")]
    Package {
        /// Name of the package being built.
        package: String,
        /// Cause of the failure.
        source: Box<Self>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl LayerpkgError {
    /// Wraps this error with the name of the stage it happened in.
    #[must_use]
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Wraps this error with the name of the package being built.
    #[must_use]
    pub fn for_package(self, package: impl Into<String>) -> Self {
        Self::Package {
            package: package.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` if this error, or any error it wraps, is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Stage { source, .. } | Self::Package { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LayerpkgError>;
