//! Error handling for the acquisition pipeline
//!
//! This module defines the crate-wide error type and a Result alias used by
//! the controller, configuration and device layers. Pipeline internals have
//! their own [`crate::pipeline::PipelineError`] which converts into this one.

use crate::acq_tree::TreeError;
use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for scopy-acq operations
#[derive(Error, Debug)]
pub enum AcqError {
    /// Errors reported by a device backend
    #[error("Device error: {0}")]
    Device(String),

    /// The device did not answer the health check before start
    #[error("Device {uri} is unreachable")]
    DeviceUnreachable { uri: String },

    /// The device refused to allocate a capture buffer
    #[error("Buffer creation failed: {0}")]
    BufferCreation(String),

    /// The device URI is held by another instrument
    #[error("Resource {uri} is busy (held by {holder})")]
    ResourceBusy { uri: String, holder: String },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Errors raised while building or running the flow graph
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid edits of the acquisition tree
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AcqError>,
    },
}

impl AcqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        AcqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True for failures that end the current capture and require the
    /// device connection to be re-established.
    pub fn is_fatal_to_capture(&self) -> bool {
        match self {
            AcqError::DeviceUnreachable { .. }
            | AcqError::BufferCreation(_)
            | AcqError::Device(_) => true,
            AcqError::Pipeline(e) => e.is_device_failure(),
            AcqError::WithContext { source, .. } => source.is_fatal_to_capture(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AcqError {
    fn from(err: serde_json::Error) -> Self {
        AcqError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AcqError {
    fn from(err: toml::de::Error) -> Self {
        AcqError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for AcqError {
    fn from(err: toml::ser::Error) -> Self {
        AcqError::Serialization(err.to_string())
    }
}

/// Result type alias for scopy-acq operations
pub type Result<T> = std::result::Result<T, AcqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<AcqError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
