//! Error types for drowsywatch.
//!
//! This module defines all error types used throughout the drowsywatch crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for drowsywatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Vision Errors ===
    /// The frame source could not be opened or read.
    #[error("camera '{name}' failed: {message}")]
    Camera {
        /// Name of the frame source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// Face detection or landmark prediction failed.
    #[error("vision error: {0}")]
    Vision(String),

    /// A landmark set did not have the expected number of points.
    #[error("expected {expected} landmarks, got {actual}")]
    LandmarkCount {
        /// Number of points the predictor contract requires.
        expected: usize,
        /// Number of points actually supplied.
        actual: usize,
    },

    /// A `.pts` annotation file could not be parsed.
    #[error("malformed landmark file {path}: {message}")]
    LandmarkParse {
        /// Path to the annotation file.
        path: PathBuf,
        /// Description of the parse failure.
        message: String,
    },

    /// Image decoding or JPEG encoding failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    // === Contact Errors ===
    /// The submitted contact was rejected.
    #[error("invalid contact: {message}")]
    InvalidContact {
        /// Why the contact was rejected.
        message: String,
    },

    // === Alert Errors ===
    /// An alert channel failed to deliver.
    #[error("alert channel '{channel}' failed: {message}")]
    AlertSend {
        /// Name of the alert channel.
        channel: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Network Errors ===
    /// An outbound HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Downloading the landmark model failed.
    #[error("failed to download model from {url}: {message}")]
    ModelDownload {
        /// URL the model was fetched from.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The HTTP server could not bind or serve.
    #[error("server error: {0}")]
    Server(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for drowsywatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for Error {
    fn from(err: opencv::Error) -> Self {
        Self::Vision(err.to_string())
    }
}

impl Error {
    /// Create a new camera error.
    #[must_use]
    pub fn camera(name: &'static str, message: impl Into<String>) -> Self {
        Self::Camera {
            name,
            message: message.into(),
        }
    }

    /// Create a new vision error.
    #[must_use]
    pub fn vision(message: impl Into<String>) -> Self {
        Self::Vision(message.into())
    }

    /// Create a new alert delivery error.
    #[must_use]
    pub fn alert_send(channel: &'static str, message: impl Into<String>) -> Self {
        Self::AlertSend {
            channel,
            message: message.into(),
        }
    }

    /// Create an invalid contact error.
    #[must_use]
    pub fn invalid_contact(message: impl Into<String>) -> Self {
        Self::InvalidContact {
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error was caused by user input rather than the system.
    #[must_use]
    pub fn is_invalid_contact(&self) -> bool {
        matches!(self, Self::InvalidContact { .. })
    }

    /// Check if this error came from the frame source.
    #[must_use]
    pub fn is_camera_error(&self) -> bool {
        matches!(self, Self::Camera { .. })
    }
}
