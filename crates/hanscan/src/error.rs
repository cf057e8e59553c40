//! Error types for hanscan.
//!
//! All fallible operations in the library return [`Result`]. The taxonomy
//! mirrors how failures propagate through a batch run:
//!
//! - `Io` (from `std::io::Error`) always bubbles up unchanged: a failure to
//!   read the input directory or to persist a checkpoint is batch-fatal.
//! - `Engine` covers a single extraction call failing or timing out; the
//!   engine stack converts it into fallback, so it is fatal to nothing.
//! - `EngineUnavailable` is a startup-time capability downgrade: the backend
//!   is skipped for the entire run and the run continues.
//! - `Checkpoint` is reserved for *write* failures; an unreadable record is
//!   not an error at all (the page is recomputed from scratch).
//! - `ImageProcessing`, `Serialization`, `Validation` wrap their causes with
//!   context and are contained to the page or the config they concern.
use thiserror::Error;

/// Result type alias using [`HanscanError`].
pub type Result<T> = std::result::Result<T, HanscanError>;

/// Main error type for all hanscan operations.
#[derive(Debug, Error)]
pub enum HanscanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {message}")]
    ImageProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Engine error: {message}")]
    Engine {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Checkpoint error: {message}")]
    Checkpoint {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for HanscanError {
    fn from(err: serde_json::Error) -> Self {
        HanscanError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for HanscanError {
    fn from(err: image::ImageError) -> Self {
        HanscanError::ImageProcessing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl HanscanError {
    error_constructor!(image_processing, ImageProcessing);
    error_constructor!(engine, Engine);
    error_constructor!(checkpoint, Checkpoint);
    error_constructor!(serialization, Serialization);
    error_constructor!(validation, Validation);
}
