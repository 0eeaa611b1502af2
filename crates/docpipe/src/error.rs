//! Error types for docpipe.
//!
//! All fallible operations return [`Result`] with [`DocpipeError`]. The
//! variants correspond to the error kinds a pipeline consumer can observe:
//!
//! - `Io` - stream read failures, unreadable paths (always bubble up unchanged)
//! - `FileEncrypted` - the input is password protected
//! - `UninterpretableData` - the format expected a structure the bytes do not satisfy
//! - `UnknownFormat` - no parser claims the detected MIME type
//! - `ResourceExhausted` - allocation failure or expired deadline
//! - `ExternalLibrary` - wrapped foreign decoder error
//! - `Validation` - API misuse (bad arguments, pipeline without a leaf)
//!
//! Errors carry a nested chain: an inner cause plus outer context frames.
//! Frames are attached with [`ErrorContext::context`] at each call site, so
//! `std::error::Error::source()` walks from the outermost frame (e.g.
//! `record=42`) down to the root cause.
use thiserror::Error;

/// Result type alias using `DocpipeError`.
pub type Result<T> = std::result::Result<T, DocpipeError>;

/// Main error type for all docpipe operations.
#[derive(Debug, Error)]
pub enum DocpipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is password protected. The message names the encryption
    /// scheme when it could be determined (e.g. "RC4 encryption").
    #[error("file is encrypted: {message}")]
    FileEncrypted {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("uninterpretable data: {message}")]
    UninterpretableData {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("unknown format: {0}")]
    UnknownFormat(String),

    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("external library failure: {message}")]
    ExternalLibrary {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A context frame wrapped around an inner error. Created by
    /// [`ErrorContext::context`]; the message holds `name=value` pairs
    /// describing the parse location (file, record number, offset).
    #[error("{frame}")]
    Context {
        frame: String,
        #[source]
        source: Box<DocpipeError>,
    },
}

macro_rules! error_constructor {
    ($(#[$meta:meta])* $name:ident, $variant:ident) => {
        $(#[$meta])*
        pub fn $name<S: Into<String>>(message: S) -> Self {
            Self::$variant {
                message: message.into(),
                source: None,
            }
        }
    };
}

macro_rules! error_constructor_with_source {
    ($name:ident, $variant:ident) => {
        pub fn $name<S, E>(message: S, source: E) -> Self
        where
            S: Into<String>,
            E: std::error::Error + Send + Sync + 'static,
        {
            Self::$variant {
                message: message.into(),
                source: Some(Box::new(source)),
            }
        }
    };
}

impl DocpipeError {
    error_constructor!(
        /// Create a `FileEncrypted` error, optionally naming the scheme.
        file_encrypted, FileEncrypted);
    error_constructor!(uninterpretable_data, UninterpretableData);
    error_constructor!(resource_exhausted, ResourceExhausted);
    error_constructor!(external_library, ExternalLibrary);
    error_constructor!(validation, Validation);

    error_constructor_with_source!(uninterpretable_data_with_source, UninterpretableData);
    error_constructor_with_source!(external_library_with_source, ExternalLibrary);
    error_constructor_with_source!(validation_with_source, Validation);

    /// The stable kind tag of this error, as observed by pipeline consumers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocpipeError::Io(_) => ErrorKind::IoFailure,
            DocpipeError::FileEncrypted { .. } => ErrorKind::FileEncrypted,
            DocpipeError::UninterpretableData { .. } => ErrorKind::UninterpretableData,
            DocpipeError::UnknownFormat(_) => ErrorKind::UnknownFormat,
            DocpipeError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            DocpipeError::ExternalLibrary { .. } => ErrorKind::ExternalLibraryFailure,
            DocpipeError::Validation { .. } => ErrorKind::Validation,
            DocpipeError::Context { source, .. } => source.kind(),
        }
    }

    /// Walk context frames down to the root error.
    pub fn root(&self) -> &DocpipeError {
        match self {
            DocpipeError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Stable error-kind tags, independent of the concrete error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileEncrypted,
    UninterpretableData,
    UnknownFormat,
    IoFailure,
    ResourceExhausted,
    ExternalLibraryFailure,
    Validation,
}

/// Attach a named context frame to an error or result.
///
/// ```
/// use docpipe::error::{DocpipeError, ErrorContext, Result};
///
/// fn read_record(n: u32) -> Result<()> {
///     Err(DocpipeError::uninterpretable_data("record too short")).context("record", n)
/// }
///
/// let err = read_record(42).unwrap_err();
/// assert_eq!(err.to_string(), "record=42");
/// assert!(std::error::Error::source(&err).is_some());
/// ```
pub trait ErrorContext<T> {
    fn context<V: std::fmt::Display>(self, name: &str, value: V) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context<V: std::fmt::Display>(self, name: &str, value: V) -> Result<T> {
        self.map_err(|e| DocpipeError::Context {
            frame: format!("{}={}", name, value),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DocpipeError = io_err.into();
        assert!(matches!(err, DocpipeError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_file_encrypted() {
        let err = DocpipeError::file_encrypted("RC4 encryption");
        assert_eq!(err.to_string(), "file is encrypted: RC4 encryption");
        assert_eq!(err.kind(), ErrorKind::FileEncrypted);
    }

    #[test]
    fn test_uninterpretable_data_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad data");
        let err = DocpipeError::uninterpretable_data_with_source("BOF record not found", source);
        assert_eq!(err.to_string(), "uninterpretable data: BOF record not found");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unknown_format() {
        let err = DocpipeError::UnknownFormat("application/x-whatever".to_string());
        assert_eq!(err.kind(), ErrorKind::UnknownFormat);
        assert!(err.to_string().contains("application/x-whatever"));
    }

    #[test]
    fn test_context_frames_chain() {
        let inner: Result<()> = Err(DocpipeError::uninterpretable_data("truncated record"));
        let err = inner
            .context("record", 42)
            .context("file", "x.doc")
            .unwrap_err();
        assert_eq!(err.to_string(), "file=x.doc");
        let mid = std::error::Error::source(&err).unwrap();
        assert_eq!(mid.to_string(), "record=42");
        let root = err.root();
        assert_eq!(root.kind(), ErrorKind::UninterpretableData);
    }

    #[test]
    fn test_kind_through_context() {
        let err: Result<()> = Err(DocpipeError::file_encrypted("unknown scheme"));
        let err = err.context("offset", "0x1A0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileEncrypted);
    }
}
