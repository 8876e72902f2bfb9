//! Error types for file storage.

use std::io;

use thiserror::Error;

/// Primary error type for the file engine.
#[derive(Debug, Error)]
pub enum FileError {
    /// Upload exceeds the configured size ceiling.
    #[error("file too large")]
    FileTooLarge {
        /// Upload size in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        max: u64,
    },
    /// The file extension is blocked or not in the endpoint's allow-list.
    #[error("file extension denied")]
    ExtensionDenied {
        /// The rejected extension.
        extension: String,
    },
    /// Target exists and overwrite was not requested.
    #[error("file already exists")]
    FileExists {
        /// Relative path of the existing file.
        path: String,
    },
    /// No file matches the identifier.
    #[error("file not found")]
    FileNotFound {
        /// The presented file identifier.
        file_id: String,
    },
    /// A path tried to leave its storage area.
    #[error("path escapes the storage area")]
    PathEscape {
        /// The offending path.
        path: String,
    },
    /// The identifier does not decode to a storage reference.
    #[error("invalid file identifier")]
    InvalidFileId {
        /// The presented identifier.
        file_id: String,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

/// Convenience alias for file engine results.
pub type FileResult<T> = Result<T, FileError>;
