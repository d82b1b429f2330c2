//! Common error types for Sealbox.

use std::fmt;
use thiserror::Error;

/// Top-level error type for Sealbox operations.
///
/// Every variant maps to a stable [`ErrorKind`] so callers on the other side
/// of a method-call boundary can branch on a code instead of a message.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform key store is unavailable or locked.
    #[error("Key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// The user denied authentication or the prompt reported an error.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller cancelled an in-flight authentication prompt.
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// A key was not found and could not be created.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailure(String),

    /// A wrapped key failed its integrity check or has the wrong shape.
    #[error("Key unwrap failed: {0}")]
    UnwrapFailure(String),

    /// Ciphertext was malformed, truncated, or failed authentication.
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// A cipher needed for migration could not be constructed.
    #[error("Migration initialization failed: {0}")]
    MigrationInitFailure(String),

    /// The platform tier is too old for the requested algorithm.
    #[error("Platform capability unsupported: {0}")]
    PlatformCapabilityUnsupported(String),

    /// A request was missing a required field or carried an invalid value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyStoreUnavailable(_) => ErrorKind::KeyStoreUnavailable,
            Error::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Error::OperationCancelled(_) => ErrorKind::OperationCancelled,
            Error::KeyGenerationFailure(_) => ErrorKind::KeyGenerationFailure,
            Error::UnwrapFailure(_) => ErrorKind::UnwrapFailure,
            Error::DecryptionFailure(_) => ErrorKind::DecryptionFailure,
            Error::MigrationInitFailure(_) => ErrorKind::MigrationInitFailure,
            Error::PlatformCapabilityUnsupported(_) => ErrorKind::PlatformCapabilityUnsupported,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Storage(_) | Error::Io(_) => ErrorKind::Storage,
        }
    }

    /// True for failures that come from the user or caller rather than from
    /// broken key material. These are never eligible for reset-on-error.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed(_) | Error::OperationCancelled(_)
        )
    }
}

/// Error classification with stable string codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyStoreUnavailable,
    AuthenticationFailed,
    OperationCancelled,
    KeyGenerationFailure,
    UnwrapFailure,
    DecryptionFailure,
    MigrationInitFailure,
    PlatformCapabilityUnsupported,
    InvalidArgument,
    Storage,
}

impl ErrorKind {
    /// Code reported across the method-call boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::KeyStoreUnavailable => "KEY_STORE_UNAVAILABLE",
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::OperationCancelled => "OPERATION_CANCELLED",
            ErrorKind::KeyGenerationFailure => "KEY_GENERATION_FAILURE",
            ErrorKind::UnwrapFailure => "UNWRAP_FAILURE",
            ErrorKind::DecryptionFailure => "DECRYPTION_FAILURE",
            ErrorKind::MigrationInitFailure => "MIGRATION_INIT_FAILURE",
            ErrorKind::PlatformCapabilityUnsupported => "PLATFORM_CAPABILITY_UNSUPPORTED",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Storage => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
