use std::fmt;

use crate::uuid::ParseUuidError;

/// A result type hardwired to use [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type used throughout this library.
///
/// Returned by every tree mutation, by the advertising protocol and by bus setup. Failures of
/// user callbacks are reported separately, as [`CallbackError`].
#[derive(Debug)]
pub struct Error {
    inner: ErrorKind,
}

impl Error {
    pub(crate) fn from(e: impl Into<ErrorKind>) -> Self {
        Self { inner: e.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorKind::Zbus(e) => e.fmt(f),
            ErrorKind::Fdo(e) => e.fmt(f),
            ErrorKind::Zvariant(e) => e.fmt(f),
            ErrorKind::ParseUuidError(e) => e.fmt(f),
            ErrorKind::Other(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Zbus(zbus::Error),
    Fdo(zbus::fdo::Error),
    Zvariant(zbus::zvariant::Error),
    ParseUuidError(ParseUuidError),
    Other(String),
}

impl From<zbus::Error> for ErrorKind {
    fn from(value: zbus::Error) -> Self {
        Self::Zbus(value)
    }
}

impl From<zbus::fdo::Error> for ErrorKind {
    fn from(value: zbus::fdo::Error) -> Self {
        Self::Fdo(value)
    }
}

impl From<zbus::zvariant::Error> for ErrorKind {
    fn from(value: zbus::zvariant::Error) -> Self {
        Self::Zvariant(value)
    }
}

impl From<ParseUuidError> for ErrorKind {
    fn from(value: ParseUuidError) -> Self {
        Self::ParseUuidError(value)
    }
}

impl From<String> for ErrorKind {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<&str> for ErrorKind {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

/// Error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type of the read/write dispatch path.
///
/// Carries one of two numeric codes (see [`CallbackError::code`]) and a message. When a dispatch
/// fails while serving a D-Bus call, the error is sent back to BlueZ as `org.bluez.Error.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    kind: CallbackErrorKind,
    message: String,
}

/// The closed set of [`CallbackError`] causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackErrorKind {
    /// No callback is configured for the requested operation.
    NotRegistered,
    /// The callback ran and returned an error.
    FunctionError,
}

impl CallbackErrorKind {
    /// Returns the numeric code associated with this kind.
    pub const fn code(self) -> i32 {
        match self {
            Self::NotRegistered => CallbackError::CALLBACK_NOT_REGISTERED,
            Self::FunctionError => CallbackError::CALLBACK_FUNCTION_ERROR,
        }
    }
}

impl CallbackError {
    /// Code used when the callback slot for an operation is empty.
    pub const CALLBACK_NOT_REGISTERED: i32 = -1;
    /// Code used when the callback itself failed.
    pub const CALLBACK_FUNCTION_ERROR: i32 = -2;

    pub(crate) fn not_registered() -> Self {
        Self {
            kind: CallbackErrorKind::NotRegistered,
            message: "No callback registered.".to_string(),
        }
    }

    pub(crate) fn function_error(source: BoxError) -> Self {
        Self {
            kind: CallbackErrorKind::FunctionError,
            message: source.to_string(),
        }
    }

    pub fn kind(&self) -> CallbackErrorKind {
        self.kind
    }

    /// Returns [`CallbackError::CALLBACK_NOT_REGISTERED`] or
    /// [`CallbackError::CALLBACK_FUNCTION_ERROR`].
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackError {}
