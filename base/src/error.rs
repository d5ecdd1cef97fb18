//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use std::error::Error as StdError;
use std::fmt;

/// Generic error types.
///
/// Some causes are intentionally excluded. They are mostly attributed to
/// logic errors, and simply returning them would obfuscate the exact
/// location where the error was detected, making debugging harder:
///
///  - *Invalid usage*: API contract violation was detected.
///
/// These errors are escalated to `panic!` instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Ran out of device memory during an operation.
    OutOfDeviceMemory,

    /// The device became lost due to hardware/software errors, execution
    /// timeouts, or other reasons.
    DeviceLost,

    /// The requested feature is not supported by, or exceeds the limits of,
    /// the hardware or the backend.
    NotSupported,

    /// A fixed-capacity pool (bindless descriptor indices, a per-frame
    /// descriptor partition, a command-list recorder's pass slots) has no
    /// room left for the request.
    CapacityExhausted,

    /// An internal invariant was violated. Constructed only behind
    /// `debug_assert!`-guarded paths; should not occur in a release build.
    InvariantViolation,

    /// Any error that is not part of this list.
    Other,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            ErrorKind::OutOfDeviceMemory => "out of device memory",
            ErrorKind::DeviceLost => "device lost",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::CapacityExhausted => "capacity exhausted",
            ErrorKind::InvariantViolation => "invariant violation",
            ErrorKind::Other => "uncategorized error",
        }
    }
}

/// The generic error type used throughout the execution core.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, error: None }
    }

    pub fn with_detail<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            error: Some(error.into()),
        }
    }

    pub fn get_ref(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.error.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref error) = self.error {
            error.fmt(fmt)
        } else {
            write!(fmt, "{}", self.kind.as_str())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
