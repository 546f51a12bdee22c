// A closed error taxonomy (no #[non_exhaustive] -- the set is closed by
// design) wrapped the same way submerge-base wraps its own errors: capture
// a backtrace at construction and log through tracing immediately, so an
// error is visible exactly once, as close to its origin as possible,
// regardless of how far it later propagates.

use backtrace_error::DynBacktraceError;
use std::io;
use tracing::error;

#[cfg(test)]
use test_log::test;

/// The closed set of ways a decode can fail. Mirrors the FMP_ERROR_* taxonomy
/// of the legacy C library one-for-one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("failed to open file: {0}")]
    Open(String),
    #[error("seek failed: {0}")]
    Seek(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("allocation failed: {0}")]
    Malloc(String),
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported character set: {0}")]
    UnsupportedCharset(String),
    #[error("bad sector: {0}")]
    BadSector(String),
    #[error("bad sector count")]
    BadSectorCount,
    #[error("memory mapping is not available for this input")]
    NoMemoryMapAvailable,
    #[error("user callback aborted traversal")]
    UserAborted,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    // Kept around for its Display/backtrace; the classified kind above is
    // the thing callers actually match on.
    #[allow(dead_code)]
    inner: DynBacktraceError,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        error!(target: "fmp", "{kind}");
        let inner = DynBacktraceError::from(kind.clone());
        Error { kind, inner }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn open(source: io::Error) -> Error {
        Error::new(ErrorKind::Open(source.to_string()))
    }

    pub fn seek(source: io::Error) -> Error {
        Error::new(ErrorKind::Seek(source.to_string()))
    }

    pub fn read(source: io::Error) -> Error {
        Error::new(ErrorKind::Read(source.to_string()))
    }

    pub fn bad_sector(msg: impl Into<String>) -> Error {
        Error::new(ErrorKind::BadSector(msg.into()))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {}

#[test]
fn test_error_kind_roundtrip() {
    let e = Error::new(ErrorKind::BadMagic);
    assert_eq!(*e.kind(), ErrorKind::BadMagic);
}
