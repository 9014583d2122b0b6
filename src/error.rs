//! Stable error taxonomy for the EWF read/write engine.
//!
//! Every fallible entry point in this crate returns [`EwfError`] rather than
//! a bare `String` — callers need to `match` on the *kind* of failure (e.g.
//! to decide whether a `CrcMismatch` is recoverable), not just print it.

use std::fmt;

/// One diagnostic frame: the layer that observed the failure and a short
/// message. Frames accumulate as an error threads up through the handle →
/// reader/writer → section/segment layers, giving a breadcrumb trail
/// without resorting to exception-style control flow.
#[derive(Debug, Clone)]
pub struct ErrorFrame {
    pub where_: &'static str,
    pub message: String,
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.where_, self.message)
    }
}

/// Stable error taxonomy, see spec §7.
#[derive(thiserror::Error, Debug)]
pub enum EwfError {
    #[error("bad signature: first-segment magic mismatch")]
    BadSignature,

    #[error("missing segment {0}")]
    MissingSegment(u16),

    #[error("CRC mismatch in {section} section")]
    CrcMismatch { section: &'static str },

    #[error("chunk {0} is corrupt")]
    ChunkCorrupt(u64),

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("non-sequential write: expected offset {expected}, got {actual}")]
    NonSequentialWrite { expected: u64, actual: u64 },

    #[error("integrity mismatch ({kind}): expected {expected}, actual {actual}")]
    IntegrityMismatch {
        kind: &'static str,
        expected: String,
        actual: String,
    },

    #[error("operation aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid handle state for this operation: {0}")]
    InvalidState(&'static str),
}

impl EwfError {
    /// Attach a diagnostic frame describing where the error was re-raised.
    /// Used for the best-effort diagnostic dump required by spec §7; the
    /// frame stack itself lives alongside the error in [`Diagnostics`].
    pub fn frame(where_: &'static str, message: impl Into<String>) -> ErrorFrame {
        ErrorFrame {
            where_,
            message: message.into(),
        }
    }
}

/// Accumulated diagnostic frames for a single failed operation, threaded
/// alongside an [`EwfError`] by callers that want the full context (e.g.
/// the handle façade's error log). Not part of `EwfError` itself so that
/// matching on the error kind stays cheap and allocation-free in the
/// common (successful) path.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub frames: Vec<ErrorFrame>,
}

impl Diagnostics {
    pub fn push(&mut self, frame: ErrorFrame) {
        self.frames.push(frame);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "  at {}", frame)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, EwfError>;
