//! Error types for the wkhtmltox binding.
//!
//! One failure mode is deliberately *not* an error: the native engine
//! reporting that no document was produced. `wkhtmltopdf_convert` returning
//! false is a valid, reportable outcome, so the converters return
//! `Ok(false)` for it rather than an `Err`. Everything in
//! [`WkhtmltoxError`] means the attempt itself broke — bad input caught
//! before any native call, an engine that refused to initialize, an
//! unexpected status from a native operation, or a caller cancelling while
//! still queued for the conversion gate.

use std::path::PathBuf;
use thiserror::Error;

use crate::factory::ModuleKind;

/// All errors returned by the wkhtmltox binding.
#[derive(Debug, Error)]
pub enum WkhtmltoxError {
    // ── Pre-flight errors (zero native calls made) ────────────────────────
    /// The document failed structural validation before any native call.
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    // ── Native engine errors ──────────────────────────────────────────────
    /// The engine's `init` entry point returned something other than 1.
    ///
    /// Fatal to this attempt only; nothing was allocated, nothing leaks.
    #[error("engine initialization failed (init returned {status}, expected 1)")]
    EngineInitFailed { status: i32 },

    /// A native call returned an unexpected status, or a create call
    /// returned a null handle.
    #[error("native call '{operation}' failed with status {status}")]
    NativeCall {
        operation: &'static str,
        status: i32,
    },

    /// A PDF-only operation was invoked on a module flavor without it.
    #[error("operation '{operation}' is not supported by the {kind:?} module")]
    UnsupportedOperation {
        operation: &'static str,
        kind: ModuleKind,
    },

    // ── Library loading errors ────────────────────────────────────────────
    /// The loader could not locate a wkhtmltox library for this platform.
    #[error(transparent)]
    Loader(#[from] wkhtmltox_loader::LoaderError),

    /// `dlopen` or symbol resolution failed on a located library.
    #[error("failed to load wkhtmltox from {path:?}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    // ── Scheduling errors ─────────────────────────────────────────────────
    /// Cancellation fired while this request was still queued for the
    /// conversion gate. No native resources were allocated for the attempt.
    #[error("conversion cancelled while waiting for the conversion gate")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Writing the engine's output into the caller-supplied sink failed.
    #[error("failed to write conversion output: {source}")]
    OutputWrite {
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected runtime plumbing failure (blocking task join, closed gate).
    #[error("internal error: {0}")]
    Internal(String),
}

impl WkhtmltoxError {
    /// Shorthand for a pre-flight validation failure.
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        WkhtmltoxError::InvalidDocument {
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WkhtmltoxError>;
