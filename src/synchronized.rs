//! Synchronized converters: the async, engine-safe entry point.
//!
//! The native engine is not reentrant and keeps process-global state, so
//! the crate enforces one running conversion per process. The mechanism is
//! a single-permit [`Semaphore`] held in a process-global `OnceLock` — an
//! explicit, process-wide resource rather than per-instance state, because
//! two converter instances (or the PDF and Image flavors side by side)
//! still share one engine.
//!
//! A request's life has two parts with different cancellation rules:
//!
//! * **Queued.** Waiting for the gate races against the caller's
//!   [`CancellationToken`]; if the token fires first the request ends as
//!   [`WkhtmltoxError::Cancelled`] having made zero native calls.
//! * **Running.** Once the permit is held, the blocking native run goes to
//!   `spawn_blocking` and is never interrupted; the engine has no safe
//!   mid-conversion abort. Cancellation after acquisition is not observed.
//!
//! The permit moves into the blocking closure and drops when it exits, on
//! success, error, or unwind alike, so the gate can never leak.

use std::io::{self, Write};
use std::sync::{Arc, OnceLock};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::basic::{BasicImageConverter, BasicPdfConverter};
use crate::document::{HtmlToImageDocument, HtmlToPdfDocument};
use crate::error::{Result, WkhtmltoxError};
use crate::module::Module;

/// The process-wide conversion gate: one permit, shared by every
/// synchronized converter of either flavor.
fn conversion_gate() -> &'static Arc<Semaphore> {
    static GATE: OnceLock<Arc<Semaphore>> = OnceLock::new();
    GATE.get_or_init(|| Arc::new(Semaphore::new(1)))
}

/// Waits for the gate, racing the caller's cancellation token.
///
/// `biased` so an already-cancelled token wins even when the permit is
/// free; a caller that cancelled before submitting never reaches the
/// engine.
async fn acquire_gate(
    cancel: &CancellationToken,
) -> Result<tokio::sync::OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WkhtmltoxError::Cancelled),
        permit = Arc::clone(conversion_gate()).acquire_owned() => {
            permit.map_err(|_| WkhtmltoxError::Internal("conversion gate closed".into()))
        }
    }
}

async fn run_gated<T, F>(cancel: &CancellationToken, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let permit = acquire_gate(cancel).await?;
    trace!("conversion gate acquired");
    let outcome = tokio::task::spawn_blocking(move || {
        // Holds the gate for exactly the native run, released on any exit.
        let _permit = permit;
        job()
    })
    .await
    .map_err(|e| WkhtmltoxError::Internal(format!("conversion task failed: {e}")))?;
    trace!("conversion gate released");
    outcome
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// Async HTML→PDF converter, serialized against the process-wide gate.
///
/// Cheap to clone-construct and safe to share; all instances queue on the
/// same gate.
pub struct SynchronizedPdfConverter {
    inner: Arc<BasicPdfConverter>,
}

impl SynchronizedPdfConverter {
    /// Converter backed by the native PDF module.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(BasicPdfConverter::new()?),
        })
    }

    /// Converter over an explicit module. This is the test seam.
    pub fn with_module(module: Arc<dyn Module>) -> Self {
        Self {
            inner: Arc::new(BasicPdfConverter::with_module(module)),
        }
    }

    /// Queues for the conversion gate, then runs one full conversion
    /// bracket on the blocking pool.
    ///
    /// `Ok(true)` with a filled sink when a document was produced,
    /// `Ok(false)` when the engine reported none, `Cancelled` when the
    /// token fired while still queued. The sink factory runs on the
    /// blocking thread, at most once, with the output length.
    pub async fn convert<W, F>(
        &self,
        document: &HtmlToPdfDocument,
        make_sink: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        W: Write + 'static,
        F: FnOnce(usize) -> io::Result<W> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let document = document.clone();
        run_gated(cancel, move || inner.convert(&document, make_sink)).await
    }
}

// ── Image ────────────────────────────────────────────────────────────────

/// Async HTML→Image converter, serialized against the same process-wide
/// gate as the PDF flavor.
pub struct SynchronizedImageConverter {
    inner: Arc<BasicImageConverter>,
}

impl SynchronizedImageConverter {
    /// Converter backed by the native image module.
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(BasicImageConverter::new()?),
        })
    }

    /// Converter over an explicit module. This is the test seam.
    pub fn with_module(module: Arc<dyn Module>) -> Self {
        Self {
            inner: Arc::new(BasicImageConverter::with_module(module)),
        }
    }

    /// Queues for the conversion gate, then runs one full conversion
    /// bracket on the blocking pool. Semantics mirror
    /// [`SynchronizedPdfConverter::convert`].
    pub async fn convert<W, F>(
        &self,
        document: &HtmlToImageDocument,
        make_sink: F,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        W: Write + 'static,
        F: FnOnce(usize) -> io::Result<W> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let document = document.clone();
        run_gated(cancel, move || inner.convert(&document, make_sink)).await
    }
}
