//! # wkhtmltox
//!
//! Async Rust bindings for the wkhtmltopdf / wkhtmltoimage shared library:
//! HTML in, PDF or image bytes out.
//!
//! ## Why this crate?
//!
//! The wkhtmltox engine renders real HTML (CSS, JavaScript, web fonts)
//! through a headless WebKit, which keeps it the pragmatic choice for
//! invoice- and report-style PDF generation. Its C API is hostile to
//! direct use, though: it is not reentrant, keeps process-global state,
//! retains raw callback pointers, and hands out buffers that die on the
//! next call. This crate wraps all of that behind a safe, async surface —
//! one conversion runs at a time, cancellation is honoured while queued,
//! and no native pointer ever reaches caller code.
//!
//! ## Architecture
//!
//! ```text
//! HtmlToPdfDocument / HtmlToImageDocument        (serde option bags)
//!  │
//!  ├─ SynchronizedPdfConverter / …Image…    queue on the process-wide
//!  │                                        gate, race cancellation,
//!  │                                        then spawn_blocking
//!  ├─ BasicPdfConverter / …Image…           one synchronous engine
//!  │                                        bracket: init → configure →
//!  │                                        convert → collect → teardown
//!  ├─ Module (trait) / NativeModule         safe surface per flavor;
//!  │                                        callback retention, buffer
//!  │                                        copies, symbol dispatch
//!  └─ wkhtmltox-loader                      locates the shared library
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wkhtmltox::{CancellationToken, HtmlToPdfDocument, SynchronizedPdfConverter};
//!
//! #[tokio::main]
//! async fn main() -> wkhtmltox::Result<()> {
//!     let converter = SynchronizedPdfConverter::new()?;
//!     let document = HtmlToPdfDocument::from_html("<h1>Invoice #42</h1>");
//!     let produced = converter
//!         .convert(
//!             &document,
//!             |_len| std::fs::File::create("invoice.pdf"),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     assert!(produced, "engine reported no document");
//!     Ok(())
//! }
//! ```
//!
//! ## Locating the native library
//!
//! The library is resolved once per process: `WKHTMLTOX_LIB_PATH` env
//! override first, then the executable's directory, the working directory,
//! and the platform's conventional install locations. See
//! [`wkhtmltox_loader`] for the exact order.
//!
//! ## Concurrency model
//!
//! The engine tolerates exactly one conversion at a time, process-wide.
//! The synchronized converters enforce that with a single-permit gate
//! shared by every instance of either flavor; requests queue in FIFO
//! order, and a queued request can still be cancelled. See
//! [`synchronized`] for the exact rules.

pub mod basic;
pub mod document;
pub mod error;
pub mod factory;
mod ffi;
pub mod module;
pub mod synchronized;

pub use basic::{BasicImageConverter, BasicPdfConverter, ImageSourceGuard};
pub use document::{
    HtmlToImageDocument, HtmlToPdfDocument, ImageSettings, PdfGlobalSettings, PdfObjectSettings,
};
pub use error::{Result, WkhtmltoxError};
pub use factory::{load_module, native_library_available, ModuleKind};
pub use module::{ConverterHandle, GlobalSettingsHandle, Module, ObjectSettingsHandle};
pub use synchronized::{SynchronizedImageConverter, SynchronizedPdfConverter};

/// Re-exported so callers don't need a direct `tokio-util` dependency for
/// the cancellation parameter.
pub use tokio_util::sync::CancellationToken;
