//! Module factory: flavor selection plus one shared library handle.
//!
//! Both engine flavors live in the same shared library, so the factory
//! loads it once per process (locating it through [`wkhtmltox_loader`])
//! and hands out [`NativeModule`] views over the shared handle. The
//! library is never unloaded: the engine keeps process-global state and
//! tolerates exactly one load per process lifetime.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::info;

use crate::error::{Result, WkhtmltoxError};
use crate::module::{Module, NativeModule};

/// Which engine flavor a module drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// The `wkhtmltopdf_*` entry points; supports multi-object documents.
    Pdf,
    /// The `wkhtmltoimage_*` entry points; renders a single implicit object.
    Image,
}

static LIBRARY: OnceLock<(Arc<Library>, PathBuf)> = OnceLock::new();

/// Loads (once) and returns the process-wide wkhtmltox library handle.
fn shared_library() -> Result<(Arc<Library>, PathBuf)> {
    if let Some((lib, path)) = LIBRARY.get() {
        return Ok((Arc::clone(lib), path.clone()));
    }
    let path = wkhtmltox_loader::locate_wkhtmltox()?;
    let lib = unsafe { Library::new(&path) }.map_err(|e| WkhtmltoxError::LibraryLoad {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    // Under a race the loser's handle is dropped; the OS refcounts dlopen,
    // so the winner's handle stays valid either way.
    let entry = LIBRARY.get_or_init(|| (Arc::new(lib), path));
    info!(path = %entry.1.display(), "wkhtmltox library loaded");
    Ok((Arc::clone(&entry.0), entry.1.clone()))
}

/// Creates a module for the requested flavor.
///
/// The first call locates and `dlopen`s the wkhtmltox library; subsequent
/// calls (either flavor) reuse the same handle.
///
/// # Errors
///
/// [`WkhtmltoxError::Loader`] when no library can be located for this
/// platform, [`WkhtmltoxError::LibraryLoad`] when a located library cannot
/// be opened.
pub fn load_module(kind: ModuleKind) -> Result<Arc<dyn Module>> {
    let (library, path) = shared_library()?;
    Ok(Arc::new(NativeModule::new(library, path, kind)))
}

/// Whether a wkhtmltox library can be located on this machine, without
/// loading it.
pub fn native_library_available() -> bool {
    wkhtmltox_loader::is_wkhtmltox_present()
}
