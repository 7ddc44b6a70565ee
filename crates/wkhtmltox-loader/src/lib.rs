//! # wkhtmltox-loader
//!
//! Locate the `wkhtmltox` shared library (the engine behind `wkhtmltopdf`
//! and `wkhtmltoimage`) for the running platform, so that the binding crate
//! can `dlopen` it without the user hand-editing `LD_LIBRARY_PATH`.
//!
//! ## How it works
//!
//! On first call to [`locate_wkhtmltox`]:
//!
//! 1. Honours the `WKHTMLTOX_LIB_PATH` environment variable, if set.
//! 2. Probes the directory of the current executable and the working
//!    directory (the common "drop the .so next to the binary" deployment).
//! 3. Probes the conventional install locations for the platform
//!    (`/usr/local/lib`, `/usr/lib`, `C:\Program Files\wkhtmltopdf\bin`, …).
//!
//! The resolved path is cached for the remainder of the process; subsequent
//! calls never touch the filesystem again. Upstream wkhtmltox ships platform
//! installers rather than bare archives, so there is no auto-download step;
//! the library must already be installed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! let path = wkhtmltox_loader::locate_wkhtmltox().expect("wkhtmltox not installed");
//! println!("loading engine from {}", path.display());
//! ```
//!
//! ## Platform support
//!
//! | OS      | Library                                  |
//! |---------|------------------------------------------|
//! | Linux   | `libwkhtmltox.so` / `libwkhtmltox.so.0`  |
//! | macOS   | `libwkhtmltox.dylib`                     |
//! | Windows | `wkhtmltox.dll`                          |
//!
//! ## Environment variable overrides
//!
//! - `WKHTMLTOX_LIB_PATH` — path to an existing wkhtmltox library; skips all
//!   probing.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while locating the wkhtmltox shared library.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The current OS/architecture combination has no wkhtmltox build.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// No library was found in any of the probed locations.
    #[error(
        "wkhtmltox library '{lib_name}' not found.\n\
         Searched: {searched}\n\
         Install wkhtmltox from https://wkhtmltopdf.org/downloads.html or set\n\
         WKHTMLTOX_LIB_PATH=/path/to/the/library."
    )]
    NotFound { lib_name: String, searched: String },

    /// `WKHTMLTOX_LIB_PATH` was set but the file does not exist.
    #[error("WKHTMLTOX_LIB_PATH points to {path:?}, which does not exist")]
    EnvPathMissing { path: PathBuf },
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Primary filename on disk, e.g. `libwkhtmltox.so`.
    lib_name: &'static str,
    /// Alternate filenames to probe, e.g. the SONAME-versioned `.so.0`.
    alt_names: &'static [&'static str],
    /// Conventional install directories for this OS.
    install_dirs: &'static [&'static str],
}

fn detect_platform() -> Result<PlatformInfo, LoaderError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    match (os, arch) {
        ("linux", "x86_64") | ("linux", "aarch64") => Ok(PlatformInfo {
            lib_name: "libwkhtmltox.so",
            alt_names: &["libwkhtmltox.so.0", "libwkhtmltox.so.0.12.6"],
            install_dirs: &["/usr/local/lib", "/usr/lib", "/opt/wkhtmltox/lib"],
        }),
        ("macos", "x86_64") | ("macos", "aarch64") => Ok(PlatformInfo {
            lib_name: "libwkhtmltox.dylib",
            alt_names: &["libwkhtmltox.0.dylib"],
            install_dirs: &["/usr/local/lib", "/usr/local/share/wkhtmltox/lib"],
        }),
        ("windows", "x86_64") | ("windows", "x86") => Ok(PlatformInfo {
            lib_name: "wkhtmltox.dll",
            alt_names: &[],
            install_dirs: &[
                r"C:\Program Files\wkhtmltopdf\bin",
                r"C:\Program Files (x86)\wkhtmltopdf\bin",
            ],
        }),
        (os, arch) => Err(LoaderError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// The library filename for the running platform, e.g. `libwkhtmltox.so`.
pub fn library_name() -> Result<&'static str, LoaderError> {
    detect_platform().map(|info| info.lib_name)
}

/// Returns `true` if a wkhtmltox library is discoverable right now.
///
/// Also returns `true` when `WKHTMLTOX_LIB_PATH` points to an existing file.
pub fn is_wkhtmltox_present() -> bool {
    if RESOLVED_PATH.get().is_some() {
        return true;
    }
    resolve().is_ok()
}

/// Locates the wkhtmltox shared library, caching the result for the process.
///
/// Resolution order (first match wins):
///
/// 1. `WKHTMLTOX_LIB_PATH` environment variable.
/// 2. The directory containing the current executable.
/// 3. The current working directory.
/// 4. Conventional install directories for the platform, then the user-local
///    `~/.local/lib` (Unix).
///
/// # Thread safety
///
/// Safe to call from multiple threads simultaneously; the filesystem probe
/// happens at most once per process lifetime.
pub fn locate_wkhtmltox() -> Result<PathBuf, LoaderError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve()?;

    // Ignore the race on set(); every winner resolved the same library.
    let _ = RESOLVED_PATH.set(path.clone());

    Ok(path)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn resolve() -> Result<PathBuf, LoaderError> {
    // 1. Environment variable override.
    if let Ok(env_path) = std::env::var("WKHTMLTOX_LIB_PATH") {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Ok(p);
        }
        return Err(LoaderError::EnvPathMissing { path: p });
    }

    let info = detect_platform()?;
    let mut searched: Vec<PathBuf> = Vec::new();

    for dir in candidate_dirs(&info) {
        if let Some(hit) = probe_dir(&dir, &info) {
            return Ok(hit);
        }
        searched.push(dir);
    }

    Err(LoaderError::NotFound {
        lib_name: info.lib_name.to_string(),
        searched: searched
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn candidate_dirs(info: &PlatformInfo) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            out.push(parent.to_path_buf());
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        out.push(cwd);
    }
    for d in info.install_dirs {
        out.push(PathBuf::from(d));
    }
    if let Some(home) = dirs::home_dir() {
        out.push(home.join(".local").join("lib"));
    }

    out
}

/// Probes one directory for the primary name, then the alternates.
fn probe_dir(dir: &Path, info: &PlatformInfo) -> Option<PathBuf> {
    let primary = dir.join(info.lib_name);
    if primary.exists() {
        return Some(primary);
    }
    for alt in info.alt_names {
        let p = dir.join(alt);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
