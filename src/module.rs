//! The module abstraction: one uniform, safe surface over both engine
//! flavors.
//!
//! [`Module`] is the seam the rest of the crate is written against — the
//! converters orchestrate through it, and tests substitute a recording
//! double for it. [`NativeModule`] is the real implementation: it resolves
//! each entry point from the loaded shared library by its bit-exact name
//! (see [`crate::ffi`]) and adds the two guarantees the raw ABI does not
//! give you:
//!
//! * **Callback retention.** The engine keeps registered function pointers
//!   and may invoke them any time before the converter is destroyed.
//!   Registered Rust callbacks are therefore stored in a process-global
//!   registry keyed by converter handle and released exactly when that
//!   handle is destroyed — reachability is explicit, never ambient.
//! * **Buffer confinement.** `get_output` hands back an engine-owned buffer
//!   that is valid only until the next native call. The module copies it
//!   out immediately; no raw pointer from the engine escapes this file.
//!
//! No operation here is safe to run concurrently with another against the
//! same engine — that exclusion is enforced above, by the conversion gate
//! in [`crate::synchronized`].

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_uchar, c_void};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use crate::error::{Result, WkhtmltoxError};
use crate::factory::ModuleKind;
use crate::ffi::{self, SymbolTable};

// ── Handles ──────────────────────────────────────────────────────────────

macro_rules! opaque_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// Once destroyed, a handle is never reused.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(usize);

        impl $name {
            /// Wraps a raw handle value. Intended for module implementations
            /// and test doubles; the converters never fabricate handles.
            pub fn from_raw(raw: usize) -> Self {
                Self(raw)
            }

            /// The raw handle value.
            pub fn as_raw(self) -> usize {
                self.0
            }

            pub(crate) fn as_ptr(self) -> *mut c_void {
                self.0 as *mut c_void
            }
        }
    };
}

opaque_handle!(
    /// Opaque reference to an engine-side global-settings object.
    GlobalSettingsHandle
);
opaque_handle!(
    /// Opaque reference to an engine-side object-settings object (PDF only).
    ObjectSettingsHandle
);
opaque_handle!(
    /// Opaque reference to an engine-side converter.
    ConverterHandle
);

// ── Callback types ───────────────────────────────────────────────────────

/// Warning / error callback: receives the engine's message text.
pub type StringCallback = Box<dyn Fn(&str) + Send + Sync + 'static>;
/// Phase-changed / progress-changed callback: a bare signal.
pub type SignalCallback = Box<dyn Fn() + Send + Sync + 'static>;
/// Finished callback: receives the engine's integer result code.
pub type FinishedCallback = Box<dyn Fn(i32) + Send + Sync + 'static>;

// ── The module contract ──────────────────────────────────────────────────

/// Uniform lifecycle surface over one engine flavor.
///
/// Every method crosses into native code and may block ([`convert`] for
/// arbitrarily long). None of them may run concurrently with another call
/// on the same engine; callers hold the conversion gate for the whole
/// init→terminate bracket.
///
/// [`convert`]: Module::convert
pub trait Module: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Engine init. Returns the raw status; `1` means success.
    fn initialize(&self, use_graphics: bool) -> Result<i32>;
    /// Engine deinit; the last native call of a conversion bracket.
    fn terminate(&self) -> Result<i32>;
    /// Whether the library was built against the patched ("extended") Qt.
    fn extended_qt(&self) -> Result<i32>;
    /// Engine version string, e.g. `0.12.6`.
    fn library_version(&self) -> Result<String>;

    fn create_global_settings(&self) -> Result<GlobalSettingsHandle>;
    fn destroy_global_settings(&self, settings: GlobalSettingsHandle) -> Result<()>;
    fn set_global_setting(
        &self,
        settings: GlobalSettingsHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<()>;
    /// Reads a global setting back, growing the buffer on the truncation
    /// signal (see module docs of [`crate::ffi`] for the buffer contract).
    fn get_global_setting(&self, settings: GlobalSettingsHandle, name: &str) -> Result<String>;

    /// PDF only; the Image flavor fails with `UnsupportedOperation`.
    fn create_object_settings(&self) -> Result<ObjectSettingsHandle>;
    /// PDF only.
    fn destroy_object_settings(&self, settings: ObjectSettingsHandle) -> Result<()>;
    /// PDF only.
    fn set_object_setting(
        &self,
        settings: ObjectSettingsHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<()>;
    /// PDF only. Registers a content object; the converter owns the object
    /// settings from this point on, so they are not destroyed separately.
    fn add_object(
        &self,
        converter: ConverterHandle,
        settings: ObjectSettingsHandle,
        html: Option<&str>,
    ) -> Result<()>;

    fn create_converter(&self, settings: GlobalSettingsHandle) -> Result<ConverterHandle>;
    /// Destroys the converter and releases its retained callbacks.
    fn destroy_converter(&self, converter: ConverterHandle) -> Result<()>;

    fn set_warning_callback(&self, converter: ConverterHandle, cb: StringCallback) -> Result<()>;
    fn set_error_callback(&self, converter: ConverterHandle, cb: StringCallback) -> Result<()>;
    fn set_phase_changed_callback(
        &self,
        converter: ConverterHandle,
        cb: SignalCallback,
    ) -> Result<()>;
    fn set_progress_changed_callback(
        &self,
        converter: ConverterHandle,
        cb: SignalCallback,
    ) -> Result<()>;
    fn set_finished_callback(&self, converter: ConverterHandle, cb: FinishedCallback)
        -> Result<()>;

    /// Runs the conversion. `false` means "no document produced" — a normal
    /// outcome, not an error.
    fn convert(&self, converter: ConverterHandle) -> Result<bool>;

    fn current_phase(&self, converter: ConverterHandle) -> Result<i32>;
    fn phase_count(&self, converter: ConverterHandle) -> Result<i32>;
    fn phase_description(&self, converter: ConverterHandle, phase: i32) -> Result<String>;
    fn progress_string(&self, converter: ConverterHandle) -> Result<String>;
    fn http_error_code(&self, converter: ConverterHandle) -> Result<i32>;

    /// Copies the produced document out of the engine. Empty when the
    /// engine reports no output.
    fn get_output(&self, converter: ConverterHandle) -> Result<Vec<u8>>;
}

// ── Retained-callback registry ───────────────────────────────────────────
//
// The engine gives callbacks no user-data pointer; the only key a
// trampoline receives is the converter pointer itself. The registry is
// process-global for the same reason the engine is: there is one engine
// per process, and converter pointers are unique within it.

#[derive(Default)]
struct RetainedCallbacks {
    warning: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    phase_changed: Option<Arc<dyn Fn() + Send + Sync>>,
    progress_changed: Option<Arc<dyn Fn() + Send + Sync>>,
    finished: Option<Arc<dyn Fn(i32) + Send + Sync>>,
}

fn registry() -> &'static Mutex<HashMap<usize, RetainedCallbacks>> {
    static REGISTRY: OnceLock<Mutex<HashMap<usize, RetainedCallbacks>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_retained<F>(converter: ConverterHandle, f: F)
where
    F: FnOnce(&mut RetainedCallbacks),
{
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    f(map.entry(converter.as_raw()).or_default());
}

fn release_retained(converter: ConverterHandle) {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.remove(&converter.as_raw());
}

/// Runs a retained string callback for `converter`, if one is registered.
///
/// The lock is dropped before the callback runs, and a panicking callback
/// is caught — unwinding back into the engine would be undefined behaviour.
fn dispatch_str(
    converter: *mut c_void,
    message: *const c_char,
    pick: fn(&RetainedCallbacks) -> Option<Arc<dyn Fn(&str) + Send + Sync>>,
) {
    let text = if message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    };
    let cb = {
        let map = registry().lock().unwrap_or_else(|e| e.into_inner());
        map.get(&(converter as usize)).and_then(pick)
    };
    if let Some(cb) = cb {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&text))).is_err() {
            warn!("string callback panicked; panic contained at the FFI boundary");
        }
    }
}

fn dispatch_signal(
    converter: *mut c_void,
    pick: fn(&RetainedCallbacks) -> Option<Arc<dyn Fn() + Send + Sync>>,
) {
    let cb = {
        let map = registry().lock().unwrap_or_else(|e| e.into_inner());
        map.get(&(converter as usize)).and_then(pick)
    };
    if let Some(cb) = cb {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb())).is_err() {
            warn!("signal callback panicked; panic contained at the FFI boundary");
        }
    }
}

fn dispatch_finished(converter: *mut c_void, code: i32) {
    let cb = {
        let map = registry().lock().unwrap_or_else(|e| e.into_inner());
        map.get(&(converter as usize)).and_then(|c| c.finished.clone())
    };
    if let Some(cb) = cb {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(code))).is_err() {
            warn!("finished callback panicked; panic contained at the FFI boundary");
        }
    }
}

unsafe extern "C" fn warning_trampoline(converter: *mut c_void, message: *const c_char) {
    dispatch_str(converter, message, |c| c.warning.clone());
}

unsafe extern "C" fn error_trampoline(converter: *mut c_void, message: *const c_char) {
    dispatch_str(converter, message, |c| c.error.clone());
}

unsafe extern "C" fn phase_changed_trampoline(converter: *mut c_void) {
    dispatch_signal(converter, |c| c.phase_changed.clone());
}

unsafe extern "C" fn progress_changed_trampoline(converter: *mut c_void) {
    dispatch_signal(converter, |c| c.progress_changed.clone());
}

unsafe extern "C" fn finished_trampoline(converter: *mut c_void, code: std::os::raw::c_int) {
    dispatch_finished(converter, code);
}

// ── Native implementation ────────────────────────────────────────────────

/// Buffer sizing for `get_global_setting`: start small, double on the
/// truncation signal, give up at the cap.
const GET_SETTING_INITIAL_BUF: usize = 256;
const GET_SETTING_MAX_BUF: usize = 64 * 1024;

/// Truncation signal: the C string fills the buffer to its final byte.
fn looks_truncated(nul_index: usize, capacity: usize) -> bool {
    nul_index + 1 >= capacity
}

/// Runs a buffered setting read, doubling the buffer on the truncation
/// signal up to the cap. `read` fills the buffer and returns the raw
/// status; anything but 1 fails the read outright (no retry).
fn read_setting_with_retry<F>(operation: &'static str, mut read: F) -> Result<String>
where
    F: FnMut(&mut [u8]) -> i32,
{
    let mut capacity = GET_SETTING_INITIAL_BUF;
    loop {
        let mut buf = vec![0u8; capacity];
        let status = read(&mut buf);
        if status != 1 {
            return Err(WkhtmltoxError::NativeCall { operation, status });
        }
        let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if looks_truncated(nul, capacity) {
            if capacity < GET_SETTING_MAX_BUF {
                capacity *= 2;
                continue;
            }
            return Err(WkhtmltoxError::NativeCall {
                operation: "get_global_setting (value exceeds buffer cap)",
                status,
            });
        }
        return Ok(String::from_utf8_lossy(&buf[..nul]).into_owned());
    }
}

fn cstring(context: &'static str, s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        WkhtmltoxError::invalid(format!("embedded NUL byte in {context}: {s:?}"))
    })
}

/// [`Module`] backed by the loaded wkhtmltox shared library.
///
/// Construction goes through [`crate::factory::load_module`]; both flavors
/// share one `dlopen` handle per process.
pub struct NativeModule {
    library: Arc<Library>,
    path: PathBuf,
    symbols: &'static SymbolTable,
    kind: ModuleKind,
}

impl NativeModule {
    pub(crate) fn new(library: Arc<Library>, path: PathBuf, kind: ModuleKind) -> Self {
        let symbols = match kind {
            ModuleKind::Pdf => &ffi::PDF_SYMBOLS,
            ModuleKind::Image => &ffi::IMAGE_SYMBOLS,
        };
        Self {
            library,
            path,
            symbols,
            kind,
        }
    }

    fn sym<T>(&self, name: &'static [u8]) -> Result<Symbol<'_, T>> {
        unsafe { self.library.get(name) }.map_err(|e| WkhtmltoxError::LibraryLoad {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Resolves a PDF-only symbol, or reports the flavor mismatch.
    fn pdf_sym<T>(
        &self,
        name: Option<&'static [u8]>,
        operation: &'static str,
    ) -> Result<Symbol<'_, T>> {
        match name {
            Some(n) => self.sym(n),
            None => Err(WkhtmltoxError::UnsupportedOperation {
                operation,
                kind: self.kind,
            }),
        }
    }

    fn read_cstr(ptr: *const c_char) -> String {
        if ptr.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
        }
    }
}

impl Module for NativeModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn initialize(&self, use_graphics: bool) -> Result<i32> {
        let init: Symbol<'_, ffi::InitFn> = self.sym(self.symbols.init)?;
        let status = unsafe { init(i32::from(use_graphics)) };
        debug!(status, use_graphics, "engine init");
        Ok(status)
    }

    fn terminate(&self) -> Result<i32> {
        let deinit: Symbol<'_, ffi::DeinitFn> = self.sym(self.symbols.deinit)?;
        let status = unsafe { deinit() };
        debug!(status, "engine deinit");
        Ok(status)
    }

    fn extended_qt(&self) -> Result<i32> {
        let f: Symbol<'_, ffi::ExtendedQtFn> = self.sym(self.symbols.extended_qt)?;
        Ok(unsafe { f() })
    }

    fn library_version(&self) -> Result<String> {
        let f: Symbol<'_, ffi::VersionFn> = self.sym(self.symbols.version)?;
        Ok(Self::read_cstr(unsafe { f() }))
    }

    fn create_global_settings(&self) -> Result<GlobalSettingsHandle> {
        let f: Symbol<'_, ffi::CreateSettingsFn> = self.sym(self.symbols.create_global_settings)?;
        let ptr = unsafe { f() };
        if ptr.is_null() {
            return Err(WkhtmltoxError::NativeCall {
                operation: "create_global_settings",
                status: 0,
            });
        }
        Ok(GlobalSettingsHandle::from_raw(ptr as usize))
    }

    fn destroy_global_settings(&self, settings: GlobalSettingsHandle) -> Result<()> {
        let f: Symbol<'_, ffi::DestroySettingsFn> =
            self.sym(self.symbols.destroy_global_settings)?;
        unsafe { f(settings.as_ptr()) };
        Ok(())
    }

    fn set_global_setting(
        &self,
        settings: GlobalSettingsHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let f: Symbol<'_, ffi::SetSettingFn> = self.sym(self.symbols.set_global_setting)?;
        let name_c = cstring("setting name", name)?;
        let value_c = value.map(|v| cstring("setting value", v)).transpose()?;
        let value_ptr = value_c
            .as_ref()
            .map_or(std::ptr::null(), |v| v.as_ptr());
        let status = unsafe { f(settings.as_ptr(), name_c.as_ptr(), value_ptr) };
        if status != 1 {
            return Err(WkhtmltoxError::NativeCall {
                operation: "set_global_setting",
                status,
            });
        }
        Ok(())
    }

    fn get_global_setting(&self, settings: GlobalSettingsHandle, name: &str) -> Result<String> {
        let f: Symbol<'_, ffi::GetSettingFn> = self.sym(self.symbols.get_global_setting)?;
        let name_c = cstring("setting name", name)?;
        read_setting_with_retry("get_global_setting", |buf| unsafe {
            f(
                settings.as_ptr(),
                name_c.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                buf.len() as std::os::raw::c_int,
            )
        })
    }

    fn create_object_settings(&self) -> Result<ObjectSettingsHandle> {
        let f: Symbol<'_, ffi::CreateSettingsFn> = self.pdf_sym(
            self.symbols.create_object_settings,
            "create_object_settings",
        )?;
        let ptr = unsafe { f() };
        if ptr.is_null() {
            return Err(WkhtmltoxError::NativeCall {
                operation: "create_object_settings",
                status: 0,
            });
        }
        Ok(ObjectSettingsHandle::from_raw(ptr as usize))
    }

    fn destroy_object_settings(&self, settings: ObjectSettingsHandle) -> Result<()> {
        let f: Symbol<'_, ffi::DestroySettingsFn> = self.pdf_sym(
            self.symbols.destroy_object_settings,
            "destroy_object_settings",
        )?;
        unsafe { f(settings.as_ptr()) };
        Ok(())
    }

    fn set_object_setting(
        &self,
        settings: ObjectSettingsHandle,
        name: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let f: Symbol<'_, ffi::SetSettingFn> =
            self.pdf_sym(self.symbols.set_object_setting, "set_object_setting")?;
        let name_c = cstring("setting name", name)?;
        let value_c = value.map(|v| cstring("setting value", v)).transpose()?;
        let value_ptr = value_c
            .as_ref()
            .map_or(std::ptr::null(), |v| v.as_ptr());
        let status = unsafe { f(settings.as_ptr(), name_c.as_ptr(), value_ptr) };
        if status != 1 {
            return Err(WkhtmltoxError::NativeCall {
                operation: "set_object_setting",
                status,
            });
        }
        Ok(())
    }

    fn add_object(
        &self,
        converter: ConverterHandle,
        settings: ObjectSettingsHandle,
        html: Option<&str>,
    ) -> Result<()> {
        let f: Symbol<'_, ffi::AddObjectFn> =
            self.pdf_sym(self.symbols.add_object, "add_object")?;
        let html_c = html.map(|h| cstring("inline HTML", h)).transpose()?;
        let html_ptr = html_c.as_ref().map_or(std::ptr::null(), |h| h.as_ptr());
        unsafe { f(converter.as_ptr(), settings.as_ptr(), html_ptr) };
        Ok(())
    }

    fn create_converter(&self, settings: GlobalSettingsHandle) -> Result<ConverterHandle> {
        let f: Symbol<'_, ffi::CreateConverterFn> = self.sym(self.symbols.create_converter)?;
        let ptr = unsafe { f(settings.as_ptr()) };
        if ptr.is_null() {
            return Err(WkhtmltoxError::NativeCall {
                operation: "create_converter",
                status: 0,
            });
        }
        Ok(ConverterHandle::from_raw(ptr as usize))
    }

    fn destroy_converter(&self, converter: ConverterHandle) -> Result<()> {
        let f: Symbol<'_, ffi::DestroyConverterFn> = self.sym(self.symbols.destroy_converter)?;
        unsafe { f(converter.as_ptr()) };
        // The handle is gone; its callbacks can no longer be invoked.
        release_retained(converter);
        Ok(())
    }

    fn set_warning_callback(&self, converter: ConverterHandle, cb: StringCallback) -> Result<()> {
        // Retain before registering: the engine may fire immediately.
        with_retained(converter, |c| c.warning = Some(Arc::from(cb)));
        let f: Symbol<'_, ffi::SetStrCallbackFn> = self.sym(self.symbols.set_warning_callback)?;
        unsafe { f(converter.as_ptr(), warning_trampoline) };
        Ok(())
    }

    fn set_error_callback(&self, converter: ConverterHandle, cb: StringCallback) -> Result<()> {
        with_retained(converter, |c| c.error = Some(Arc::from(cb)));
        let f: Symbol<'_, ffi::SetStrCallbackFn> = self.sym(self.symbols.set_error_callback)?;
        unsafe { f(converter.as_ptr(), error_trampoline) };
        Ok(())
    }

    fn set_phase_changed_callback(
        &self,
        converter: ConverterHandle,
        cb: SignalCallback,
    ) -> Result<()> {
        with_retained(converter, |c| c.phase_changed = Some(Arc::from(cb)));
        let f: Symbol<'_, ffi::SetVoidCallbackFn> =
            self.sym(self.symbols.set_phase_changed_callback)?;
        unsafe { f(converter.as_ptr(), phase_changed_trampoline) };
        Ok(())
    }

    fn set_progress_changed_callback(
        &self,
        converter: ConverterHandle,
        cb: SignalCallback,
    ) -> Result<()> {
        with_retained(converter, |c| c.progress_changed = Some(Arc::from(cb)));
        let f: Symbol<'_, ffi::SetVoidCallbackFn> =
            self.sym(self.symbols.set_progress_changed_callback)?;
        unsafe { f(converter.as_ptr(), progress_changed_trampoline) };
        Ok(())
    }

    fn set_finished_callback(
        &self,
        converter: ConverterHandle,
        cb: FinishedCallback,
    ) -> Result<()> {
        with_retained(converter, |c| c.finished = Some(Arc::from(cb)));
        let f: Symbol<'_, ffi::SetIntCallbackFn> = self.sym(self.symbols.set_finished_callback)?;
        unsafe { f(converter.as_ptr(), finished_trampoline) };
        Ok(())
    }

    fn convert(&self, converter: ConverterHandle) -> Result<bool> {
        let f: Symbol<'_, ffi::ConvertFn> = self.sym(self.symbols.convert)?;
        let produced = unsafe { f(converter.as_ptr()) } != 0;
        debug!(produced, "engine convert returned");
        Ok(produced)
    }

    fn current_phase(&self, converter: ConverterHandle) -> Result<i32> {
        let f: Symbol<'_, ffi::IntGetterFn> = self.sym(self.symbols.current_phase)?;
        Ok(unsafe { f(converter.as_ptr()) })
    }

    fn phase_count(&self, converter: ConverterHandle) -> Result<i32> {
        let f: Symbol<'_, ffi::IntGetterFn> = self.sym(self.symbols.phase_count)?;
        Ok(unsafe { f(converter.as_ptr()) })
    }

    fn phase_description(&self, converter: ConverterHandle, phase: i32) -> Result<String> {
        let f: Symbol<'_, ffi::PhaseDescriptionFn> = self.sym(self.symbols.phase_description)?;
        Ok(Self::read_cstr(unsafe { f(converter.as_ptr(), phase) }))
    }

    fn progress_string(&self, converter: ConverterHandle) -> Result<String> {
        let f: Symbol<'_, ffi::ProgressStringFn> = self.sym(self.symbols.progress_string)?;
        Ok(Self::read_cstr(unsafe { f(converter.as_ptr()) }))
    }

    fn http_error_code(&self, converter: ConverterHandle) -> Result<i32> {
        let f: Symbol<'_, ffi::IntGetterFn> = self.sym(self.symbols.http_error_code)?;
        Ok(unsafe { f(converter.as_ptr()) })
    }

    fn get_output(&self, converter: ConverterHandle) -> Result<Vec<u8>> {
        let f: Symbol<'_, ffi::GetOutputFn> = self.sym(self.symbols.get_output)?;
        let mut data: *const c_uchar = std::ptr::null();
        let len = unsafe { f(converter.as_ptr(), &mut data) };
        if len <= 0 || data.is_null() {
            return Ok(Vec::new());
        }
        // Engine-owned buffer, valid only until the next native call:
        // copy it out before anything else happens.
        Ok(unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec())
    }
}
