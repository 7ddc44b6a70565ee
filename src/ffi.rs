//! Native ABI surface of the wkhtmltox engine.
//!
//! The engine ships two flavors behind one shared library; every entry point
//! exists twice, once per prefix (`wkhtmltopdf_*`, `wkhtmltoimage_*`), with
//! identical shapes. Rather than duplicating an `extern` block per flavor,
//! this module declares the function *shapes* once and pairs them with a
//! per-flavor table of bit-exact symbol names; symbols are resolved at
//! runtime from the loaded library.
//!
//! Callback registration is the delicate part of this ABI: the engine keeps
//! the registered function pointer and may invoke it at any point before the
//! converter is destroyed. The trampolines passed here must therefore be
//! `extern "C"` statics (see `module.rs`), never short-lived closures.
//!
//! # Safety
//!
//! Nothing in this module validates anything — these are flat C signatures.
//! All invariants (handle lifetimes, single-threaded access, buffer
//! ownership) are enforced one layer up, in [`crate::module`].

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_long, c_uchar, c_void};

// ── Callback shapes ──────────────────────────────────────────────────────

/// Warning / error callback: carries a NUL-terminated message.
pub type wkhtmltox_str_callback =
    unsafe extern "C" fn(converter: *mut c_void, message: *const c_char);

/// Phase-changed / progress-changed callback: a bare signal.
pub type wkhtmltox_void_callback = unsafe extern "C" fn(converter: *mut c_void);

/// Finished callback: carries the engine's integer result code.
pub type wkhtmltox_int_callback = unsafe extern "C" fn(converter: *mut c_void, code: c_int);

// ── Function shapes (shared by both flavors) ─────────────────────────────

pub(crate) type InitFn = unsafe extern "C" fn(use_graphics: c_int) -> c_int;
pub(crate) type DeinitFn = unsafe extern "C" fn() -> c_int;
pub(crate) type ExtendedQtFn = unsafe extern "C" fn() -> c_int;
pub(crate) type VersionFn = unsafe extern "C" fn() -> *const c_char;

pub(crate) type CreateSettingsFn = unsafe extern "C" fn() -> *mut c_void;
pub(crate) type DestroySettingsFn = unsafe extern "C" fn(settings: *mut c_void) -> c_int;
pub(crate) type SetSettingFn =
    unsafe extern "C" fn(settings: *mut c_void, name: *const c_char, value: *const c_char) -> c_int;
pub(crate) type GetSettingFn = unsafe extern "C" fn(
    settings: *mut c_void,
    name: *const c_char,
    value: *mut c_char,
    value_size: c_int,
) -> c_int;

pub(crate) type CreateConverterFn =
    unsafe extern "C" fn(global_settings: *mut c_void) -> *mut c_void;
pub(crate) type DestroyConverterFn = unsafe extern "C" fn(converter: *mut c_void);
pub(crate) type AddObjectFn = unsafe extern "C" fn(
    converter: *mut c_void,
    object_settings: *mut c_void,
    data: *const c_char,
);

pub(crate) type SetStrCallbackFn =
    unsafe extern "C" fn(converter: *mut c_void, callback: wkhtmltox_str_callback) -> c_int;
pub(crate) type SetVoidCallbackFn =
    unsafe extern "C" fn(converter: *mut c_void, callback: wkhtmltox_void_callback) -> c_int;
pub(crate) type SetIntCallbackFn =
    unsafe extern "C" fn(converter: *mut c_void, callback: wkhtmltox_int_callback) -> c_int;

pub(crate) type ConvertFn = unsafe extern "C" fn(converter: *mut c_void) -> c_int;
pub(crate) type IntGetterFn = unsafe extern "C" fn(converter: *mut c_void) -> c_int;

/// Returns the engine-owned output buffer through `data`; the returned
/// length counts bytes. The buffer is valid only until the next native call
/// on this converter — copy it out before anything else.
pub(crate) type GetOutputFn =
    unsafe extern "C" fn(converter: *mut c_void, data: *mut *const c_uchar) -> c_long;

pub(crate) type PhaseDescriptionFn =
    unsafe extern "C" fn(converter: *mut c_void, phase: c_int) -> *const c_char;
pub(crate) type ProgressStringFn = unsafe extern "C" fn(converter: *mut c_void) -> *const c_char;

// ── Per-flavor symbol-name tables ────────────────────────────────────────

/// NUL-terminated symbol names for one engine flavor.
///
/// The object-settings entry points exist only on the PDF flavor; the image
/// flavor renders a single implicit object and leaves them `None`.
pub(crate) struct SymbolTable {
    pub init: &'static [u8],
    pub deinit: &'static [u8],
    pub extended_qt: &'static [u8],
    pub version: &'static [u8],
    pub create_global_settings: &'static [u8],
    pub destroy_global_settings: &'static [u8],
    pub set_global_setting: &'static [u8],
    pub get_global_setting: &'static [u8],
    pub create_object_settings: Option<&'static [u8]>,
    pub destroy_object_settings: Option<&'static [u8]>,
    pub set_object_setting: Option<&'static [u8]>,
    pub add_object: Option<&'static [u8]>,
    pub create_converter: &'static [u8],
    pub destroy_converter: &'static [u8],
    pub set_warning_callback: &'static [u8],
    pub set_error_callback: &'static [u8],
    pub set_phase_changed_callback: &'static [u8],
    pub set_progress_changed_callback: &'static [u8],
    pub set_finished_callback: &'static [u8],
    pub convert: &'static [u8],
    pub current_phase: &'static [u8],
    pub phase_count: &'static [u8],
    pub phase_description: &'static [u8],
    pub progress_string: &'static [u8],
    pub http_error_code: &'static [u8],
    pub get_output: &'static [u8],
}

pub(crate) static PDF_SYMBOLS: SymbolTable = SymbolTable {
    init: b"wkhtmltopdf_init\0",
    deinit: b"wkhtmltopdf_deinit\0",
    extended_qt: b"wkhtmltopdf_extended_qt\0",
    version: b"wkhtmltopdf_version\0",
    create_global_settings: b"wkhtmltopdf_create_global_settings\0",
    destroy_global_settings: b"wkhtmltopdf_destroy_global_settings\0",
    set_global_setting: b"wkhtmltopdf_set_global_setting\0",
    get_global_setting: b"wkhtmltopdf_get_global_setting\0",
    create_object_settings: Some(b"wkhtmltopdf_create_object_settings\0"),
    destroy_object_settings: Some(b"wkhtmltopdf_destroy_object_settings\0"),
    set_object_setting: Some(b"wkhtmltopdf_set_object_setting\0"),
    add_object: Some(b"wkhtmltopdf_add_object\0"),
    create_converter: b"wkhtmltopdf_create_converter\0",
    destroy_converter: b"wkhtmltopdf_destroy_converter\0",
    set_warning_callback: b"wkhtmltopdf_set_warning_callback\0",
    set_error_callback: b"wkhtmltopdf_set_error_callback\0",
    set_phase_changed_callback: b"wkhtmltopdf_set_phase_changed_callback\0",
    set_progress_changed_callback: b"wkhtmltopdf_set_progress_changed_callback\0",
    set_finished_callback: b"wkhtmltopdf_set_finished_callback\0",
    convert: b"wkhtmltopdf_convert\0",
    current_phase: b"wkhtmltopdf_current_phase\0",
    phase_count: b"wkhtmltopdf_phase_count\0",
    phase_description: b"wkhtmltopdf_phase_description\0",
    progress_string: b"wkhtmltopdf_progress_string\0",
    http_error_code: b"wkhtmltopdf_http_error_code\0",
    get_output: b"wkhtmltopdf_get_output\0",
};

pub(crate) static IMAGE_SYMBOLS: SymbolTable = SymbolTable {
    init: b"wkhtmltoimage_init\0",
    deinit: b"wkhtmltoimage_deinit\0",
    extended_qt: b"wkhtmltoimage_extended_qt\0",
    version: b"wkhtmltoimage_version\0",
    create_global_settings: b"wkhtmltoimage_create_global_settings\0",
    destroy_global_settings: b"wkhtmltoimage_destroy_global_settings\0",
    set_global_setting: b"wkhtmltoimage_set_global_setting\0",
    get_global_setting: b"wkhtmltoimage_get_global_setting\0",
    create_object_settings: None,
    destroy_object_settings: None,
    set_object_setting: None,
    add_object: None,
    create_converter: b"wkhtmltoimage_create_converter\0",
    destroy_converter: b"wkhtmltoimage_destroy_converter\0",
    set_warning_callback: b"wkhtmltoimage_set_warning_callback\0",
    set_error_callback: b"wkhtmltoimage_set_error_callback\0",
    set_phase_changed_callback: b"wkhtmltoimage_set_phase_changed_callback\0",
    set_progress_changed_callback: b"wkhtmltoimage_set_progress_changed_callback\0",
    set_finished_callback: b"wkhtmltoimage_set_finished_callback\0",
    convert: b"wkhtmltoimage_convert\0",
    current_phase: b"wkhtmltoimage_current_phase\0",
    phase_count: b"wkhtmltoimage_phase_count\0",
    phase_description: b"wkhtmltoimage_phase_description\0",
    progress_string: b"wkhtmltoimage_progress_string\0",
    http_error_code: b"wkhtmltoimage_http_error_code\0",
    get_output: b"wkhtmltoimage_get_output\0",
};
