//! Basic converters: synchronous orchestration of one conversion.
//!
//! A basic converter drives a full engine bracket — init, configure,
//! convert, collect, tear down — against a [`Module`]. It owns no
//! scheduling: `convert` blocks the calling thread for the whole native
//! run, and nothing here stops two threads from entering the engine at
//! once. The synchronized layer ([`crate::synchronized`]) adds that
//! exclusion; tests drive these converters directly against a recording
//! module.
//!
//! Teardown is unconditional. A [`Teardown`] guard picks handles up as
//! they are created and destroys them in a fixed order (global settings,
//! converter, engine deinit last) when it drops, so the bracket closes on
//! every exit path, panics included.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::document::{HtmlToImageDocument, HtmlToPdfDocument};
use crate::error::{Result, WkhtmltoxError};
use crate::factory::{self, ModuleKind};
use crate::module::{ConverterHandle, GlobalSettingsHandle, Module};

/// The engine's graphics-system toggle. Off everywhere: the patched-Qt
/// graphics mode needs an X display and no headless deployment has one.
const USE_GRAPHICS: bool = false;

// ── Shared plumbing ──────────────────────────────────────────────────────

/// Unconditional teardown for the handles of one conversion bracket.
///
/// Handles are registered as they are created; drop order is fixed:
/// global settings, converter, then engine deinit. Runs on every exit
/// path, including unwinding.
struct Teardown<'a> {
    module: &'a dyn Module,
    global: Option<GlobalSettingsHandle>,
    converter: Option<ConverterHandle>,
    /// Whether this guard closes the init bracket. False when the caller
    /// owns engine init, as in [`BasicPdfConverter::create_converter`].
    deinit: bool,
}

impl<'a> Teardown<'a> {
    fn new(module: &'a dyn Module) -> Self {
        Self {
            module,
            global: None,
            converter: None,
            deinit: true,
        }
    }

    fn without_deinit(module: &'a dyn Module) -> Self {
        Self {
            module,
            global: None,
            converter: None,
            deinit: false,
        }
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Some(global) = self.global.take() {
            if let Err(e) = self.module.destroy_global_settings(global) {
                warn!(error = %e, "failed to destroy global settings");
            }
        }
        if let Some(converter) = self.converter.take() {
            if let Err(e) = self.module.destroy_converter(converter) {
                warn!(error = %e, "failed to destroy converter");
            }
        }
        if self.deinit {
            if let Err(e) = self.module.terminate() {
                warn!(error = %e, "engine deinit failed");
            }
        }
    }
}

fn initialize(module: &dyn Module) -> Result<()> {
    let status = module.initialize(USE_GRAPHICS)?;
    if status != 1 {
        return Err(WkhtmltoxError::EngineInitFailed { status });
    }
    Ok(())
}

/// Routes engine chatter into `tracing`. Registered on every converter:
/// without an error callback the engine's failure reasons are lost.
fn register_default_callbacks(module: &dyn Module, converter: ConverterHandle) -> Result<()> {
    module.set_warning_callback(converter, Box::new(|msg| warn!("engine warning: {msg}")))?;
    module.set_error_callback(converter, Box::new(|msg| error!("engine error: {msg}")))?;
    module.set_phase_changed_callback(converter, Box::new(|| trace!("engine phase changed")))?;
    module.set_progress_changed_callback(converter, Box::new(|| trace!("engine progress")))?;
    module.set_finished_callback(converter, Box::new(|code| debug!(code, "engine finished")))?;
    Ok(())
}

/// Copies the produced document into the caller's sink. The sink factory
/// runs at most once, with the exact output length.
fn write_output<W, F>(output: Vec<u8>, make_sink: F) -> Result<()>
where
    W: Write,
    F: FnOnce(usize) -> io::Result<W>,
{
    let mut sink =
        make_sink(output.len()).map_err(|source| WkhtmltoxError::OutputWrite { source })?;
    sink.write_all(&output)
        .map_err(|source| WkhtmltoxError::OutputWrite { source })?;
    sink.flush()
        .map_err(|source| WkhtmltoxError::OutputWrite { source })?;
    Ok(())
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// Synchronous HTML→PDF converter.
pub struct BasicPdfConverter {
    module: Arc<dyn Module>,
}

impl BasicPdfConverter {
    /// Converter backed by the native PDF module.
    pub fn new() -> Result<Self> {
        Ok(Self {
            module: factory::load_module(ModuleKind::Pdf)?,
        })
    }

    /// Converter over an explicit module. This is the test seam.
    pub fn with_module(module: Arc<dyn Module>) -> Self {
        Self { module }
    }

    /// Runs one full conversion bracket.
    ///
    /// Returns `Ok(true)` and fills the sink when the engine produced a
    /// document, `Ok(false)` (sink factory untouched) when it reported
    /// none. Blocks for the whole native run.
    pub fn convert<W, F>(&self, document: &HtmlToPdfDocument, make_sink: F) -> Result<bool>
    where
        W: Write,
        F: FnOnce(usize) -> io::Result<W>,
    {
        document.validate()?;
        let module = self.module.as_ref();
        initialize(module)?;
        let mut bracket = Teardown::new(module);

        let converter = Self::build_converter(module, document, &mut bracket)?;
        if !module.convert(converter)? {
            debug!("engine produced no document");
            return Ok(false);
        }
        let output = module.get_output(converter)?;
        debug!(bytes = output.len(), "pdf output collected");
        write_output(output, make_sink)?;
        Ok(true)
    }

    /// Builds a configured converter for `document` without running it.
    ///
    /// The engine must already be initialized; the caller owns both
    /// returned handles and their destruction.
    pub fn create_converter(
        &self,
        document: &HtmlToPdfDocument,
    ) -> Result<(ConverterHandle, GlobalSettingsHandle)> {
        document.validate()?;
        let mut bracket = Teardown::without_deinit(self.module.as_ref());
        let converter = Self::build_converter(self.module.as_ref(), document, &mut bracket)?;
        // Ownership transfers to the caller; disarm the guard.
        bracket.converter.take();
        match bracket.global.take() {
            Some(global) => Ok((converter, global)),
            None => Err(WkhtmltoxError::Internal(
                "converter built without global settings".into(),
            )),
        }
    }

    fn build_converter(
        module: &dyn Module,
        document: &HtmlToPdfDocument,
        bracket: &mut Teardown<'_>,
    ) -> Result<ConverterHandle> {
        let global = module.create_global_settings()?;
        bracket.global = Some(global);
        for (name, value) in document.global_settings.entries() {
            module.set_global_setting(global, name, Some(&value))?;
        }

        let converter = module.create_converter(global)?;
        bracket.converter = Some(converter);

        for object in &document.object_settings {
            let settings = module.create_object_settings()?;
            for (name, value) in object.entries() {
                module.set_object_setting(settings, name, Some(&value))?;
            }
            // The converter takes ownership of the object settings here;
            // they are not destroyed separately.
            module.add_object(converter, settings, object.html_content.as_deref())?;
        }

        register_default_callbacks(module, converter)?;
        Ok(converter)
    }
}

// ── Image ────────────────────────────────────────────────────────────────

/// Synchronous HTML→Image converter.
///
/// The image engine takes its source through the `in` setting. Inline HTML
/// is materialised into a managed temporary file whose path goes through
/// `in`; the file lives until the bracket closes.
pub struct BasicImageConverter {
    module: Arc<dyn Module>,
}

impl BasicImageConverter {
    /// Converter backed by the native image module.
    pub fn new() -> Result<Self> {
        Ok(Self {
            module: factory::load_module(ModuleKind::Image)?,
        })
    }

    /// Converter over an explicit module. This is the test seam.
    pub fn with_module(module: Arc<dyn Module>) -> Self {
        Self { module }
    }

    /// Runs one full conversion bracket. Semantics mirror
    /// [`BasicPdfConverter::convert`].
    pub fn convert<W, F>(&self, document: &HtmlToImageDocument, make_sink: F) -> Result<bool>
    where
        W: Write,
        F: FnOnce(usize) -> io::Result<W>,
    {
        document.validate()?;
        let module = self.module.as_ref();

        // Materialise inline HTML before touching the engine; an I/O
        // failure here must not cost an init/deinit cycle.
        let source_file = materialise_source(document)?;

        initialize(module)?;
        let mut bracket = Teardown::new(module);

        let converter =
            Self::build_converter(module, document, source_file.as_ref(), &mut bracket)?;

        if !module.convert(converter)? {
            debug!("engine produced no image");
            return Ok(false);
        }
        let output = module.get_output(converter)?;
        debug!(bytes = output.len(), "image output collected");
        write_output(output, make_sink)?;
        Ok(true)
    }

    /// Builds a configured converter for `document` without running it.
    ///
    /// The engine must already be initialized; the caller owns both
    /// returned handles and their destruction. Inline HTML is materialised
    /// into the returned [`ImageSourceGuard`], which must stay alive until
    /// the converter is destroyed; for locator-sourced documents the guard
    /// is empty.
    pub fn create_converter(
        &self,
        document: &HtmlToImageDocument,
    ) -> Result<(ConverterHandle, GlobalSettingsHandle, ImageSourceGuard)> {
        document.validate()?;
        let source_file = materialise_source(document)?;

        let mut bracket = Teardown::without_deinit(self.module.as_ref());
        let converter = Self::build_converter(
            self.module.as_ref(),
            document,
            source_file.as_ref(),
            &mut bracket,
        )?;
        // Ownership transfers to the caller; disarm the guard.
        bracket.converter.take();
        match bracket.global.take() {
            Some(global) => Ok((
                converter,
                global,
                ImageSourceGuard { _file: source_file },
            )),
            None => Err(WkhtmltoxError::Internal(
                "converter built without global settings".into(),
            )),
        }
    }

    fn build_converter(
        module: &dyn Module,
        document: &HtmlToImageDocument,
        source_file: Option<&tempfile::NamedTempFile>,
        bracket: &mut Teardown<'_>,
    ) -> Result<ConverterHandle> {
        let global = module.create_global_settings()?;
        bracket.global = Some(global);
        for (name, value) in document.image_settings.entries() {
            module.set_global_setting(global, name, Some(&value))?;
        }
        if let Some(file) = source_file {
            let path = file.path().to_string_lossy().into_owned();
            module.set_global_setting(global, "in", Some(&path))?;
        }

        let converter = module.create_converter(global)?;
        bracket.converter = Some(converter);
        register_default_callbacks(module, converter)?;
        Ok(converter)
    }
}

/// Keeps a materialised inline-HTML source readable by the engine.
///
/// Returned by [`BasicImageConverter::create_converter`]; drop it only
/// after the converter handle it was created with is destroyed. Empty for
/// locator-sourced documents.
pub struct ImageSourceGuard {
    _file: Option<tempfile::NamedTempFile>,
}

/// Materialises the document's inline HTML, if any.
fn materialise_source(
    document: &HtmlToImageDocument,
) -> Result<Option<tempfile::NamedTempFile>> {
    match &document.image_settings.html_content {
        Some(html) => Ok(Some(materialise_html(html)?)),
        None => Ok(None),
    }
}

/// Writes inline HTML to a temporary file the engine can read back.
fn materialise_html(html: &str) -> Result<tempfile::NamedTempFile> {
    let to_internal = |e: io::Error| {
        WkhtmltoxError::Internal(format!("failed to materialise inline HTML: {e}"))
    };
    let mut file = tempfile::Builder::new()
        .prefix("wkhtmltox-")
        .suffix(".html")
        .tempfile()
        .map_err(to_internal)?;
    file.write_all(html.as_bytes()).map_err(to_internal)?;
    file.flush().map_err(to_internal)?;
    Ok(file)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ImageSettings, PdfGlobalSettings, PdfObjectSettings};
    use crate::module::{
        FinishedCallback, ObjectSettingsHandle, SignalCallback, StringCallback,
    };
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every module call as a line like
    /// `set_global_setting quality=85`, in order.
    struct RecordingModule {
        kind: ModuleKind,
        init_status: i32,
        convert_result: bool,
        output: Vec<u8>,
        calls: Mutex<Vec<String>>,
        next_handle: AtomicUsize,
    }

    impl RecordingModule {
        fn pdf() -> Self {
            Self::with_kind(ModuleKind::Pdf)
        }

        fn image() -> Self {
            Self::with_kind(ModuleKind::Image)
        }

        fn with_kind(kind: ModuleKind) -> Self {
            Self {
                kind,
                init_status: 1,
                convert_result: true,
                output: b"%PDF-1.7 fake".to_vec(),
                calls: Mutex::new(Vec::new()),
                next_handle: AtomicUsize::new(1),
            }
        }

        fn record(&self, line: impl Into<String>) {
            self.calls.lock().unwrap().push(line.into());
        }

        fn handle(&self) -> usize {
            self.next_handle.fetch_add(1, Ordering::SeqCst)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    impl Module for RecordingModule {
        fn kind(&self) -> ModuleKind {
            self.kind
        }

        fn initialize(&self, use_graphics: bool) -> Result<i32> {
            self.record(format!("initialize {use_graphics}"));
            Ok(self.init_status)
        }

        fn terminate(&self) -> Result<i32> {
            self.record("terminate");
            Ok(1)
        }

        fn extended_qt(&self) -> Result<i32> {
            self.record("extended_qt");
            Ok(0)
        }

        fn library_version(&self) -> Result<String> {
            Ok("0.12.6".into())
        }

        fn create_global_settings(&self) -> Result<GlobalSettingsHandle> {
            self.record("create_global_settings");
            Ok(GlobalSettingsHandle::from_raw(self.handle()))
        }

        fn destroy_global_settings(&self, _: GlobalSettingsHandle) -> Result<()> {
            self.record("destroy_global_settings");
            Ok(())
        }

        fn set_global_setting(
            &self,
            _: GlobalSettingsHandle,
            name: &str,
            value: Option<&str>,
        ) -> Result<()> {
            self.record(format!("set_global_setting {name}={}", value.unwrap_or("")));
            Ok(())
        }

        fn get_global_setting(&self, _: GlobalSettingsHandle, name: &str) -> Result<String> {
            self.record(format!("get_global_setting {name}"));
            Ok(String::new())
        }

        fn create_object_settings(&self) -> Result<ObjectSettingsHandle> {
            self.record("create_object_settings");
            Ok(ObjectSettingsHandle::from_raw(self.handle()))
        }

        fn destroy_object_settings(&self, _: ObjectSettingsHandle) -> Result<()> {
            self.record("destroy_object_settings");
            Ok(())
        }

        fn set_object_setting(
            &self,
            _: ObjectSettingsHandle,
            name: &str,
            value: Option<&str>,
        ) -> Result<()> {
            self.record(format!("set_object_setting {name}={}", value.unwrap_or("")));
            Ok(())
        }

        fn add_object(
            &self,
            _: ConverterHandle,
            _: ObjectSettingsHandle,
            html: Option<&str>,
        ) -> Result<()> {
            self.record(format!("add_object html={}", html.is_some()));
            Ok(())
        }

        fn create_converter(&self, _: GlobalSettingsHandle) -> Result<ConverterHandle> {
            self.record("create_converter");
            Ok(ConverterHandle::from_raw(self.handle()))
        }

        fn destroy_converter(&self, _: ConverterHandle) -> Result<()> {
            self.record("destroy_converter");
            Ok(())
        }

        fn set_warning_callback(&self, _: ConverterHandle, _: StringCallback) -> Result<()> {
            self.record("set_warning_callback");
            Ok(())
        }

        fn set_error_callback(&self, _: ConverterHandle, _: StringCallback) -> Result<()> {
            self.record("set_error_callback");
            Ok(())
        }

        fn set_phase_changed_callback(
            &self,
            _: ConverterHandle,
            _: SignalCallback,
        ) -> Result<()> {
            self.record("set_phase_changed_callback");
            Ok(())
        }

        fn set_progress_changed_callback(
            &self,
            _: ConverterHandle,
            _: SignalCallback,
        ) -> Result<()> {
            self.record("set_progress_changed_callback");
            Ok(())
        }

        fn set_finished_callback(&self, _: ConverterHandle, _: FinishedCallback) -> Result<()> {
            self.record("set_finished_callback");
            Ok(())
        }

        fn convert(&self, _: ConverterHandle) -> Result<bool> {
            self.record("convert");
            Ok(self.convert_result)
        }

        fn current_phase(&self, _: ConverterHandle) -> Result<i32> {
            Ok(0)
        }

        fn phase_count(&self, _: ConverterHandle) -> Result<i32> {
            Ok(0)
        }

        fn phase_description(&self, _: ConverterHandle, _: i32) -> Result<String> {
            Ok(String::new())
        }

        fn progress_string(&self, _: ConverterHandle) -> Result<String> {
            Ok(String::new())
        }

        fn http_error_code(&self, _: ConverterHandle) -> Result<i32> {
            Ok(0)
        }

        fn get_output(&self, _: ConverterHandle) -> Result<Vec<u8>> {
            self.record("get_output");
            Ok(self.output.clone())
        }
    }

    fn pdf_converter(module: RecordingModule) -> (BasicPdfConverter, Arc<RecordingModule>) {
        let module = Arc::new(module);
        (
            BasicPdfConverter::with_module(Arc::clone(&module) as Arc<dyn Module>),
            module,
        )
    }

    fn image_converter(module: RecordingModule) -> (BasicImageConverter, Arc<RecordingModule>) {
        let module = Arc::new(module);
        (
            BasicImageConverter::with_module(Arc::clone(&module) as Arc<dyn Module>),
            module,
        )
    }

    #[test]
    fn invalid_pdf_document_makes_no_native_calls() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument::default();
        let mut sink = Vec::new();
        let result = converter.convert(&doc, |_| Ok(&mut sink));
        assert!(matches!(result, Err(WkhtmltoxError::InvalidDocument { .. })));
        assert!(module.calls().is_empty(), "calls: {:?}", module.calls());
    }

    #[test]
    fn init_failure_is_typed_and_skips_teardown() {
        let (converter, module) = pdf_converter(RecordingModule {
            init_status: 0,
            ..RecordingModule::pdf()
        });
        let doc = HtmlToPdfDocument::from_html("<p>x</p>");
        let mut sink = Vec::new();
        let result = converter.convert(&doc, |_| Ok(&mut sink));
        assert!(matches!(
            result,
            Err(WkhtmltoxError::EngineInitFailed { status: 0 })
        ));
        // Nothing was allocated, so nothing is destroyed.
        assert_eq!(module.count("destroy"), 0);
        assert_eq!(module.count("terminate"), 0);
    }

    #[test]
    fn successful_pdf_conversion_fills_the_sink_once() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument::from_html("<p>hello</p>");

        let mut sink = Vec::new();
        let factory_calls = Cell::new(0usize);
        let reported_len = Cell::new(0usize);
        let produced = converter
            .convert(&doc, |len| {
                factory_calls.set(factory_calls.get() + 1);
                reported_len.set(len);
                Ok(&mut sink)
            })
            .unwrap();

        assert!(produced);
        assert_eq!(factory_calls.get(), 1);
        assert_eq!(reported_len.get(), b"%PDF-1.7 fake".len());
        assert_eq!(sink, b"%PDF-1.7 fake");
        assert_eq!(module.count("get_output"), 1);
        assert_eq!(module.count("destroy_global_settings"), 1);
        assert_eq!(module.count("destroy_converter"), 1);
        assert_eq!(module.count("terminate"), 1);
    }

    #[test]
    fn unproduced_conversion_is_ok_false_with_full_teardown() {
        let (converter, module) = pdf_converter(RecordingModule {
            convert_result: false,
            ..RecordingModule::pdf()
        });
        let doc = HtmlToPdfDocument::from_html("<p>x</p>");

        let factory_calls = Cell::new(0usize);
        let produced = converter
            .convert(&doc, |_| {
                factory_calls.set(factory_calls.get() + 1);
                Ok(Vec::new())
            })
            .unwrap();

        assert!(!produced);
        assert_eq!(factory_calls.get(), 0, "sink factory must stay untouched");
        assert_eq!(module.count("get_output"), 0);
        assert_eq!(module.count("destroy_global_settings"), 1);
        assert_eq!(module.count("destroy_converter"), 1);
        assert_eq!(module.count("terminate"), 1);
    }

    #[test]
    fn set_fields_propagate_and_unset_fields_do_not() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument {
            global_settings: PdfGlobalSettings {
                document_title: Some("Report".into()),
                ..Default::default()
            },
            object_settings: vec![PdfObjectSettings {
                html_content: Some("<p>x</p>".into()),
                background: Some(true),
                ..Default::default()
            }],
        };
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();

        let calls = module.calls();
        assert_eq!(module.count("set_global_setting documentTitle=Report"), 1);
        assert_eq!(module.count("set_global_setting dpi"), 0);
        assert_eq!(module.count("set_object_setting web.background=true"), 1);
        assert_eq!(module.count("add_object html=true"), 1);
        // Converter exists before any object is added.
        let create = calls.iter().position(|c| c == "create_converter").unwrap();
        let add = calls.iter().position(|c| c.starts_with("add_object")).unwrap();
        assert!(create < add);
    }

    #[test]
    fn every_default_callback_is_registered_once() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument::from_html("<p>x</p>");
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();
        for cb in [
            "set_warning_callback",
            "set_error_callback",
            "set_phase_changed_callback",
            "set_progress_changed_callback",
            "set_finished_callback",
        ] {
            assert_eq!(module.count(cb), 1, "{cb}");
        }
    }

    #[test]
    fn multi_object_documents_register_each_object_in_order() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument {
            object_settings: vec![
                PdfObjectSettings {
                    page: Some("chapter1.html".into()),
                    ..Default::default()
                },
                PdfObjectSettings {
                    html_content: Some("<p>appendix</p>".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();
        assert_eq!(module.count("create_object_settings"), 2);
        assert_eq!(module.count("add_object"), 2);
        assert_eq!(module.count("set_object_setting page=chapter1.html"), 1);
    }

    #[test]
    fn objects_attach_before_callbacks_register() {
        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument::from_html("<p>x</p>");
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();

        let calls = module.calls();
        let last_add = calls
            .iter()
            .rposition(|c| c.starts_with("add_object"))
            .unwrap();
        let first_callback = calls
            .iter()
            .position(|c| c.starts_with("set_warning_callback"))
            .unwrap();
        assert!(last_add < first_callback, "calls: {calls:?}");
    }

    #[test]
    fn image_create_converter_returns_handles_and_configures_once() {
        let (converter, module) = image_converter(RecordingModule::image());
        let doc = HtmlToImageDocument {
            image_settings: ImageSettings {
                in_: Some("page.html".into()),
                quality: Some("85".into()),
                ..Default::default()
            },
        };

        let (handle, global, _guard) = converter.create_converter(&doc).unwrap();
        assert_ne!(handle.as_raw(), 0);
        assert_ne!(global.as_raw(), 0);

        assert_eq!(module.count("create_global_settings"), 1);
        assert_eq!(module.count("create_converter"), 1);
        assert_eq!(module.count("set_global_setting in=page.html"), 1);
        assert_eq!(module.count("set_global_setting quality=85"), 1);
        // The caller owns init, the run, and destruction.
        assert_eq!(module.count("initialize"), 0);
        assert_eq!(module.count("convert"), 0);
        assert_eq!(module.count("destroy"), 0);
        assert_eq!(module.count("terminate"), 0);
    }

    #[test]
    fn image_create_converter_rejects_invalid_document_with_no_calls() {
        let (converter, module) = image_converter(RecordingModule::image());
        let result = converter.create_converter(&HtmlToImageDocument::default());
        assert!(matches!(result, Err(WkhtmltoxError::InvalidDocument { .. })));
        assert!(module.calls().is_empty(), "calls: {:?}", module.calls());
    }

    #[test]
    fn image_create_converter_keeps_inline_source_alive_until_guard_drops() {
        let (converter, module) = image_converter(RecordingModule::image());
        let doc = HtmlToImageDocument::from_html("<h1>decomposed</h1>");

        let (_handle, _global, guard) = converter.create_converter(&doc).unwrap();
        let in_setting = module
            .calls()
            .into_iter()
            .find(|c| c.starts_with("set_global_setting in="))
            .expect("no 'in' setting written");
        let path = in_setting
            .trim_start_matches("set_global_setting in=")
            .to_string();

        // Alive while the guard is held, readable by the engine.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "<h1>decomposed</h1>"
        );
        drop(guard);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn quality_option_produces_exactly_one_setting_call() {
        let (converter, module) = image_converter(RecordingModule::image());
        let doc = HtmlToImageDocument {
            image_settings: ImageSettings {
                in_: Some("page.html".into()),
                quality: Some("85".into()),
                ..Default::default()
            },
        };
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();
        assert_eq!(module.count("set_global_setting quality=85"), 1);

        let (converter, module) = image_converter(RecordingModule::image());
        let doc = HtmlToImageDocument {
            image_settings: ImageSettings {
                in_: Some("page.html".into()),
                ..Default::default()
            },
        };
        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();
        assert_eq!(module.count("set_global_setting quality"), 0);
    }

    /// Module that reads back the file named by the `in` setting, while it
    /// still exists, the way the engine would.
    struct InReadingModule {
        inner: RecordingModule,
        in_content: Mutex<Option<String>>,
    }

    impl InReadingModule {
        fn new() -> Self {
            Self {
                inner: RecordingModule::image(),
                in_content: Mutex::new(None),
            }
        }
    }

    impl Module for InReadingModule {
        fn set_global_setting(
            &self,
            settings: GlobalSettingsHandle,
            name: &str,
            value: Option<&str>,
        ) -> Result<()> {
            if name == "in" {
                if let Some(path) = value {
                    *self.in_content.lock().unwrap() = std::fs::read_to_string(path).ok();
                }
            }
            self.inner.set_global_setting(settings, name, value)
        }

        // Everything else delegates to the recorder.
        fn kind(&self) -> ModuleKind {
            self.inner.kind()
        }
        fn initialize(&self, g: bool) -> Result<i32> {
            self.inner.initialize(g)
        }
        fn terminate(&self) -> Result<i32> {
            self.inner.terminate()
        }
        fn extended_qt(&self) -> Result<i32> {
            self.inner.extended_qt()
        }
        fn library_version(&self) -> Result<String> {
            self.inner.library_version()
        }
        fn create_global_settings(&self) -> Result<GlobalSettingsHandle> {
            self.inner.create_global_settings()
        }
        fn destroy_global_settings(&self, h: GlobalSettingsHandle) -> Result<()> {
            self.inner.destroy_global_settings(h)
        }
        fn get_global_setting(&self, h: GlobalSettingsHandle, n: &str) -> Result<String> {
            self.inner.get_global_setting(h, n)
        }
        fn create_object_settings(&self) -> Result<ObjectSettingsHandle> {
            self.inner.create_object_settings()
        }
        fn destroy_object_settings(&self, h: ObjectSettingsHandle) -> Result<()> {
            self.inner.destroy_object_settings(h)
        }
        fn set_object_setting(
            &self,
            h: ObjectSettingsHandle,
            n: &str,
            v: Option<&str>,
        ) -> Result<()> {
            self.inner.set_object_setting(h, n, v)
        }
        fn add_object(
            &self,
            c: ConverterHandle,
            s: ObjectSettingsHandle,
            d: Option<&str>,
        ) -> Result<()> {
            self.inner.add_object(c, s, d)
        }
        fn create_converter(&self, h: GlobalSettingsHandle) -> Result<ConverterHandle> {
            self.inner.create_converter(h)
        }
        fn destroy_converter(&self, h: ConverterHandle) -> Result<()> {
            self.inner.destroy_converter(h)
        }
        fn set_warning_callback(&self, c: ConverterHandle, cb: StringCallback) -> Result<()> {
            self.inner.set_warning_callback(c, cb)
        }
        fn set_error_callback(&self, c: ConverterHandle, cb: StringCallback) -> Result<()> {
            self.inner.set_error_callback(c, cb)
        }
        fn set_phase_changed_callback(
            &self,
            c: ConverterHandle,
            cb: SignalCallback,
        ) -> Result<()> {
            self.inner.set_phase_changed_callback(c, cb)
        }
        fn set_progress_changed_callback(
            &self,
            c: ConverterHandle,
            cb: SignalCallback,
        ) -> Result<()> {
            self.inner.set_progress_changed_callback(c, cb)
        }
        fn set_finished_callback(&self, c: ConverterHandle, cb: FinishedCallback) -> Result<()> {
            self.inner.set_finished_callback(c, cb)
        }
        fn convert(&self, c: ConverterHandle) -> Result<bool> {
            self.inner.convert(c)
        }
        fn current_phase(&self, c: ConverterHandle) -> Result<i32> {
            self.inner.current_phase(c)
        }
        fn phase_count(&self, c: ConverterHandle) -> Result<i32> {
            self.inner.phase_count(c)
        }
        fn phase_description(&self, c: ConverterHandle, p: i32) -> Result<String> {
            self.inner.phase_description(c, p)
        }
        fn progress_string(&self, c: ConverterHandle) -> Result<String> {
            self.inner.progress_string(c)
        }
        fn http_error_code(&self, c: ConverterHandle) -> Result<i32> {
            self.inner.http_error_code(c)
        }
        fn get_output(&self, c: ConverterHandle) -> Result<Vec<u8>> {
            self.inner.get_output(c)
        }
    }

    #[test]
    fn inline_image_html_travels_through_a_real_temp_file() {
        let module = Arc::new(InReadingModule::new());
        let converter = BasicImageConverter::with_module(Arc::clone(&module) as Arc<dyn Module>);
        let doc = HtmlToImageDocument::from_html("<h1>inline</h1>");

        converter.convert(&doc, |_| Ok(Vec::new())).unwrap();

        // The engine-visible file held exactly the inline HTML.
        let content = module.in_content.lock().unwrap().clone();
        assert_eq!(content.as_deref(), Some("<h1>inline</h1>"));

        let in_setting = module
            .inner
            .calls()
            .into_iter()
            .find(|c| c.starts_with("set_global_setting in="))
            .expect("no 'in' setting written");
        let path = in_setting.trim_start_matches("set_global_setting in=");
        assert!(path.ends_with(".html"), "path: {path}");
        // The temp file is gone once the bracket closed.
        assert!(!std::path::Path::new(path).exists());
    }

    #[test]
    fn image_document_with_both_sources_is_rejected_up_front() {
        let (converter, module) = image_converter(RecordingModule::image());
        let doc = HtmlToImageDocument {
            image_settings: ImageSettings {
                in_: Some("page.html".into()),
                html_content: Some("<p>x</p>".into()),
                ..Default::default()
            },
        };
        let result = converter.convert(&doc, |_| Ok(Vec::new()));
        assert!(matches!(result, Err(WkhtmltoxError::InvalidDocument { .. })));
        assert!(module.calls().is_empty());
    }

    #[test]
    fn sink_write_failure_still_tears_down() {
        struct FailingSink;
        impl Write for FailingSink {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (converter, module) = pdf_converter(RecordingModule::pdf());
        let doc = HtmlToPdfDocument::from_html("<p>x</p>");
        let result = converter.convert(&doc, |_| Ok(FailingSink));
        assert!(matches!(result, Err(WkhtmltoxError::OutputWrite { .. })));
        assert_eq!(module.count("destroy_global_settings"), 1);
        assert_eq!(module.count("destroy_converter"), 1);
        assert_eq!(module.count("terminate"), 1);
    }
}
