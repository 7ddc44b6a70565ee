//! Shared test double: a [`Module`] that counts native traffic.
//!
//! `GateStats` is deliberately separable from the module so two module
//! instances (one per flavor) can report into the same counters, which is
//! how the cross-flavor gate tests observe overlap.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wkhtmltox::module::{
    ConverterHandle, FinishedCallback, GlobalSettingsHandle, Module, ObjectSettingsHandle,
    SignalCallback, StringCallback,
};
use wkhtmltox::{ModuleKind, Result};

/// Installs a test-writer subscriber once per test binary; `RUST_LOG`
/// controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Counters shared across module instances.
#[derive(Default)]
pub struct GateStats {
    /// Conversions currently inside the (fake) engine.
    pub in_flight: AtomicUsize,
    /// High-water mark of `in_flight`; >1 means the gate leaked.
    pub max_in_flight: AtomicUsize,
    /// Every module call, of any kind.
    pub native_calls: AtomicUsize,
    /// Conversions that ran to completion.
    pub completed: AtomicUsize,
}

/// [`Module`] double that sleeps through `convert` to widen overlap
/// windows, and counts everything into its [`GateStats`].
pub struct CountingModule {
    kind: ModuleKind,
    stats: Arc<GateStats>,
    convert_delay: Duration,
    output: Vec<u8>,
    next_handle: AtomicUsize,
}

impl CountingModule {
    pub fn new(kind: ModuleKind, stats: Arc<GateStats>, convert_delay: Duration) -> Self {
        Self {
            kind,
            stats,
            convert_delay,
            output: b"engine output bytes".to_vec(),
            next_handle: AtomicUsize::new(1),
        }
    }

    pub fn output_len() -> usize {
        b"engine output bytes".len()
    }

    fn touch(&self) {
        self.stats.native_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn handle(&self) -> usize {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

impl Module for CountingModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn initialize(&self, _use_graphics: bool) -> Result<i32> {
        self.touch();
        Ok(1)
    }

    fn terminate(&self) -> Result<i32> {
        self.touch();
        Ok(1)
    }

    fn extended_qt(&self) -> Result<i32> {
        self.touch();
        Ok(0)
    }

    fn library_version(&self) -> Result<String> {
        self.touch();
        Ok("0.12.6".into())
    }

    fn create_global_settings(&self) -> Result<GlobalSettingsHandle> {
        self.touch();
        Ok(GlobalSettingsHandle::from_raw(self.handle()))
    }

    fn destroy_global_settings(&self, _: GlobalSettingsHandle) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_global_setting(
        &self,
        _: GlobalSettingsHandle,
        _name: &str,
        _value: Option<&str>,
    ) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn get_global_setting(&self, _: GlobalSettingsHandle, _name: &str) -> Result<String> {
        self.touch();
        Ok(String::new())
    }

    fn create_object_settings(&self) -> Result<ObjectSettingsHandle> {
        self.touch();
        Ok(ObjectSettingsHandle::from_raw(self.handle()))
    }

    fn destroy_object_settings(&self, _: ObjectSettingsHandle) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_object_setting(
        &self,
        _: ObjectSettingsHandle,
        _name: &str,
        _value: Option<&str>,
    ) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn add_object(
        &self,
        _: ConverterHandle,
        _: ObjectSettingsHandle,
        _html: Option<&str>,
    ) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn create_converter(&self, _: GlobalSettingsHandle) -> Result<ConverterHandle> {
        self.touch();
        Ok(ConverterHandle::from_raw(self.handle()))
    }

    fn destroy_converter(&self, _: ConverterHandle) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_warning_callback(&self, _: ConverterHandle, _: StringCallback) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_error_callback(&self, _: ConverterHandle, _: StringCallback) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_phase_changed_callback(&self, _: ConverterHandle, _: SignalCallback) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_progress_changed_callback(&self, _: ConverterHandle, _: SignalCallback) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn set_finished_callback(&self, _: ConverterHandle, _: FinishedCallback) -> Result<()> {
        self.touch();
        Ok(())
    }

    fn convert(&self, _: ConverterHandle) -> Result<bool> {
        self.touch();
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Runs on the blocking pool; a plain sleep widens any overlap
        // window the gate failed to close.
        std::thread::sleep(self.convert_delay);
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn current_phase(&self, _: ConverterHandle) -> Result<i32> {
        self.touch();
        Ok(0)
    }

    fn phase_count(&self, _: ConverterHandle) -> Result<i32> {
        self.touch();
        Ok(0)
    }

    fn phase_description(&self, _: ConverterHandle, _phase: i32) -> Result<String> {
        self.touch();
        Ok(String::new())
    }

    fn progress_string(&self, _: ConverterHandle) -> Result<String> {
        self.touch();
        Ok(String::new())
    }

    fn http_error_code(&self, _: ConverterHandle) -> Result<i32> {
        self.touch();
        Ok(0)
    }

    fn get_output(&self, _: ConverterHandle) -> Result<Vec<u8>> {
        self.touch();
        Ok(self.output.clone())
    }
}

/// `Write` sink the test keeps a handle on after the converter consumed
/// its other half (the async path needs a `'static` sink).
#[derive(Clone, Default)]
pub struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
