use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Installs this logger globally. Call once during early init.
    ///
    /// # Errors
    /// If another logger was installed first.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Formats `record` as `"[LEVEL] target: message\n"`.
///
/// # Errors
/// Whatever `out` reports.
pub fn format_record(out: &mut impl fmt::Write, record: &Record<'_>) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        #[cfg(feature = "enabled")]
        {
            // Best effort; there is nowhere to report a console error.
            let _ = format_record(&mut crate::qemu_fmt::QemuSink, record);
        }
    }

    fn flush(&self) {}
}
